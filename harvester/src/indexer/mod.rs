// Copyright (c) TX Society
// SPDX-License-Identifier: Apache-2.0

//! Per-account indexing: a loader that repairs the transaction linked list
//! and an extractor that turns stored transactions into payments.
//!
//! The two workers of an account are independent loops coupled only through
//! the store; the coupling point is the durable `last_processed_lt`, not an
//! in-process channel.

mod extractor;
mod loader;
mod registrar;

pub use extractor::{extract_jetton_payments, extract_native_payments, ExtractorWorker};
pub use loader::LoaderWorker;
pub use registrar::get_accounts_for_tracking;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::chain::ChainClient;
use crate::core::{Account, AccountId, Payment, Transaction, TxGap, TxId};
use crate::error::{CoreError, CoreResult};
use crate::store::Store;

pub(crate) const CALL_DEADLINE: Duration = Duration::from_secs(10);
const EXPIRATION_TICK: Duration = Duration::from_secs(5);

/// The slice of the store the per-account workers and the ticker consume.
#[async_trait]
pub trait IndexerStorage: Send + Sync + 'static {
    async fn mark_expired(&self) -> CoreResult<()>;
    async fn save_payments(
        &self,
        account: AccountId,
        tx_lt: u64,
        payments: &[Payment],
        parsing_error: Option<String>,
    ) -> CoreResult<()>;
    async fn update_account(&self, account: AccountId, last_tx: TxId, mc_seqno: u32)
        -> CoreResult<()>;
    async fn delete_expired_keys(&self) -> CoreResult<()>;
    async fn get_gaps(&self, account: AccountId) -> CoreResult<(Vec<TxGap>, u64)>;
    async fn save_transactions(&self, account: AccountId, txs: &[Transaction]) -> CoreResult<()>;
    async fn last_processed_lt(&self, account: AccountId) -> CoreResult<u64>;
    async fn get_transaction_by_parent_lt(
        &self,
        account: AccountId,
        lt: u64,
    ) -> CoreResult<Transaction>;
}

#[async_trait]
impl IndexerStorage for Store {
    async fn mark_expired(&self) -> CoreResult<()> {
        Store::mark_expired(self).await
    }

    async fn save_payments(
        &self,
        account: AccountId,
        tx_lt: u64,
        payments: &[Payment],
        parsing_error: Option<String>,
    ) -> CoreResult<()> {
        Store::save_payments(self, account, tx_lt, payments, parsing_error).await
    }

    async fn update_account(
        &self,
        account: AccountId,
        last_tx: TxId,
        mc_seqno: u32,
    ) -> CoreResult<()> {
        Store::update_account(self, account, last_tx, mc_seqno).await
    }

    async fn delete_expired_keys(&self) -> CoreResult<()> {
        Store::delete_expired_keys(self).await
    }

    async fn get_gaps(&self, account: AccountId) -> CoreResult<(Vec<TxGap>, u64)> {
        Store::get_gaps(self, account).await
    }

    async fn save_transactions(&self, account: AccountId, txs: &[Transaction]) -> CoreResult<()> {
        Store::save_transactions(self, account, txs).await
    }

    async fn last_processed_lt(&self, account: AccountId) -> CoreResult<u64> {
        Store::last_processed_lt(self, account).await
    }

    async fn get_transaction_by_parent_lt(
        &self,
        account: AccountId,
        lt: u64,
    ) -> CoreResult<Transaction> {
        Store::get_transaction_by_parent_lt(self, account, lt).await
    }
}

/// Wrap a storage call in the per-call deadline.
pub(crate) async fn storage_deadline<T>(
    fut: impl Future<Output = CoreResult<T>>,
) -> CoreResult<T> {
    match tokio::time::timeout(CALL_DEADLINE, fut).await {
        Ok(result) => result,
        Err(_) => Err(CoreError::Storage("storage call deadline exceeded".into())),
    }
}

/// Wrap a chain RPC in the per-call deadline.
pub(crate) async fn chain_deadline<T>(fut: impl Future<Output = CoreResult<T>>) -> CoreResult<T> {
    match tokio::time::timeout(CALL_DEADLINE, fut).await {
        Ok(result) => result,
        Err(_) => Err(CoreError::ChainTransient("chain call deadline exceeded".into())),
    }
}

/// Supervisor: admits accounts from the registrar channel and runs one
/// loader plus one extractor per account.
pub struct Indexer<S> {
    chain: Arc<dyn ChainClient>,
    storage: Arc<S>,
    accounts_rx: mpsc::Receiver<Account>,
}

impl<S: IndexerStorage> Indexer<S> {
    pub fn new(chain: Arc<dyn ChainClient>, storage: Arc<S>) -> (Self, mpsc::Sender<Account>) {
        let (accounts_tx, accounts_rx) = mpsc::channel(16);
        (
            Self {
                chain,
                storage,
                accounts_rx,
            },
            accounts_tx,
        )
    }

    /// Spawn the expiration ticker and the account supervisor.
    pub fn run(self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let ticker = tokio::spawn(run_expiration_ticker(
            self.storage.clone(),
            cancel.clone(),
        ));
        let supervisor = tokio::spawn(run_supervisor(
            self.chain,
            self.storage,
            self.accounts_rx,
            cancel,
        ));
        vec![ticker, supervisor]
    }
}

async fn run_supervisor<S: IndexerStorage>(
    chain: Arc<dyn ChainClient>,
    storage: Arc<S>,
    mut accounts_rx: mpsc::Receiver<Account>,
    cancel: CancellationToken,
) {
    info!("[Indexer] started");
    let mut workers = Vec::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            account = accounts_rx.recv() => {
                let Some(account) = account else {
                    error!("[Indexer] account channel closed");
                    break;
                };
                match track_account(&chain, &storage, account, &cancel).await {
                    Ok(handles) => workers.extend(handles),
                    Err(e) => error!(
                        address = %account.id.to_raw(),
                        "[Indexer] failed to start tracking account: {e}"
                    ),
                }
            }
        }
    }
    for worker in workers {
        let _ = worker.await;
    }
    info!("[Indexer] stopped");
}

async fn track_account<S: IndexerStorage>(
    chain: &Arc<dyn ChainClient>,
    storage: &Arc<S>,
    account: Account,
    cancel: &CancellationToken,
) -> CoreResult<Vec<JoinHandle<()>>> {
    let loader = LoaderWorker::new(account, chain.clone(), storage.clone());
    let extractor = ExtractorWorker::new(storage.clone(), account).await?;
    info!(address = %account.id.to_raw(), "[Indexer] tracking account");
    Ok(vec![
        tokio::spawn(loader.run(cancel.child_token())),
        tokio::spawn(extractor.run(cancel.child_token())),
    ])
}

/// Periodically expires invoices and garbage-collects unaccepted keys.
/// Errors are logged and retried on the next tick.
async fn run_expiration_ticker<S: IndexerStorage>(storage: Arc<S>, cancel: CancellationToken) {
    info!("[Expiration] started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(EXPIRATION_TICK) => {
                if let Err(e) = storage_deadline(storage.delete_expired_keys()).await {
                    error!("[Expiration] failed to delete expired keys: {e}");
                    continue;
                }
                if let Err(e) = storage_deadline(storage.mark_expired()).await {
                    error!("[Expiration] failed to mark expired invoices: {e}");
                }
            }
        }
    }
    info!("[Expiration] stopped");
}
