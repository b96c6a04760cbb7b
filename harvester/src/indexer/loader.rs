// Copyright (c) TX Society
// SPDX-License-Identifier: Apache-2.0

//! History loader: crawls the transaction linked list backwards, fills gaps
//! and tracks the account tip.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::chain::ChainClient;
use crate::core::{Account, AccountId, Bits256, TxId};
use crate::error::{CoreError, CoreResult};
use crate::indexer::{chain_deadline, storage_deadline, IndexerStorage};

const REFRESH_INTERVAL: Duration = Duration::from_secs(5);
const GAP_QUERY_RETRY_DELAY: Duration = Duration::from_secs(60);
const MAX_CHAIN_RETRIES: u64 = 200;

pub struct LoaderWorker<S> {
    account: AccountId,
    chain: Arc<dyn ChainClient>,
    storage: Arc<S>,
    last_lt: u64,
    max_depth_lt: u64,
}

impl<S: IndexerStorage> LoaderWorker<S> {
    pub fn new(account: Account, chain: Arc<dyn ChainClient>, storage: Arc<S>) -> Self {
        Self {
            account: account.id,
            chain,
            storage,
            last_lt: 0,
            max_depth_lt: account.info.max_depth_lt,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let (gaps, last_lt) = match storage_deadline(self.storage.get_gaps(self.account)).await {
            Ok(result) => result,
            Err(first_err) => {
                // maybe the database is momentarily unavailable
                error!(account = %self.account.to_raw(), "[Loader] gap query failed: {first_err}");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(GAP_QUERY_RETRY_DELAY) => {}
                }
                match storage_deadline(self.storage.get_gaps(self.account)).await {
                    Ok(result) => result,
                    Err(e) => panic!("loader cannot read gaps, store unusable: {e}"),
                }
            }
        };
        self.last_lt = last_lt;

        for gap in gaps {
            match self
                .sync_history_gap(&cancel, gap.start_hash, gap.start_lt, gap.end_lt)
                .await
            {
                Ok(true) => {}
                Ok(false) => return, // cancelled mid-repair
                Err(e) => panic!("loader gap repair failed, store unusable: {e}"),
            }
        }
        info!(account = %self.account.to_raw(), "[Loader] history repaired, tracking tip");

        loop {
            if let Err(e) = self.refresh_account(&cancel).await {
                error!(account = %self.account.to_raw(), "[Loader] refresh account: {e}");
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(REFRESH_INTERVAL) => {}
            }
        }
        info!(account = %self.account.to_raw(), "[Loader] stopped");
    }

    /// Crawl from `(start_lt, start_hash)` down to `end_lt`, saving every
    /// batch. Returns `Ok(false)` when cancelled before convergence. The
    /// crawl never descends below the account's configured start LT.
    async fn sync_history_gap(
        &mut self,
        cancel: &CancellationToken,
        start_hash: Bits256,
        start_lt: u64,
        end_lt: u64,
    ) -> CoreResult<bool> {
        let end_lt = end_lt.max(self.max_depth_lt);
        let mut hash = start_hash;
        let mut lt = start_lt;
        loop {
            if lt == end_lt {
                return Ok(true);
            }
            let Some(next) = self.sync_gap_iteration(cancel, hash, lt, end_lt).await? else {
                return Ok(false);
            };
            if next.lt <= end_lt {
                return Ok(true);
            }
            hash = next.hash;
            lt = next.lt;
        }
    }

    /// Pull one batch ending at `(lt, hash)`, persist it, and return the
    /// oldest transaction's parent as the next crawl position. Chain calls
    /// are retried with linearly increasing backoff.
    async fn sync_gap_iteration(
        &mut self,
        cancel: &CancellationToken,
        hash: Bits256,
        lt: u64,
        end_lt: u64,
    ) -> CoreResult<Option<TxId>> {
        let mut txs = Vec::new();
        let mut last_err = None;
        for attempt in 0..MAX_CHAIN_RETRIES {
            match chain_deadline(self.chain.get_transactions(self.account, lt, end_lt, hash)).await
            {
                Ok(batch) if !batch.is_empty() => {
                    txs = batch;
                    last_err = None;
                    break;
                }
                Ok(_) => {
                    last_err = Some(CoreError::ChainTransient(format!(
                        "no transactions for {} {} {}",
                        self.account.to_raw(),
                        lt,
                        end_lt
                    )));
                }
                Err(e) => last_err = Some(e),
            }
            error!(account = %self.account.to_raw(), attempt, "[Loader] get transactions failed, retrying");
            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep(Duration::from_secs(attempt)) => {}
            }
        }
        if let Some(e) = last_err {
            return Err(e);
        }

        storage_deadline(self.storage.save_transactions(self.account, &txs)).await?;
        let oldest = txs.last().expect("batch is non-empty");
        Ok(Some(TxId {
            lt: oldest.prev_tx_lt,
            hash: oldest.prev_tx_hash,
        }))
    }

    /// Fetch the account tip and crawl the newly appended tail. A chain node
    /// reporting an older state than ours is treated as node inconsistency
    /// and retried later; the tip never regresses. A failed tail repair means
    /// the local store is corrupt and the process must restart.
    async fn refresh_account(&mut self, cancel: &CancellationToken) -> CoreResult<()> {
        let (state, mc_seqno) =
            chain_deadline(self.chain.get_account_state(self.account)).await?;
        if state.last_trans_lt < self.last_lt {
            return Err(CoreError::ChainTransient(format!(
                "account has older state than previous: {} < {}",
                state.last_trans_lt, self.last_lt
            )));
        }
        let tip = TxId {
            lt: state.last_trans_lt,
            hash: state.last_trans_hash,
        };
        storage_deadline(self.storage.update_account(self.account, tip, mc_seqno)).await?;
        match self
            .sync_history_gap(cancel, state.last_trans_hash, state.last_trans_lt, self.last_lt)
            .await
        {
            Ok(true) => {
                self.last_lt = state.last_trans_lt;
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => panic!("loader tail repair failed, store unusable: {e}"),
        }
    }
}
