// Copyright (c) TX Society
// SPDX-License-Identifier: Apache-2.0

//! HTTP client for a TON liteserver gateway.
//!
//! The gateway proves blocks against the chain and returns transactions with
//! message bodies already decoded to the core model; this client reduces its
//! responses to [Transaction] / [ShardAccountState] and keeps the cached
//! proven masterchain head that every state query is pinned to.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::chain::{AccountStatus, BlockIdExt, ChainClient, ShardAccountState};
use crate::core::{AccountId, Bits256, Transaction};
use crate::error::{CoreError, CoreResult};
use crate::store::Store;

const TRANSACTIONS_PAGE: usize = 16;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct LiteClient {
    http: reqwest::Client,
    base: Url,
    head: ArcSwapOption<BlockIdExt>,
}

#[derive(Deserialize)]
struct TransactionsResponse {
    transactions: Vec<Transaction>,
}

#[derive(Deserialize)]
struct WalletAddressResponse {
    address: AccountId,
}

#[derive(Deserialize)]
struct JettonWalletData {
    jetton: AccountId,
    owner: AccountId,
}

impl LiteClient {
    /// Connects to the first configured gateway endpoint.
    pub fn new(endpoints: &[Url]) -> anyhow::Result<Self> {
        let Some(endpoint) = endpoints.first() else {
            anyhow::bail!("no liteserver gateway endpoints configured");
        };
        let mut base = endpoint.clone();
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base,
            head: ArcSwapOption::const_empty(),
        })
    }

    pub(crate) fn head(&self) -> Option<Arc<BlockIdExt>> {
        self.head.load_full()
    }

    /// Fetch the current proven masterchain head, publish it to readers and
    /// persist it as the trusted block.
    pub async fn refresh_head(&self, store: &Store) -> CoreResult<BlockIdExt> {
        let head: BlockIdExt = self.get_json("masterchain/head".to_string()).await?;
        self.head.store(Some(Arc::new(head)));
        store.set_last_trusted_block(head).await?;
        Ok(head)
    }

    async fn get_json<T: DeserializeOwned>(&self, path_and_query: String) -> CoreResult<T> {
        let url = self
            .base
            .join(&path_and_query)
            .map_err(|e| CoreError::ChainTransient(format!("invalid gateway url: {e}")))?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| CoreError::ChainTransient(e.to_string()))?;
        if !response.status().is_success() {
            return Err(CoreError::ChainTransient(format!(
                "gateway status {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| CoreError::ChainTransient(format!("gateway response: {e}")))
    }
}

#[async_trait]
impl ChainClient for LiteClient {
    async fn get_transactions(
        &self,
        account: AccountId,
        lt: u64,
        max_depth_lt: u64,
        hash: Bits256,
    ) -> CoreResult<Vec<Transaction>> {
        let response: TransactionsResponse = self
            .get_json(format!(
                "accounts/{}/transactions?lt={}&hash={}&limit={}",
                account.to_raw(),
                lt,
                hash.to_hex(),
                TRANSACTIONS_PAGE,
            ))
            .await?;

        let mut expected = hash;
        let mut transactions = Vec::with_capacity(response.transactions.len());
        for tx in response.transactions {
            // each element must continue the linked chain we asked for
            if tx.hash != expected {
                return Err(CoreError::ChainVerification("mismatched tx hash".into()));
            }
            if tx.lt <= max_depth_lt {
                break;
            }
            expected = tx.prev_tx_hash;
            transactions.push(tx);
        }
        Ok(transactions)
    }

    async fn get_account_state(
        &self,
        account: AccountId,
    ) -> CoreResult<(ShardAccountState, u32)> {
        let head = self.head().ok_or(CoreError::NotInitialized)?;
        let state: ShardAccountState = self
            .get_json(format!(
                "accounts/{}?seqno={}",
                account.to_raw(),
                head.seqno
            ))
            .await?;
        Ok((state, head.seqno))
    }

    async fn get_jetton_wallet(
        &self,
        master: AccountId,
        owner: AccountId,
    ) -> CoreResult<AccountId> {
        let resolved: WalletAddressResponse = self
            .get_json(format!(
                "jettons/{}/wallets/{}",
                master.to_raw(),
                owner.to_raw()
            ))
            .await?;
        let wallet = resolved.address;

        let (state, _) = self.get_account_state(wallet).await?;
        if state.status != AccountStatus::Active {
            warn!(
                account = %wallet.to_raw(),
                "jetton wallet is not deployed, master binding cannot be verified"
            );
            return Ok(wallet);
        }

        let data: JettonWalletData = self
            .get_json(format!("accounts/{}/jetton-wallet", wallet.to_raw()))
            .await?;
        if data.jetton != master {
            return Err(CoreError::ChainVerification(
                "jetton master from jetton wallet is not equal to jetton master".into(),
            ));
        }
        if data.owner != owner {
            return Err(CoreError::ChainVerification(
                "wallet owner from jetton wallet is not equal to owner".into(),
            ));
        }
        Ok(wallet)
    }
}
