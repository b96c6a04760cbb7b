// Copyright (c) TX Society
// SPDX-License-Identifier: Apache-2.0

//! Read-only blockchain access reduced to the core's transaction and
//! account-state model.

mod client;
mod watcher;

pub use client::LiteClient;
pub use watcher::run_head_watcher;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{AccountId, Bits256, Transaction};
use crate::error::CoreResult;

pub const MASTERCHAIN: i32 = -1;
pub const MASTERCHAIN_SHARD: u64 = 0x8000_0000_0000_0000;

/// Extended block identifier of a proven masterchain head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockIdExt {
    pub workchain: i32,
    pub shard: u64,
    pub seqno: u32,
    pub root_hash: Bits256,
    pub file_hash: Bits256,
}

impl BlockIdExt {
    pub fn is_masterchain(&self) -> bool {
        self.workchain == MASTERCHAIN && self.shard == MASTERCHAIN_SHARD
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Uninit,
    Frozen,
    Nonexist,
}

/// Account state at the cached masterchain head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ShardAccountState {
    pub status: AccountStatus,
    #[serde(default)]
    pub balance: u64,
    pub last_trans_lt: u64,
    pub last_trans_hash: Bits256,
}

/// Read-only chain queries consumed by the workers and the registrar.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Up to 16 transactions ending at `(lt, hash)` walking backwards,
    /// stopping at the first transaction with `lt <= max_depth_lt`. The
    /// returned list is contiguous; a first-hash mismatch is a verification
    /// failure.
    async fn get_transactions(
        &self,
        account: AccountId,
        lt: u64,
        max_depth_lt: u64,
        hash: Bits256,
    ) -> CoreResult<Vec<Transaction>>;

    /// Account state at the cached head block plus the head's seqno.
    async fn get_account_state(&self, account: AccountId)
        -> CoreResult<(ShardAccountState, u32)>;

    /// Resolve the jetton wallet of `owner` for `master`; a deployed wallet
    /// must report back the same master and owner.
    async fn get_jetton_wallet(
        &self,
        master: AccountId,
        owner: AccountId,
    ) -> CoreResult<AccountId>;
}
