// Copyright (c) TX Society
// SPDX-License-Identifier: Apache-2.0

//! Account registrar: resolves the set of accounts to track for the
//! recipient and the currency whitelist, admitting new ones.

use std::collections::HashMap;

use tracing::info;

use crate::chain::ChainClient;
use crate::core::{Account, AccountId, AccountInfo, Currency, ExtendedCurrency, TxId};
use crate::error::CoreResult;
use crate::store::Store;

/// Ensure every whitelisted currency has a tracked account: the recipient for
/// native and extra currencies, one resolved jetton wallet per jetton. New
/// accounts are indexed from their current chain tip forward
/// (`max_depth_lt = last_trans_lt`).
pub async fn get_accounts_for_tracking(
    store: &Store,
    chain: &dyn ChainClient,
    recipient: AccountId,
    whitelist: &HashMap<String, ExtendedCurrency>,
) -> CoreResult<HashMap<AccountId, AccountInfo>> {
    let mut accounts = store.get_tracked_accounts(recipient, whitelist).await?;
    let mut admitted: HashMap<AccountId, AccountInfo> = HashMap::new();

    for extended in whitelist.values() {
        match extended.currency {
            // extra coins travel on the recipient's native account
            Currency::Extra(_) => continue,
            Currency::Ton => {
                if !accounts.contains_key(&recipient) {
                    let info = AccountInfo {
                        max_depth_lt: 0,
                        recipient,
                        jetton: None,
                    };
                    accounts.insert(recipient, info);
                    admitted.insert(recipient, info);
                }
            }
            Currency::Jetton(master) => {
                let already_tracked = accounts.values().any(|info| {
                    info.recipient == recipient && info.jetton == Some(master)
                });
                if already_tracked {
                    continue;
                }
                let wallet = chain.get_jetton_wallet(master, recipient).await?;
                let info = AccountInfo {
                    max_depth_lt: 0,
                    recipient,
                    jetton: Some(master),
                };
                accounts.insert(wallet, info);
                admitted.insert(wallet, info);
            }
        }
    }

    for (account_id, mut info) in admitted {
        let (state, _) = chain.get_account_state(account_id).await?;
        let last_tx = TxId {
            lt: state.last_trans_lt,
            hash: state.last_trans_hash,
        };
        // index only from now forward
        info.max_depth_lt = last_tx.lt;
        accounts.insert(account_id, info);
        store
            .create_account(
                Account {
                    id: account_id,
                    info,
                },
                last_tx,
            )
            .await?;
        info!(address = %account_id.to_raw(), "[Registrar] admitted new account");
    }

    Ok(accounts)
}
