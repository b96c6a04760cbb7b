// Copyright (c) TX Society
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use chrono::Utc;
use diesel::prelude::*;
use diesel::sql_types::{Array, BigInt, Text};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use harvester_schema::models::AccountRow;
use harvester_schema::schema::{accounts, jetton_wallets};

use crate::core::{Account, AccountId, AccountInfo, Currency, ExtendedCurrency, TxId};
use crate::error::{CoreError, CoreResult};
use crate::store::currencies::currency_id;
use crate::store::{PgConn, Store};

#[derive(QueryableByName)]
struct TrackedAccountRow {
    #[diesel(sql_type = Text)]
    address: String,
    #[diesel(sql_type = BigInt)]
    start_tx_lt: i64,
    #[diesel(sql_type = Text)]
    info: String,
}

impl Store {
    /// The recipient account (if known) plus every jetton-wallet row owned by
    /// the recipient whose currency is in the whitelist.
    pub async fn get_tracked_accounts(
        &self,
        recipient: AccountId,
        whitelist: &HashMap<String, ExtendedCurrency>,
    ) -> CoreResult<HashMap<AccountId, AccountInfo>> {
        let jettons: Vec<String> = whitelist
            .values()
            .filter_map(|c| c.currency.jetton_master())
            .map(|master| master.to_raw())
            .collect();

        let mut guard = self.conn().await?;
        let conn: &mut PgConn = &mut guard;

        let rows: Vec<TrackedAccountRow> = diesel::sql_query(
            "SELECT a.address, a.start_tx_lt, c.info \
             FROM payments.jetton_wallets jw \
             JOIN payments.currencies c ON c.id = jw.currency \
             JOIN blockchain.accounts a ON a.address = jw.address \
             WHERE jw.owner = $1 AND c.info = ANY($2)",
        )
        .bind::<Text, _>(recipient.to_raw())
        .bind::<Array<Text>, _>(jettons)
        .load(conn)
        .await?;

        let mut tracked = HashMap::with_capacity(rows.len() + 1);
        for row in rows {
            let account = AccountId::from_raw(&row.address)
                .map_err(|e| CoreError::CorruptStorage(e.to_string()))?;
            let jetton = AccountId::from_raw(&row.info)
                .map_err(|e| CoreError::CorruptStorage(e.to_string()))?;
            tracked.insert(
                account,
                AccountInfo {
                    max_depth_lt: row.start_tx_lt as u64,
                    recipient,
                    jetton: Some(jetton),
                },
            );
        }

        match self.account_start_lt(recipient).await {
            Ok(start_lt) => {
                tracked.insert(
                    recipient,
                    AccountInfo {
                        max_depth_lt: start_lt,
                        recipient,
                        jetton: None,
                    },
                );
            }
            Err(CoreError::NotFound) => {}
            Err(err) => return Err(err),
        }
        Ok(tracked)
    }

    /// Insert a new account seeded with `start_tx_lt = last_processed_lt =
    /// max_depth_lt`, so the history before admission stays invisible. For
    /// jetton wallets the wallet-to-currency mapping lands in the same
    /// database transaction.
    pub async fn create_account(&self, account: Account, last_tx: TxId) -> CoreResult<()> {
        let row = AccountRow {
            address: account.id.to_raw(),
            last_tx_lt: last_tx.lt as i64,
            last_tx_hash: last_tx.hash.as_slice().to_vec(),
            last_checked_block: None,
            indexer_timestamp: Utc::now(),
            start_tx_lt: account.info.max_depth_lt as i64,
            last_processed_lt: account.info.max_depth_lt as i64,
        };

        let mut guard = self.conn().await?;
        let conn: &mut PgConn = &mut guard;

        let Some(jetton) = account.info.jetton else {
            diesel::insert_into(accounts::table)
                .values(&row)
                .execute(conn)
                .await?;
            return Ok(());
        };

        conn.transaction::<_, CoreError, _>(|conn| {
            async move {
                let currency = currency_id(conn, Currency::Jetton(jetton)).await?;
                diesel::insert_into(accounts::table)
                    .values(&row)
                    .execute(conn)
                    .await?;
                diesel::insert_into(jetton_wallets::table)
                    .values((
                        jetton_wallets::address.eq(account.id.to_raw()),
                        jetton_wallets::owner.eq(account.info.recipient.to_raw()),
                        jetton_wallets::currency.eq(currency),
                    ))
                    .execute(conn)
                    .await?;
                Ok(())
            }
            .scope_boxed()
        })
        .await
    }

    /// Advance the crawler's view of the chain head for this account.
    pub async fn update_account(
        &self,
        account: AccountId,
        last_tx: TxId,
        mc_seqno: u32,
    ) -> CoreResult<()> {
        let mut guard = self.conn().await?;
        let conn: &mut PgConn = &mut guard;
        diesel::update(accounts::table.filter(accounts::address.eq(account.to_raw())))
            .set((
                accounts::last_tx_lt.eq(last_tx.lt as i64),
                accounts::last_tx_hash.eq(last_tx.hash.as_slice().to_vec()),
                accounts::last_checked_block.eq(Some(mc_seqno as i64)),
                accounts::indexer_timestamp.eq(Utc::now()),
            ))
            .execute(conn)
            .await?;
        Ok(())
    }

    pub async fn account_start_lt(&self, account: AccountId) -> CoreResult<u64> {
        let mut guard = self.conn().await?;
        let conn: &mut PgConn = &mut guard;
        let start_lt = accounts::table
            .filter(accounts::address.eq(account.to_raw()))
            .select(accounts::start_tx_lt)
            .first::<i64>(conn)
            .await?;
        Ok(start_lt as u64)
    }

    /// The extractor's resume point.
    pub async fn last_processed_lt(&self, account: AccountId) -> CoreResult<u64> {
        let mut guard = self.conn().await?;
        let conn: &mut PgConn = &mut guard;
        let lt = accounts::table
            .filter(accounts::address.eq(account.to_raw()))
            .select(accounts::last_processed_lt)
            .first::<i64>(conn)
            .await?;
        Ok(lt as u64)
    }
}
