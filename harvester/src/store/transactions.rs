// Copyright (c) TX Society
// SPDX-License-Identifier: Apache-2.0

use diesel::prelude::*;
use diesel::sql_types::{BigInt, Bytea, Text};
use diesel_async::RunQueryDsl;
use harvester_schema::models::TransactionRow;
use harvester_schema::schema::transactions;

use crate::core::{AccountId, Bits256, Message, Transaction, TxGap};
use crate::error::{CoreError, CoreResult};
use crate::store::{sanitize_json, PgConn, Store};

#[derive(QueryableByName)]
struct GapRow {
    #[diesel(sql_type = BigInt)]
    start_lt: i64,
    #[diesel(sql_type = Bytea)]
    start_hash: Vec<u8>,
}

impl Store {
    /// Upsert by hash; transactions are append-only and unique by hash, so
    /// replays from gap repair are no-ops.
    pub async fn save_transactions(
        &self,
        account: AccountId,
        txs: &[Transaction],
    ) -> CoreResult<()> {
        let mut guard = self.conn().await?;
        let conn: &mut PgConn = &mut guard;
        for tx in txs {
            let row = transaction_to_row(account, tx)?;
            diesel::insert_into(transactions::table)
                .values(&row)
                .on_conflict_do_nothing()
                .execute(conn)
                .await?;
        }
        Ok(())
    }

    /// The unique child whose `prev_tx_lt` equals `lt`; this is how the
    /// extractor walks forward in LT order.
    pub async fn get_transaction_by_parent_lt(
        &self,
        account: AccountId,
        lt: u64,
    ) -> CoreResult<Transaction> {
        let mut guard = self.conn().await?;
        let conn: &mut PgConn = &mut guard;
        let row = transactions::table
            .filter(transactions::account_id.eq(account.to_raw()))
            .filter(transactions::prev_tx_lt.eq(lt as i64))
            .select((
                transactions::hash,
                transactions::lt,
                transactions::prev_tx_hash,
                transactions::prev_tx_lt,
                transactions::utime,
                transactions::in_message,
                transactions::out_messages,
                transactions::success,
            ))
            .first::<TxColumns>(conn)
            .await?;
        row_to_transaction(row)
    }

    /// Missing ranges in the stored history plus the highest LT seen.
    ///
    /// A gap starts at the unknown parent of the earliest transaction whose
    /// `prev_tx_hash` the store does not know, and ends at the highest stored
    /// LT strictly below it (0 when there is none).
    pub async fn get_gaps(&self, account: AccountId) -> CoreResult<(Vec<TxGap>, u64)> {
        let mut guard = self.conn().await?;
        let conn: &mut PgConn = &mut guard;

        let rows: Vec<GapRow> = diesel::sql_query(
            "SELECT tx.prev_tx_lt AS start_lt, tx.prev_tx_hash AS start_hash \
             FROM blockchain.transactions tx \
             LEFT JOIN blockchain.transactions ptx ON tx.prev_tx_hash = ptx.hash \
             WHERE ptx.hash IS NULL AND tx.account_id = $1 AND tx.prev_tx_lt != 0",
        )
        .bind::<Text, _>(account.to_raw())
        .load(conn)
        .await?;

        let mut gaps = Vec::with_capacity(rows.len());
        for row in rows {
            let end_lt = transactions::table
                .filter(transactions::account_id.eq(account.to_raw()))
                .filter(transactions::lt.lt(row.start_lt))
                .select(transactions::lt)
                .order(transactions::lt.desc())
                .first::<i64>(conn)
                .await
                .optional()?
                .unwrap_or(0);
            gaps.push(TxGap {
                start_lt: row.start_lt as u64,
                end_lt: end_lt as u64,
                start_hash: Bits256::from_slice(&row.start_hash)
                    .map_err(|e| CoreError::CorruptStorage(e.to_string()))?,
            });
        }

        let last_lt = transactions::table
            .filter(transactions::account_id.eq(account.to_raw()))
            .select(transactions::lt)
            .order(transactions::lt.desc())
            .first::<i64>(conn)
            .await
            .optional()?
            .unwrap_or(0);

        Ok((gaps, last_lt as u64))
    }
}

type TxColumns = (
    Vec<u8>,
    i64,
    Vec<u8>,
    i64,
    i64,
    serde_json::Value,
    Vec<serde_json::Value>,
    bool,
);

fn transaction_to_row(account: AccountId, tx: &Transaction) -> CoreResult<TransactionRow> {
    let mut in_message = serde_json::to_value(&tx.in_message)
        .map_err(|e| CoreError::Storage(format!("marshal in_message: {e}")))?;
    sanitize_json(&mut in_message);
    let mut out_messages = Vec::with_capacity(tx.out_messages.len());
    for message in &tx.out_messages {
        let mut value = serde_json::to_value(message)
            .map_err(|e| CoreError::Storage(format!("marshal out_message: {e}")))?;
        sanitize_json(&mut value);
        out_messages.push(value);
    }
    Ok(TransactionRow {
        hash: tx.hash.as_slice().to_vec(),
        lt: tx.lt as i64,
        account_id: account.to_raw(),
        prev_tx_hash: tx.prev_tx_hash.as_slice().to_vec(),
        prev_tx_lt: tx.prev_tx_lt as i64,
        utime: tx.utime as i64,
        in_message,
        out_messages,
        success: tx.success,
        processing_error: None,
    })
}

fn row_to_transaction(row: TxColumns) -> CoreResult<Transaction> {
    let (hash, lt, prev_tx_hash, prev_tx_lt, utime, in_message, out_messages, success) = row;
    let in_message: Message = serde_json::from_value(in_message)
        .map_err(|e| CoreError::CorruptStorage(format!("unmarshal in_message: {e}")))?;
    let out_messages = out_messages
        .into_iter()
        .map(|value| {
            serde_json::from_value(value)
                .map_err(|e| CoreError::CorruptStorage(format!("unmarshal out_message: {e}")))
        })
        .collect::<CoreResult<Vec<Message>>>()?;
    Ok(Transaction {
        lt: lt as u64,
        hash: Bits256::from_slice(&hash).map_err(|e| CoreError::CorruptStorage(e.to_string()))?,
        prev_tx_lt: prev_tx_lt as u64,
        prev_tx_hash: Bits256::from_slice(&prev_tx_hash)
            .map_err(|e| CoreError::CorruptStorage(e.to_string()))?,
        utime: utime as u32,
        success,
        in_message,
        out_messages,
    })
}
