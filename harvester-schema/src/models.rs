// Copyright (c) TX Society
// SPDX-License-Identifier: Apache-2.0

//! Row models for the harvester tables.
//!
//! LTs are `u64` on the wire and `bigint` in Postgres; callers cast with
//! `as i64` / `as u64` at the boundary.

use chrono::{DateTime, Utc};
use diesel::prelude::{AsChangeset, Insertable, Queryable};
use uuid::Uuid;

use crate::schema::{accounts, invoice_notifications, invoices, keys, transactions};

#[derive(Debug, Clone, Insertable, Queryable)]
#[diesel(table_name = accounts)]
pub struct AccountRow {
    pub address: String,
    pub last_tx_lt: i64,
    pub last_tx_hash: Vec<u8>,
    pub last_checked_block: Option<i64>,
    pub indexer_timestamp: DateTime<Utc>,
    pub start_tx_lt: i64,
    pub last_processed_lt: i64,
}

#[derive(Debug, Clone, Insertable, Queryable)]
#[diesel(table_name = transactions)]
pub struct TransactionRow {
    pub hash: Vec<u8>,
    pub lt: i64,
    pub account_id: String,
    pub prev_tx_hash: Vec<u8>,
    pub prev_tx_lt: i64,
    pub utime: i64,
    pub in_message: serde_json::Value,
    pub out_messages: Vec<serde_json::Value>,
    pub success: bool,
    pub processing_error: Option<String>,
}

#[derive(Debug, Clone, Insertable, Queryable)]
#[diesel(table_name = invoices)]
pub struct InvoiceRow {
    pub id: Uuid,
    pub status: String,
    pub amount: String,
    pub currency: Uuid,
    pub created_at: DateTime<Utc>,
    pub expire_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub private_info: serde_json::Value,
    pub metadata: serde_json::Value,
    pub overpayment: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub paid_by: Option<String>,
    pub recipient: String,
    pub tx_hash: Option<Vec<u8>>,
}

/// Outbox row. Same shape as [InvoiceRow]; a status change writes the full
/// invoice snapshot here in the same database transaction. An undelivered
/// older snapshot is replaced by the newer one on conflict.
#[derive(Debug, Clone, Insertable, Queryable, AsChangeset)]
#[diesel(table_name = invoice_notifications, treat_none_as_null = true)]
pub struct InvoiceNotificationRow {
    pub id: Uuid,
    pub status: String,
    pub amount: String,
    pub currency: Uuid,
    pub created_at: DateTime<Utc>,
    pub expire_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub private_info: serde_json::Value,
    pub metadata: serde_json::Value,
    pub overpayment: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub paid_by: Option<String>,
    pub recipient: String,
    pub tx_hash: Option<Vec<u8>>,
}

impl From<InvoiceRow> for InvoiceNotificationRow {
    fn from(row: InvoiceRow) -> Self {
        Self {
            id: row.id,
            status: row.status,
            amount: row.amount,
            currency: row.currency,
            created_at: row.created_at,
            expire_at: row.expire_at,
            updated_at: row.updated_at,
            private_info: row.private_info,
            metadata: row.metadata,
            overpayment: row.overpayment,
            paid_at: row.paid_at,
            paid_by: row.paid_by,
            recipient: row.recipient,
            tx_hash: row.tx_hash,
        }
    }
}

#[derive(Debug, Clone, Insertable, Queryable)]
#[diesel(table_name = keys)]
pub struct KeyRow {
    pub address: String,
    pub encryption_key: Vec<u8>,
    pub accepted: bool,
    pub created_at: DateTime<Utc>,
}
