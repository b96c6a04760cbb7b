// Copyright (c) TX Society
// SPDX-License-Identifier: Apache-2.0

//! Transactional persistence for accounts, transactions, invoices, payments,
//! notifications and encryption keys.
//!
//! The store is the arbiter of consistency: every multi-row effect crosses
//! through it inside a database transaction, and every status-changing
//! invoice operation writes its outbox row within that same transaction.

mod accounts;
mod blocks;
mod currencies;
mod invoices;
mod keys;
mod transactions;

use diesel_async::AsyncPgConnection;
use harvester_pg_db::{Connection, Db};

use crate::core::AccountId;
use crate::error::{CoreError, CoreResult};

#[derive(Clone)]
pub struct Store {
    db: Db,
    recipient: AccountId,
}

impl Store {
    pub fn new(db: Db, recipient: AccountId) -> Self {
        Self { db, recipient }
    }

    pub fn recipient(&self) -> AccountId {
        self.recipient
    }

    pub(crate) async fn conn(&self) -> CoreResult<Connection<'_>> {
        self.db
            .connect()
            .await
            .map_err(|e| CoreError::Storage(e.to_string()))
    }
}

/// Postgres jsonb rejects the NUL (backslash-u0000) escape inside strings.
pub(crate) fn sanitize_json(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::String(s) => {
            if s.contains('\u{0}') {
                *s = s.replace('\u{0}', "");
            }
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(sanitize_json),
        serde_json::Value::Object(map) => map.values_mut().for_each(sanitize_json),
        _ => {}
    }
}

/// Explicitly typed alias for passing a pooled connection down into helpers.
pub(crate) type PgConn = AsyncPgConnection;
