// Copyright (c) TX Society
// SPDX-License-Identifier: Apache-2.0

use chrono::{Duration, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use harvester_schema::models::KeyRow;
use harvester_schema::schema::keys;

use crate::core::AccountId;
use crate::error::CoreResult;
use crate::store::{PgConn, Store};

/// Keys that were never accepted are dropped after this long.
const UNACCEPTED_KEY_TTL_HOURS: i64 = 1;

impl Store {
    /// Record a committed encryption key in the unaccepted state. The first
    /// payment completed by the address promotes it.
    pub async fn save_encryption_key(
        &self,
        account: AccountId,
        encryption_key: Vec<u8>,
    ) -> CoreResult<()> {
        let mut guard = self.conn().await?;
        let conn: &mut PgConn = &mut guard;
        diesel::insert_into(keys::table)
            .values(&KeyRow {
                address: account.to_raw(),
                encryption_key,
                accepted: false,
                created_at: Utc::now(),
            })
            .on_conflict_do_nothing()
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Only accepted keys are visible; [crate::error::CoreError::NotFound]
    /// until the address pays an invoice.
    pub async fn get_encryption_key(&self, account: AccountId) -> CoreResult<Vec<u8>> {
        let mut guard = self.conn().await?;
        let conn: &mut PgConn = &mut guard;
        let key = keys::table
            .filter(keys::address.eq(account.to_raw()))
            .filter(keys::accepted.eq(true))
            .select(keys::encryption_key)
            .first::<Vec<u8>>(conn)
            .await?;
        Ok(key)
    }

    pub async fn delete_expired_keys(&self) -> CoreResult<()> {
        let mut guard = self.conn().await?;
        let conn: &mut PgConn = &mut guard;
        let cutoff = Utc::now() - Duration::hours(UNACCEPTED_KEY_TTL_HOURS);
        diesel::delete(
            keys::table
                .filter(keys::created_at.lt(cutoff))
                .filter(keys::accepted.eq(false)),
        )
        .execute(conn)
        .await?;
        Ok(())
    }
}
