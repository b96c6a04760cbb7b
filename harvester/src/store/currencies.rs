// Copyright (c) TX Society
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use harvester_schema::schema::currencies;
use uuid::Uuid;

use crate::core::{Currency, ExtendedCurrency};
use crate::error::CoreResult;
use crate::store::{PgConn, Store};

impl Store {
    /// Register every whitelisted currency, idempotently.
    pub async fn save_currencies(
        &self,
        whitelist: &HashMap<String, ExtendedCurrency>,
    ) -> CoreResult<()> {
        let mut guard = self.conn().await?;
        let conn: &mut PgConn = &mut guard;
        for extended in whitelist.values() {
            let currency = extended.currency;
            diesel::insert_into(currencies::table)
                .values((
                    currencies::type_.eq(currency.kind()),
                    currencies::info.eq(currency.info()),
                ))
                .on_conflict_do_nothing()
                .execute(conn)
                .await?;
        }
        Ok(())
    }
}

/// Resolve the currency row id; [CoreError::NotFound] for untracked currencies.
pub(crate) async fn currency_id(conn: &mut PgConn, currency: Currency) -> CoreResult<Uuid> {
    let id = currencies::table
        .filter(currencies::type_.eq(currency.kind()))
        .filter(currencies::info.eq(currency.info()))
        .select(currencies::id)
        .first::<Uuid>(conn)
        .await?;
    Ok(id)
}

pub(crate) async fn currency_by_id(conn: &mut PgConn, id: Uuid) -> CoreResult<Currency> {
    let (kind, info) = currencies::table
        .filter(currencies::id.eq(id))
        .select((currencies::type_, currencies::info))
        .first::<(String, String)>(conn)
        .await?;
    Currency::from_parts(&kind, &info)
}
