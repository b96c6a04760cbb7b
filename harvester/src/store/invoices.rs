// Copyright (c) TX Society
// SPDX-License-Identifier: Apache-2.0

//! Invoice persistence and the payment settlement path.

use chrono::{Duration, Utc};
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use harvester_schema::models::{InvoiceNotificationRow, InvoiceRow};
use harvester_schema::schema::{accounts, invoice_notifications, invoices, keys, transactions};
use uuid::Uuid;

use crate::core::{
    AccountId, Bits256, Currency, Invoice, InvoiceId, InvoiceStatus, Payment,
};
use crate::error::{CoreError, CoreResult};
use crate::store::currencies::{currency_by_id, currency_id};
use crate::store::{sanitize_json, PgConn, Store};

/// Outbox rows survive this long without a successful delivery.
const NOTIFICATION_RETENTION_DAYS: i64 = 5;

impl Store {
    /// Persist a new invoice and its creation outbox row in one transaction.
    pub async fn create_invoice(&self, invoice: &Invoice) -> CoreResult<()> {
        let mut guard = self.conn().await?;
        let conn: &mut PgConn = &mut guard;
        conn.transaction::<_, CoreError, _>(|conn| {
            async move {
                let currency = currency_id(conn, invoice.currency).await?;
                let row = invoice_to_row(invoice, currency);
                diesel::insert_into(invoices::table)
                    .values(&row)
                    .execute(conn)
                    .await?;
                insert_outbox(conn, row.into()).await?;
                Ok(())
            }
            .scope_boxed()
        })
        .await
    }

    pub async fn get_invoice(&self, id: InvoiceId) -> CoreResult<Invoice> {
        let mut guard = self.conn().await?;
        let conn: &mut PgConn = &mut guard;
        let row: InvoiceRow = invoices::table
            .filter(invoices::id.eq(id))
            .first(conn)
            .await?;
        let currency = currency_by_id(conn, row.currency).await?;
        row_to_invoice(row, currency)
    }

    /// Cursor pagination over invoice ids; valid because ids are UUIDv7 and
    /// therefore time-ordered.
    pub async fn get_invoices(&self, after: InvoiceId, limit: i64) -> CoreResult<Vec<Invoice>> {
        let mut guard = self.conn().await?;
        let conn: &mut PgConn = &mut guard;
        let rows: Vec<InvoiceRow> = invoices::table
            .filter(invoices::id.gt(after))
            .order(invoices::id.asc())
            .limit(limit)
            .load(conn)
            .await?;
        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            let currency = currency_by_id(conn, row.currency).await?;
            result.push(row_to_invoice(row, currency)?);
        }
        Ok(result)
    }

    /// Cancel a waiting, unexpired invoice. Anything else is [CoreError::NotFound].
    pub async fn cancel_invoice(&self, id: InvoiceId) -> CoreResult<Invoice> {
        let mut guard = self.conn().await?;
        let conn: &mut PgConn = &mut guard;
        conn.transaction::<_, CoreError, _>(|conn| {
            async move {
                let now = Utc::now();
                let updated = diesel::update(
                    invoices::table
                        .filter(invoices::id.eq(id))
                        .filter(invoices::status.eq(InvoiceStatus::Waiting.as_str()))
                        .filter(invoices::expire_at.gt(now)),
                )
                .set((
                    invoices::status.eq(InvoiceStatus::Cancelled.as_str()),
                    invoices::updated_at.eq(now),
                ))
                .execute(conn)
                .await?;
                if updated == 0 {
                    return Err(CoreError::NotFound);
                }
                let row: InvoiceRow = invoices::table
                    .filter(invoices::id.eq(id))
                    .first(conn)
                    .await?;
                insert_outbox(conn, row.clone().into()).await?;
                let currency = currency_by_id(conn, row.currency).await?;
                row_to_invoice(row, currency)
            }
            .scope_boxed()
        })
        .await
    }

    /// Move every overdue waiting invoice to `expired`, emitting outbox rows
    /// in the same transaction. A second call after commit is a no-op.
    pub async fn mark_expired(&self) -> CoreResult<()> {
        let mut guard = self.conn().await?;
        let conn: &mut PgConn = &mut guard;
        conn.transaction::<_, CoreError, _>(|conn| {
            async move {
                let now = Utc::now();
                let expired: Vec<Uuid> = diesel::update(
                    invoices::table
                        .filter(invoices::status.eq(InvoiceStatus::Waiting.as_str()))
                        .filter(invoices::expire_at.lt(now)),
                )
                .set((
                    invoices::status.eq(InvoiceStatus::Expired.as_str()),
                    invoices::updated_at.eq(now),
                ))
                .returning(invoices::id)
                .get_results(conn)
                .await?;
                for id in expired {
                    let row: InvoiceRow = invoices::table
                        .filter(invoices::id.eq(id))
                        .first(conn)
                        .await?;
                    insert_outbox(conn, row.into()).await?;
                }
                Ok(())
            }
            .scope_boxed()
        })
        .await
    }

    /// Oldest undelivered outbox entries, in `updated_at` order.
    pub async fn get_invoice_notifications(&self, limit: i64) -> CoreResult<Vec<Invoice>> {
        let mut guard = self.conn().await?;
        let conn: &mut PgConn = &mut guard;
        let rows: Vec<InvoiceNotificationRow> = invoice_notifications::table
            .order(invoice_notifications::updated_at.asc())
            .limit(limit)
            .load(conn)
            .await?;
        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            let currency = currency_by_id(conn, row.currency).await?;
            result.push(row_to_invoice(notification_to_invoice_row(row), currency)?);
        }
        Ok(result)
    }

    pub async fn delete_invoice_notification(&self, id: InvoiceId) -> CoreResult<()> {
        let mut guard = self.conn().await?;
        let conn: &mut PgConn = &mut guard;
        diesel::delete(invoice_notifications::table.filter(invoice_notifications::id.eq(id)))
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Bounded surrender point for receivers that remain permanently broken.
    pub async fn delete_old_notifications(&self) -> CoreResult<()> {
        let mut guard = self.conn().await?;
        let conn: &mut PgConn = &mut guard;
        let cutoff = Utc::now() - Duration::days(NOTIFICATION_RETENTION_DAYS);
        diesel::delete(
            invoice_notifications::table.filter(invoice_notifications::updated_at.lt(cutoff)),
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Apply every payment extracted from the transaction at `tx_lt` and
    /// advance `last_processed_lt`, all inside one database transaction.
    ///
    /// A parsing error is recorded on the transaction row instead of applying
    /// payments; the cursor still advances, so one malformed transaction can
    /// never stall an account.
    pub async fn save_payments(
        &self,
        account: AccountId,
        tx_lt: u64,
        payments: &[Payment],
        parsing_error: Option<String>,
    ) -> CoreResult<()> {
        let mut guard = self.conn().await?;
        let conn: &mut PgConn = &mut guard;
        conn.transaction::<_, CoreError, _>(|conn| {
            async move {
                if let Some(error) = parsing_error {
                    diesel::update(
                        transactions::table
                            .filter(transactions::account_id.eq(account.to_raw()))
                            .filter(transactions::lt.eq(tx_lt as i64)),
                    )
                    .set(transactions::processing_error.eq(error))
                    .execute(conn)
                    .await?;
                } else {
                    for payment in payments {
                        if let Some(outbox) = process_payment(conn, payment).await? {
                            insert_outbox(conn, outbox).await?;
                        }
                    }
                }
                // last_processed_lt only ever increases
                diesel::update(
                    accounts::table
                        .filter(accounts::address.eq(account.to_raw()))
                        .filter(accounts::last_processed_lt.le(tx_lt as i64)),
                )
                .set(accounts::last_processed_lt.eq(tx_lt as i64))
                .execute(conn)
                .await?;
                Ok(())
            }
            .scope_boxed()
        })
        .await
    }
}

/// The settlement state machine for a single payment. Runs inside the
/// caller's transaction; returns the outbox snapshot when the invoice
/// transitions to `paid`.
async fn process_payment(
    conn: &mut PgConn,
    payment: &Payment,
) -> CoreResult<Option<InvoiceNotificationRow>> {
    let currency = match currency_id(conn, payment.currency).await {
        Ok(id) => id,
        // not a tracked currency, treat as noise
        Err(CoreError::NotFound) => return Ok(None),
        Err(err) => return Err(err),
    };

    let row: Option<InvoiceRow> = invoices::table
        .filter(invoices::currency.eq(currency))
        .filter(invoices::id.eq(payment.invoice_id))
        .filter(invoices::recipient.eq(payment.recipient.to_raw()))
        .for_update()
        .first(conn)
        .await
        .optional()?;
    let Some(row) = row else {
        return Ok(None);
    };

    // The payer completed a payment, so their pending encryption key becomes
    // visible.
    diesel::update(
        keys::table
            .filter(keys::address.eq(payment.paid_by.to_raw()))
            .filter(keys::accepted.eq(false)),
    )
    .set(keys::accepted.eq(true))
    .execute(conn)
    .await?;

    let now = Utc::now();
    let amount = parse_amount(&row.amount)?;
    let mut overpayment = parse_amount(&row.overpayment)?
        .checked_add(payment.amount)
        .ok_or_else(|| CoreError::CorruptStorage("overpayment overflow".into()))?;

    // Overpayment is always accumulated, even on settled or expired invoices,
    // so duplicate payments stay auditable.
    diesel::update(invoices::table.filter(invoices::id.eq(payment.invoice_id)))
        .set((
            invoices::overpayment.eq(overpayment.to_string()),
            invoices::updated_at.eq(now),
        ))
        .execute(conn)
        .await?;

    if row.status != InvoiceStatus::Waiting.as_str() || row.expire_at < now {
        return Ok(None);
    }
    if overpayment < amount {
        return Ok(None);
    }
    overpayment -= amount;

    diesel::update(invoices::table.filter(invoices::id.eq(payment.invoice_id)))
        .set((
            invoices::status.eq(InvoiceStatus::Paid.as_str()),
            invoices::updated_at.eq(now),
            invoices::paid_by.eq(payment.paid_by.to_raw()),
            invoices::overpayment.eq(overpayment.to_string()),
            invoices::paid_at.eq(now),
            invoices::tx_hash.eq(payment.tx_hash.as_slice().to_vec()),
        ))
        .execute(conn)
        .await?;

    Ok(Some(InvoiceNotificationRow {
        id: row.id,
        status: InvoiceStatus::Paid.as_str().to_string(),
        amount: row.amount,
        currency: row.currency,
        created_at: row.created_at,
        expire_at: row.expire_at,
        updated_at: now,
        private_info: row.private_info,
        metadata: row.metadata,
        overpayment: overpayment.to_string(),
        paid_at: Some(now),
        paid_by: Some(payment.paid_by.to_raw()),
        recipient: row.recipient,
        tx_hash: Some(payment.tx_hash.as_slice().to_vec()),
    }))
}

async fn insert_outbox(
    conn: &mut PgConn,
    row: InvoiceNotificationRow,
) -> Result<(), diesel::result::Error> {
    diesel::insert_into(invoice_notifications::table)
        .values(&row)
        .on_conflict(invoice_notifications::id)
        .do_update()
        .set(&row)
        .execute(conn)
        .await?;
    Ok(())
}

fn parse_amount(value: &str) -> CoreResult<u128> {
    value
        .parse::<u128>()
        .map_err(|_| CoreError::CorruptStorage(format!("invalid stored amount: {value}")))
}

fn invoice_to_row(invoice: &Invoice, currency: Uuid) -> InvoiceRow {
    let mut private_info = invoice.private_info.clone();
    sanitize_json(&mut private_info);
    let mut metadata = invoice.metadata.clone();
    sanitize_json(&mut metadata);
    InvoiceRow {
        id: invoice.id,
        status: invoice.status.as_str().to_string(),
        amount: invoice.amount.to_string(),
        currency,
        created_at: invoice.created_at,
        expire_at: invoice.expire_at,
        updated_at: invoice.updated_at,
        private_info,
        metadata,
        overpayment: invoice.overpayment.to_string(),
        paid_at: invoice.paid_at,
        paid_by: invoice.paid_by.map(|a| a.to_raw()),
        recipient: invoice.recipient.to_raw(),
        tx_hash: invoice.tx_hash.map(|h| h.as_slice().to_vec()),
    }
}

fn notification_to_invoice_row(row: InvoiceNotificationRow) -> InvoiceRow {
    InvoiceRow {
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

fn row_to_invoice(row: InvoiceRow, currency: Currency) -> CoreResult<Invoice> {
    let paid_by = row
        .paid_by
        .as_deref()
        .map(AccountId::from_raw)
        .transpose()
        .map_err(|e| CoreError::CorruptStorage(e.to_string()))?;
    let tx_hash = row
        .tx_hash
        .as_deref()
        .map(Bits256::from_slice)
        .transpose()
        .map_err(|e| CoreError::CorruptStorage(e.to_string()))?;
    Ok(Invoice {
        id: row.id,
        recipient: AccountId::from_raw(&row.recipient)
            .map_err(|e| CoreError::CorruptStorage(e.to_string()))?,
        status: row.status.parse()?,
        amount: parse_amount(&row.amount)?,
        overpayment: parse_amount(&row.overpayment)?,
        currency,
        created_at: row.created_at,
        expire_at: row.expire_at,
        updated_at: row.updated_at,
        private_info: row.private_info,
        metadata: row.metadata,
        paid_by,
        paid_at: row.paid_at,
        tx_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount_rejects_garbage() {
        assert_eq!(parse_amount("1000").unwrap(), 1000);
        assert!(parse_amount("-5").is_err());
        assert!(parse_amount("1.5").is_err());
        assert!(parse_amount("").is_err());
    }

    #[test]
    fn test_settlement_arithmetic() {
        // partial then top-up: 400 then 700 against an invoice of 1000
        let amount: u128 = 1000;
        let mut overpayment: u128 = 0;

        overpayment += 400;
        assert!(overpayment < amount, "not yet settled");

        overpayment += 700;
        assert!(overpayment >= amount);
        overpayment -= amount;
        assert_eq!(overpayment, 100, "residual stays stored for audit");
    }
}
