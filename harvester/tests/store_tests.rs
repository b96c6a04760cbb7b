// Copyright (c) TX Society
// SPDX-License-Identifier: Apache-2.0

//! Store tests against a live Postgres.
//!
//! Requires the TEST_DATABASE_URL environment variable; run with
//! `cargo test -- --ignored --test-threads=1` (mark_expired operates on the
//! whole invoices table, so tests must not interleave).

use std::collections::HashMap;

use chrono::{Duration, Utc};
use harvester::core::{
    new_invoice_id, AccountId, Bits256, Currency, ExtendedCurrency, Invoice, InvoiceStatus,
    Message, Payment, Transaction, DEFAULT_TON_TICKER,
};
use harvester::error::CoreError;
use harvester::store::Store;
use harvester_pg_db::{Db, DbArgs};
use rand::RngCore;
use url::Url;

async fn test_store() -> Store {
    let database_url: Url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL environment variable must be set")
        .parse()
        .expect("invalid TEST_DATABASE_URL");
    let db = Db::new(database_url, DbArgs::default())
        .await
        .expect("connect to test database");
    db.run_migrations(harvester_schema::MIGRATIONS)
        .await
        .expect("run migrations");
    let store = Store::new(db, random_account());
    store
        .save_currencies(&ton_whitelist())
        .await
        .expect("save currencies");
    store
}

fn ton_whitelist() -> HashMap<String, ExtendedCurrency> {
    HashMap::from([(DEFAULT_TON_TICKER.to_string(), ExtendedCurrency::ton())])
}

fn random_account() -> AccountId {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    AccountId::new(0, bytes)
}

fn random_hash() -> Bits256 {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    Bits256(bytes)
}

fn waiting_invoice(recipient: AccountId, amount: u128, lifetime: Duration) -> Invoice {
    let now = Utc::now();
    Invoice {
        id: new_invoice_id(),
        recipient,
        status: InvoiceStatus::Waiting,
        amount,
        overpayment: 0,
        currency: Currency::Ton,
        created_at: now,
        expire_at: now + lifetime,
        updated_at: now,
        private_info: serde_json::json!({}),
        metadata: serde_json::json!({"merchant_name": "Arrakis Traders"}),
        paid_by: None,
        paid_at: None,
        tx_hash: None,
    }
}

fn payment(invoice: &Invoice, from: AccountId, amount: u128) -> Payment {
    Payment {
        invoice_id: invoice.id,
        currency: Currency::Ton,
        amount,
        paid_by: from,
        recipient: invoice.recipient,
        tx_hash: random_hash(),
    }
}

fn simple_tx(lt: u64, prev_lt: u64) -> Transaction {
    let mut hash = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut hash[8..]);
    hash[..8].copy_from_slice(&lt.to_be_bytes());
    let mut prev_hash = [0u8; 32];
    prev_hash[..8].copy_from_slice(&prev_lt.to_be_bytes());
    Transaction {
        lt,
        hash: Bits256(hash),
        prev_tx_lt: prev_lt,
        prev_tx_hash: Bits256(prev_hash),
        utime: 1_700_000_000,
        success: true,
        in_message: Message::internal(random_account(), random_account(), 1),
        out_messages: vec![],
    }
}

#[tokio::test]
#[ignore] // Requires TEST_DATABASE_URL
async fn test_full_payment_settles_invoice() {
    let store = test_store().await;
    let recipient = store.recipient();
    let invoice = waiting_invoice(recipient, 1000, Duration::hours(1));
    store.create_invoice(&invoice).await.unwrap();

    let payer = random_account();
    store
        .save_payments(recipient, 100, &[payment(&invoice, payer, 1000)], None)
        .await
        .unwrap();

    let settled = store.get_invoice(invoice.id).await.unwrap();
    assert_eq!(settled.status, InvoiceStatus::Paid);
    assert_eq!(settled.overpayment, 0);
    assert_eq!(settled.paid_by, Some(payer));
    assert!(settled.paid_at.is_some());
    assert!(settled.tx_hash.is_some());

    // the paid snapshot is in the outbox
    let notifications = store.get_invoice_notifications(100).await.unwrap();
    let row = notifications
        .iter()
        .find(|inv| inv.id == invoice.id)
        .expect("outbox row for the settled invoice");
    assert_eq!(row.status, InvoiceStatus::Paid);
    store.delete_invoice_notification(invoice.id).await.unwrap();
}

#[tokio::test]
#[ignore] // Requires TEST_DATABASE_URL
async fn test_partial_then_topup() {
    let store = test_store().await;
    let recipient = store.recipient();
    let invoice = waiting_invoice(recipient, 1000, Duration::hours(1));
    store.create_invoice(&invoice).await.unwrap();
    let payer = random_account();

    store
        .save_payments(recipient, 100, &[payment(&invoice, payer, 400)], None)
        .await
        .unwrap();
    let partial = store.get_invoice(invoice.id).await.unwrap();
    assert_eq!(partial.status, InvoiceStatus::Waiting);
    assert_eq!(partial.overpayment, 400);

    store
        .save_payments(recipient, 110, &[payment(&invoice, payer, 700)], None)
        .await
        .unwrap();
    let settled = store.get_invoice(invoice.id).await.unwrap();
    assert_eq!(settled.status, InvoiceStatus::Paid);
    assert_eq!(settled.overpayment, 100, "residual kept for audit");
    store.delete_invoice_notification(invoice.id).await.unwrap();
}

#[tokio::test]
#[ignore] // Requires TEST_DATABASE_URL
async fn test_late_payment_after_expiry() {
    let store = test_store().await;
    let recipient = store.recipient();
    let invoice = waiting_invoice(recipient, 1000, Duration::seconds(-1));
    store.create_invoice(&invoice).await.unwrap();

    store.mark_expired().await.unwrap();
    let expired = store.get_invoice(invoice.id).await.unwrap();
    assert_eq!(expired.status, InvoiceStatus::Expired);

    store
        .save_payments(
            recipient,
            100,
            &[payment(&invoice, random_account(), 1000)],
            None,
        )
        .await
        .unwrap();
    let after = store.get_invoice(invoice.id).await.unwrap();
    assert_eq!(after.status, InvoiceStatus::Expired, "no late settlement");
    assert_eq!(after.overpayment, 1000, "late payment still accumulated");

    // outbox carries the expiration, never a paid transition
    let notifications = store.get_invoice_notifications(100).await.unwrap();
    let row = notifications.iter().find(|inv| inv.id == invoice.id).unwrap();
    assert_eq!(row.status, InvoiceStatus::Expired);
    store.delete_invoice_notification(invoice.id).await.unwrap();
}

#[tokio::test]
#[ignore] // Requires TEST_DATABASE_URL
async fn test_mark_expired_is_idempotent() {
    let store = test_store().await;
    let invoice = waiting_invoice(store.recipient(), 10, Duration::seconds(-1));
    store.create_invoice(&invoice).await.unwrap();

    store.mark_expired().await.unwrap();
    let first = store.get_invoice(invoice.id).await.unwrap();
    store.mark_expired().await.unwrap();
    let second = store.get_invoice(invoice.id).await.unwrap();
    assert_eq!(first.updated_at, second.updated_at, "second pass is a no-op");
    store.delete_invoice_notification(invoice.id).await.unwrap();
}

#[tokio::test]
#[ignore] // Requires TEST_DATABASE_URL
async fn test_cancel_only_waiting_unexpired() {
    let store = test_store().await;
    let invoice = waiting_invoice(store.recipient(), 10, Duration::hours(1));
    store.create_invoice(&invoice).await.unwrap();

    let cancelled = store.cancel_invoice(invoice.id).await.unwrap();
    assert_eq!(cancelled.status, InvoiceStatus::Cancelled);

    // terminal states never change again
    assert!(matches!(
        store.cancel_invoice(invoice.id).await,
        Err(CoreError::NotFound)
    ));

    let expired = waiting_invoice(store.recipient(), 10, Duration::seconds(-1));
    store.create_invoice(&expired).await.unwrap();
    assert!(matches!(
        store.cancel_invoice(expired.id).await,
        Err(CoreError::NotFound)
    ));

    store.delete_invoice_notification(invoice.id).await.unwrap();
    store.delete_invoice_notification(expired.id).await.unwrap();
}

#[tokio::test]
#[ignore] // Requires TEST_DATABASE_URL
async fn test_key_accepted_on_first_payment() {
    let store = test_store().await;
    let recipient = store.recipient();
    let payer = random_account();

    store
        .save_encryption_key(payer, vec![0x42; 32])
        .await
        .unwrap();
    // invisible until the address completes a payment
    assert!(matches!(
        store.get_encryption_key(payer).await,
        Err(CoreError::NotFound)
    ));

    let invoice = waiting_invoice(recipient, 100, Duration::hours(1));
    store.create_invoice(&invoice).await.unwrap();
    store
        .save_payments(recipient, 100, &[payment(&invoice, payer, 100)], None)
        .await
        .unwrap();

    assert_eq!(store.get_encryption_key(payer).await.unwrap(), vec![0x42; 32]);
    store.delete_invoice_notification(invoice.id).await.unwrap();
}

#[tokio::test]
#[ignore] // Requires TEST_DATABASE_URL
async fn test_transaction_chain_and_gaps() {
    let store = test_store().await;
    let account = random_account();

    // chain of three: 100 -> 90 -> 70, with the parent of 70 unknown
    let tx70 = simple_tx(70, 60);
    let mut tx90 = simple_tx(90, 70);
    tx90.prev_tx_hash = tx70.hash;
    let mut tx100 = simple_tx(100, 90);
    tx100.prev_tx_hash = tx90.hash;

    store
        .save_transactions(account, &[tx100.clone(), tx90.clone(), tx70.clone()])
        .await
        .unwrap();
    // replay is a no-op
    store
        .save_transactions(account, &[tx90.clone()])
        .await
        .unwrap();

    let (gaps, last_lt) = store.get_gaps(account).await.unwrap();
    assert_eq!(last_lt, 100);
    assert_eq!(gaps.len(), 1);
    assert_eq!(gaps[0].start_lt, 60);
    assert_eq!(gaps[0].end_lt, 0);
    assert_eq!(gaps[0].start_hash, tx70.prev_tx_hash);

    let child = store
        .get_transaction_by_parent_lt(account, 90)
        .await
        .unwrap();
    assert_eq!(child.hash, tx100.hash);
    assert_eq!(child.lt, 100);

    assert!(matches!(
        store.get_transaction_by_parent_lt(account, 100).await,
        Err(CoreError::NotFound)
    ));
}

#[tokio::test]
#[ignore] // Requires TEST_DATABASE_URL
async fn test_parsing_error_still_advances_cursor() {
    let store = test_store().await;
    let account = random_account();
    let tx = simple_tx(500, 490);
    store.save_transactions(account, &[tx]).await.unwrap();

    store
        .save_payments(account, 500, &[], Some("invalid amount".to_string()))
        .await
        .unwrap();
    // no invoice was touched and the call is repeatable
    store
        .save_payments(account, 500, &[], Some("invalid amount".to_string()))
        .await
        .unwrap();
}

#[tokio::test]
#[ignore] // Requires TEST_DATABASE_URL
async fn test_invoice_history_pagination() {
    let store = test_store().await;
    let recipient = store.recipient();
    let mut ids = Vec::new();
    for _ in 0..3 {
        let invoice = waiting_invoice(recipient, 10, Duration::hours(1));
        store.create_invoice(&invoice).await.unwrap();
        ids.push(invoice.id);
    }

    let first_page = store.get_invoices(uuid::Uuid::nil(), 2).await.unwrap();
    assert!(first_page.len() >= 2);
    // ids ascend, so pages are stable under the UUIDv7 cursor
    let cursor = first_page.last().unwrap().id;
    for window in first_page.windows(2) {
        assert!(window[0].id < window[1].id);
    }
    let second_page = store.get_invoices(cursor, 100).await.unwrap();
    assert!(second_page.iter().all(|inv| inv.id > cursor));

    for id in ids {
        store.delete_invoice_notification(id).await.unwrap();
    }
}
