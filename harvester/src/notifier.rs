// Copyright (c) TX Society
// SPDX-License-Identifier: Apache-2.0

//! Notifier: drains the invoice outbox to the merchant webhook and
//! garbage-collects entries past the retention window.
//!
//! Delivery is at-least-once: a row is deleted only after the webhook call
//! succeeded, so a crash between send and delete redelivers. The receiver
//! deduplicates by invoice id and status.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::core::{
    convert_invoice_to_printable_private, Bits256, ExtendedCurrency, Invoice, InvoiceId,
    PrivateInvoice,
};
use crate::error::CoreResult;
use crate::indexer::storage_deadline;
use crate::store::Store;

const DRAIN_LIMIT: i64 = 10;
const DRAINED_DELAY: Duration = Duration::from_secs(2);
const STORAGE_ERROR_DELAY: Duration = Duration::from_secs(3);
const RETENTION_GC_INTERVAL: Duration = Duration::from_secs(30);

/// The slice of the store the notifier consumes.
#[async_trait]
pub trait NotifierStorage: Send + Sync + 'static {
    async fn get_invoice_notifications(&self, limit: i64) -> CoreResult<Vec<Invoice>>;
    async fn delete_invoice_notification(&self, id: InvoiceId) -> CoreResult<()>;
    async fn delete_old_notifications(&self) -> CoreResult<()>;
}

#[async_trait]
impl NotifierStorage for Store {
    async fn get_invoice_notifications(&self, limit: i64) -> CoreResult<Vec<Invoice>> {
        Store::get_invoice_notifications(self, limit).await
    }

    async fn delete_invoice_notification(&self, id: InvoiceId) -> CoreResult<()> {
        Store::delete_invoice_notification(self, id).await
    }

    async fn delete_old_notifications(&self) -> CoreResult<()> {
        Store::delete_old_notifications(self).await
    }
}

/// The outbound webhook transport.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, invoice: &PrivateInvoice) -> CoreResult<()>;
}

pub struct Notifier<S> {
    sender: Option<Arc<dyn Sender>>,
    currencies: HashMap<String, ExtendedCurrency>,
    adnl_address: Option<Bits256>,
    payment_prefixes: HashMap<String, String>,
    storage: Arc<S>,
}

impl<S: NotifierStorage> Notifier<S> {
    pub fn new(
        sender: Option<Arc<dyn Sender>>,
        currencies: HashMap<String, ExtendedCurrency>,
        adnl_address: Option<Bits256>,
        payment_prefixes: HashMap<String, String>,
        storage: Arc<S>,
    ) -> Self {
        Self {
            sender,
            currencies,
            adnl_address,
            payment_prefixes,
            storage,
        }
    }

    /// Spawn the retention GC and, when a webhook is configured, the outbox
    /// drain.
    pub fn run(self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let notifier = Arc::new(self);
        let mut handles = vec![tokio::spawn(
            notifier.clone().run_retention_gc(cancel.clone()),
        )];
        if notifier.sender.is_some() {
            handles.push(tokio::spawn(notifier.run_drain(cancel)));
        }
        handles
    }

    async fn run_drain(self: Arc<Self>, cancel: CancellationToken) {
        info!("[Notifier] started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let invoices = match storage_deadline(
                self.storage.get_invoice_notifications(DRAIN_LIMIT),
            )
            .await
            {
                Ok(invoices) => invoices,
                Err(e) => {
                    error!("[Notifier] get notifications: {e}");
                    if !sleep_or_cancel(&cancel, STORAGE_ERROR_DELAY).await {
                        break;
                    }
                    continue;
                }
            };
            let drained = invoices.len() as i64;
            if let Err(e) = self.notify(&invoices).await {
                error!("[Notifier] notify failed: {e}");
                if !sleep_or_cancel(&cancel, STORAGE_ERROR_DELAY).await {
                    break;
                }
                continue;
            }
            if drained < DRAIN_LIMIT && !sleep_or_cancel(&cancel, DRAINED_DELAY).await {
                break;
            }
        }
        info!("[Notifier] stopped");
    }

    /// Deliver a batch in outbox order. A failed send aborts the batch with
    /// the row kept, so it is redelivered on the next round.
    async fn notify(&self, invoices: &[Invoice]) -> CoreResult<()> {
        let sender = self.sender.as_ref().expect("drain runs only with a sender");
        for invoice in invoices {
            let printable = match convert_invoice_to_printable_private(
                &self.payment_prefixes,
                invoice,
                &self.currencies,
                self.adnl_address.as_ref(),
            ) {
                Ok(printable) => printable,
                Err(e) => {
                    // this invoice can never be rendered, skip it
                    error!(invoice = %invoice.id, "[Notifier] convert invoice: {e}");
                    continue;
                }
            };
            sender.send(&printable).await?;
            storage_deadline(self.storage.delete_invoice_notification(invoice.id)).await?;
        }
        Ok(())
    }

    async fn run_retention_gc(self: Arc<Self>, cancel: CancellationToken) {
        info!("[Notifier] retention gc started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(RETENTION_GC_INTERVAL) => {
                    if let Err(e) = storage_deadline(self.storage.delete_old_notifications()).await {
                        error!("[Notifier] delete old notifications: {e}");
                    }
                }
            }
        }
        info!("[Notifier] retention gc stopped");
    }
}

/// Cancellation-aware sleep; false when cancelled.
async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::Utc;

    use crate::core::{
        new_invoice_id, AccountId, Currency, InvoiceStatus, DEFAULT_PAYMENT_PREFIXES,
    };
    use crate::error::CoreError;

    struct MockStorage {
        outbox: Mutex<Vec<Invoice>>,
        deleted: Mutex<Vec<InvoiceId>>,
    }

    #[async_trait]
    impl NotifierStorage for MockStorage {
        async fn get_invoice_notifications(&self, limit: i64) -> CoreResult<Vec<Invoice>> {
            Ok(self
                .outbox
                .lock()
                .unwrap()
                .iter()
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn delete_invoice_notification(&self, id: InvoiceId) -> CoreResult<()> {
            self.outbox.lock().unwrap().retain(|inv| inv.id != id);
            self.deleted.lock().unwrap().push(id);
            Ok(())
        }

        async fn delete_old_notifications(&self) -> CoreResult<()> {
            Ok(())
        }
    }

    /// Fails the first `failures` sends, then succeeds.
    struct FlakySender {
        failures: Mutex<u32>,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Sender for FlakySender {
        async fn send(&self, invoice: &PrivateInvoice) -> CoreResult<()> {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(CoreError::Webhook("boom".into()));
            }
            self.sent
                .lock()
                .unwrap()
                .push(serde_json::to_string(invoice).unwrap());
            Ok(())
        }
    }

    fn paid_invoice() -> Invoice {
        let now = Utc::now();
        Invoice {
            id: new_invoice_id(),
            recipient: AccountId::new(0, [0x42; 32]),
            status: InvoiceStatus::Paid,
            amount: 1000,
            overpayment: 0,
            currency: Currency::Ton,
            created_at: now,
            expire_at: now + chrono::Duration::hours(1),
            updated_at: now,
            private_info: serde_json::json!({}),
            metadata: serde_json::json!({}),
            paid_by: Some(AccountId::new(0, [0x43; 32])),
            paid_at: Some(now),
            tx_hash: Some(Bits256([9; 32])),
        }
    }

    fn notifier_with(
        storage: Arc<MockStorage>,
        sender: Arc<FlakySender>,
    ) -> Notifier<MockStorage> {
        Notifier::new(
            Some(sender),
            HashMap::from([("TON".to_string(), ExtendedCurrency::ton())]),
            None,
            DEFAULT_PAYMENT_PREFIXES
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            storage,
        )
    }

    #[tokio::test]
    async fn test_delivered_rows_are_deleted() {
        let invoice = paid_invoice();
        let storage = Arc::new(MockStorage {
            outbox: Mutex::new(vec![invoice.clone()]),
            deleted: Mutex::new(vec![]),
        });
        let sender = Arc::new(FlakySender {
            failures: Mutex::new(0),
            sent: Mutex::new(vec![]),
        });
        let notifier = notifier_with(storage.clone(), sender.clone());

        let batch = storage.get_invoice_notifications(10).await.unwrap();
        notifier.notify(&batch).await.unwrap();

        assert_eq!(sender.sent.lock().unwrap().len(), 1);
        assert_eq!(storage.deleted.lock().unwrap().as_slice(), &[invoice.id]);
        assert!(storage.outbox.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_send_keeps_row_for_redelivery() {
        let invoice = paid_invoice();
        let storage = Arc::new(MockStorage {
            outbox: Mutex::new(vec![invoice.clone()]),
            deleted: Mutex::new(vec![]),
        });
        let sender = Arc::new(FlakySender {
            failures: Mutex::new(1),
            sent: Mutex::new(vec![]),
        });
        let notifier = notifier_with(storage.clone(), sender.clone());

        // first round: send fails, row stays
        let batch = storage.get_invoice_notifications(10).await.unwrap();
        assert!(notifier.notify(&batch).await.is_err());
        assert_eq!(storage.outbox.lock().unwrap().len(), 1);
        assert!(storage.deleted.lock().unwrap().is_empty());

        // second round: redelivered with the same body, row deleted
        let batch = storage.get_invoice_notifications(10).await.unwrap();
        notifier.notify(&batch).await.unwrap();
        assert_eq!(sender.sent.lock().unwrap().len(), 1);
        assert!(storage.outbox.lock().unwrap().is_empty());

        let body: serde_json::Value =
            serde_json::from_str(&sender.sent.lock().unwrap()[0]).unwrap();
        assert_eq!(body["status"], "paid");
        assert_eq!(body["id"], invoice.id.to_string());
    }

    #[tokio::test]
    async fn test_unrenderable_invoice_is_skipped() {
        // currency missing from the whitelist: conversion fails, row is
        // skipped without failing the batch
        let mut invoice = paid_invoice();
        invoice.currency = Currency::Extra(9);
        let good = paid_invoice();
        let storage = Arc::new(MockStorage {
            outbox: Mutex::new(vec![invoice, good.clone()]),
            deleted: Mutex::new(vec![]),
        });
        let sender = Arc::new(FlakySender {
            failures: Mutex::new(0),
            sent: Mutex::new(vec![]),
        });
        let notifier = notifier_with(storage.clone(), sender.clone());

        let batch = storage.get_invoice_notifications(10).await.unwrap();
        notifier.notify(&batch).await.unwrap();
        assert_eq!(sender.sent.lock().unwrap().len(), 1);
        assert_eq!(storage.deleted.lock().unwrap().as_slice(), &[good.id]);
    }
}
