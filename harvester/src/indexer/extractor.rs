// Copyright (c) TX Society
// SPDX-License-Identifier: Apache-2.0

//! Payment extractor: walks loaded transactions in LT order, decodes payment
//! intent and hands the result to the store.
//!
//! The cursor only advances after `save_payments` commits, so every
//! transaction is applied exactly once: retries converge because saved
//! transactions are idempotent by hash and a transaction at or below
//! `last_processed_lt` is never re-examined.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::core::{
    invoice_id_from_bytes, parse_invoice_id, Account, Currency, InvoiceId, MsgType, Payment,
    Transaction, INVOICE_PAYLOAD_OP, JETTON_NOTIFY_OP, TEXT_COMMENT_OP,
};
use crate::error::{CoreError, CoreResult};
use crate::indexer::{storage_deadline, IndexerStorage};

const IDLE_DELAY: Duration = Duration::from_secs(5);

pub struct ExtractorWorker<S> {
    account: Account,
    storage: Arc<S>,
    last_indexed: u64,
}

enum Step {
    Advanced,
    Idle,
}

impl<S: IndexerStorage> ExtractorWorker<S> {
    pub async fn new(storage: Arc<S>, account: Account) -> CoreResult<Self> {
        let last_indexed = storage_deadline(storage.last_processed_lt(account.id)).await?;
        Ok(Self {
            account,
            storage,
            last_indexed,
        })
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            match self.step().await {
                Step::Advanced => {}
                Step::Idle => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(IDLE_DELAY) => {}
                    }
                }
            }
        }
        info!(account = %self.account.id.to_raw(), "[Extractor] stopped");
    }

    /// One walk step: fetch the child of the cursor, extract, persist.
    /// The cursor does not move unless the store commit succeeded.
    async fn step(&mut self) -> Step {
        let tx = match storage_deadline(
            self.storage
                .get_transaction_by_parent_lt(self.account.id, self.last_indexed),
        )
        .await
        {
            Ok(tx) => tx,
            Err(e) => {
                if !e.is_not_found() {
                    error!(account = %self.account.id.to_raw(), "[Extractor] getting tx: {e}");
                }
                return Step::Idle;
            }
        };

        let extracted = if self.account.info.jetton.is_some() {
            extract_jetton_payments(&tx, &self.account)
        } else {
            extract_native_payments(&tx, &self.account)
        };
        let (payments, parsing_error) = match extracted {
            Ok(payments) => (payments, None),
            Err(e) => (vec![], Some(e.to_string())),
        };

        if let Err(e) = storage_deadline(self.storage.save_payments(
            self.account.id,
            tx.lt,
            &payments,
            parsing_error,
        ))
        .await
        {
            error!(account = %self.account.id.to_raw(), "[Extractor] saving payments: {e}");
            return Step::Idle;
        }
        self.last_indexed = tx.lt;
        Step::Advanced
    }
}

/// Typed access into a decoded message body.
fn lookup<'a>(body: &'a serde_json::Value, key: &str) -> CoreResult<&'a serde_json::Value> {
    body.get(key)
        .ok_or_else(|| CoreError::MessageParse(format!("no {key} found")))
}

fn lookup_str<'a>(body: &'a serde_json::Value, key: &str) -> CoreResult<&'a str> {
    lookup(body, key)?
        .as_str()
        .ok_or_else(|| CoreError::MessageParse(format!("invalid type {key}")))
}

/// Extract payments from a transaction on the recipient's native account.
///
/// Gated by success, an internal in-message and a known payment operation.
/// A message that fails the invoice-id check is dropped silently; a message
/// whose shape claims to be a payment but is malformed is a parsing error.
pub fn extract_native_payments(tx: &Transaction, account: &Account) -> CoreResult<Vec<Payment>> {
    if !tx.success {
        return Ok(vec![]);
    }
    let msg = &tx.in_message;
    if msg.msg_type != MsgType::Int {
        return Ok(vec![]);
    }

    let invoice_id = match msg.decoded_operation.as_str() {
        INVOICE_PAYLOAD_OP => {
            let id_hex = lookup_str(&msg.decoded_body, "Id")?;
            let id_bytes = hex::decode(id_hex)
                .map_err(|e| CoreError::MessageParse(format!("invalid id: {e}")))?;
            match invoice_id_from_bytes(&id_bytes) {
                Ok(id) => id,
                Err(_) => return Ok(vec![]),
            }
        }
        TEXT_COMMENT_OP => {
            let text = lookup_str(&msg.decoded_body, "Text")?;
            match parse_invoice_id(text.trim()) {
                Ok(id) => id,
                Err(_) => return Ok(vec![]),
            }
        }
        _ => return Ok(vec![]),
    };

    let paid_by = msg
        .source
        .ok_or_else(|| CoreError::MessageParse("missing message source".into()))?;

    let mut payments = vec![Payment {
        invoice_id,
        paid_by,
        amount: msg.value as u128,
        tx_hash: tx.hash,
        currency: Currency::Ton,
        recipient: account.id,
    }];
    for (&extra_id, &amount) in &msg.extra_currencies {
        if amount == 0 {
            continue;
        }
        payments.push(Payment {
            invoice_id,
            paid_by,
            amount,
            tx_hash: tx.hash,
            currency: Currency::Extra(extra_id),
            recipient: account.id,
        });
    }
    Ok(payments)
}

/// Extract a payment from a transaction on a jetton-wallet account.
///
/// The first out-message decoded as a jetton notification is the payment.
/// Shape violations on that path are parsing errors; the absence of any
/// notification is not.
pub fn extract_jetton_payments(tx: &Transaction, account: &Account) -> CoreResult<Vec<Payment>> {
    if !tx.success {
        return Ok(vec![]);
    }
    if tx.in_message.msg_type != MsgType::Int {
        return Ok(vec![]);
    }
    let Some(jetton) = account.info.jetton else {
        return Ok(vec![]);
    };

    for out_msg in &tx.out_messages {
        if out_msg.decoded_operation != JETTON_NOTIFY_OP {
            continue;
        }
        let body = &out_msg.decoded_body;

        let amount = lookup_str(body, "Amount")?
            .parse::<u128>()
            .map_err(|_| CoreError::MessageParse("invalid amount".into()))?;
        let paid_by = lookup_str(body, "Sender")?
            .parse()
            .map_err(|_| CoreError::MessageParse("invalid sender".into()))?;

        let destination = out_msg
            .destination
            .ok_or_else(|| CoreError::MessageParse("empty destination from jetton notify".into()))?;
        if destination != account.info.recipient {
            return Err(CoreError::MessageParse(
                "invalid destination from jetton notify".into(),
            ));
        }

        let Some(invoice_id) = forward_payload_invoice_id(body)? else {
            return Ok(vec![]);
        };

        return Ok(vec![Payment {
            invoice_id,
            amount,
            currency: Currency::Jetton(jetton),
            paid_by,
            recipient: account.info.recipient,
            tx_hash: tx.hash,
        }]);
    }
    Ok(vec![])
}

/// Read the invoice id out of the notification's nested forward payload.
/// `Ok(None)` means the payload carries no (valid) invoice id.
fn forward_payload_invoice_id(body: &serde_json::Value) -> CoreResult<Option<InvoiceId>> {
    let Ok(forward) = lookup(body, "ForwardPayload") else {
        return Ok(None);
    };
    let Ok(value) = lookup(forward, "Value") else {
        return Ok(None);
    };
    match lookup_str(value, "SumType").unwrap_or_default() {
        "InvoicePayloadJetton" => {
            let payload = lookup(value, "Value")?;
            let id_hex = lookup_str(payload, "Id")?;
            let id_bytes = hex::decode(id_hex)
                .map_err(|e| CoreError::MessageParse(format!("invalid id: {e}")))?;
            Ok(invoice_id_from_bytes(&id_bytes).ok())
        }
        "TextCommentJetton" => {
            let payload = lookup(value, "Value")?;
            let text = lookup_str(payload, "Text")?;
            Ok(parse_invoice_id(text.trim()).ok())
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::core::{new_invoice_id, AccountId, AccountInfo, Bits256, Message};

    fn recipient() -> AccountId {
        AccountId::new(0, [0xAA; 32])
    }

    fn payer() -> AccountId {
        AccountId::new(0, [0xBB; 32])
    }

    fn native_account() -> Account {
        Account {
            id: recipient(),
            info: AccountInfo {
                max_depth_lt: 0,
                recipient: recipient(),
                jetton: None,
            },
        }
    }

    fn jetton_account() -> Account {
        Account {
            id: AccountId::new(0, [0xCC; 32]),
            info: AccountInfo {
                max_depth_lt: 0,
                recipient: recipient(),
                jetton: Some(AccountId::new(0, [0xDD; 32])),
            },
        }
    }

    fn native_tx(operation: &str, body: serde_json::Value, value: u64) -> Transaction {
        let mut in_message = Message::internal(payer(), recipient(), value);
        in_message.decoded_operation = operation.to_string();
        in_message.decoded_body = body;
        Transaction {
            lt: 100,
            hash: Bits256([0x01; 32]),
            prev_tx_lt: 90,
            prev_tx_hash: Bits256([0x02; 32]),
            utime: 1_700_000_000,
            success: true,
            in_message,
            out_messages: vec![],
        }
    }

    fn jetton_notify_tx(body: serde_json::Value, destination: AccountId) -> Transaction {
        let mut notify = Message::internal(jetton_account().id, destination, 1);
        notify.decoded_operation = JETTON_NOTIFY_OP.to_string();
        notify.decoded_body = body;
        Transaction {
            lt: 200,
            hash: Bits256([0x03; 32]),
            prev_tx_lt: 190,
            prev_tx_hash: Bits256([0x04; 32]),
            utime: 1_700_000_000,
            success: true,
            in_message: Message::internal(payer(), jetton_account().id, 1),
            out_messages: vec![notify],
        }
    }

    #[test]
    fn test_native_invoice_payload_payment() {
        let id = new_invoice_id();
        let tx = native_tx(
            INVOICE_PAYLOAD_OP,
            serde_json::json!({"Id": hex::encode(id.as_bytes())}),
            1000,
        );
        let payments = extract_native_payments(&tx, &native_account()).unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].invoice_id, id);
        assert_eq!(payments[0].amount, 1000);
        assert_eq!(payments[0].currency, Currency::Ton);
        assert_eq!(payments[0].paid_by, payer());
        assert_eq!(payments[0].recipient, recipient());
        assert_eq!(payments[0].tx_hash, tx.hash);
    }

    #[test]
    fn test_native_text_comment_payment() {
        let id = new_invoice_id();
        let tx = native_tx(
            TEXT_COMMENT_OP,
            serde_json::json!({"Text": format!(" {id} ")}),
            500,
        );
        let payments = extract_native_payments(&tx, &native_account()).unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].invoice_id, id);
    }

    #[test]
    fn test_native_extra_currencies_fan_out() {
        let id = new_invoice_id();
        let mut tx = native_tx(
            INVOICE_PAYLOAD_OP,
            serde_json::json!({"Id": hex::encode(id.as_bytes())}),
            1000,
        );
        tx.in_message.extra_currencies = BTreeMap::from([(1, 77u128), (2, 0u128), (3, 12u128)]);
        let payments = extract_native_payments(&tx, &native_account()).unwrap();
        // native plus each nonzero extra entry
        assert_eq!(payments.len(), 3);
        assert_eq!(payments[1].currency, Currency::Extra(1));
        assert_eq!(payments[1].amount, 77);
        assert_eq!(payments[2].currency, Currency::Extra(3));
        assert_eq!(payments[2].amount, 12);
    }

    #[test]
    fn test_native_non_payment_is_silent() {
        // unrelated operation
        let tx = native_tx("Excess", serde_json::json!({}), 10);
        assert!(extract_native_payments(&tx, &native_account())
            .unwrap()
            .is_empty());

        // failed transaction
        let mut tx = native_tx(INVOICE_PAYLOAD_OP, serde_json::json!({"Id": "00"}), 10);
        tx.success = false;
        assert!(extract_native_payments(&tx, &native_account())
            .unwrap()
            .is_empty());

        // external in-message
        let mut tx = native_tx(INVOICE_PAYLOAD_OP, serde_json::json!({"Id": "00"}), 10);
        tx.in_message.msg_type = MsgType::ExtIn;
        assert!(extract_native_payments(&tx, &native_account())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_native_bad_invoice_id_is_silent() {
        // wrong uuid version inside a well-formed payload
        let v4 = uuid::Uuid::new_v4();
        let tx = native_tx(
            INVOICE_PAYLOAD_OP,
            serde_json::json!({"Id": hex::encode(v4.as_bytes())}),
            10,
        );
        assert!(extract_native_payments(&tx, &native_account())
            .unwrap()
            .is_empty());

        // unparseable comment text
        let tx = native_tx(TEXT_COMMENT_OP, serde_json::json!({"Text": "thanks!"}), 10);
        assert!(extract_native_payments(&tx, &native_account())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_native_malformed_body_is_parse_error() {
        // payment-shaped operation with a missing Id field
        let tx = native_tx(INVOICE_PAYLOAD_OP, serde_json::json!({}), 10);
        let err = extract_native_payments(&tx, &native_account()).unwrap_err();
        assert!(matches!(err, CoreError::MessageParse(_)));

        // Id present but not hex
        let tx = native_tx(INVOICE_PAYLOAD_OP, serde_json::json!({"Id": "zz"}), 10);
        assert!(extract_native_payments(&tx, &native_account()).is_err());
    }

    fn notify_body(id: &InvoiceId, amount: &str) -> serde_json::Value {
        serde_json::json!({
            "Amount": amount,
            "Sender": payer().to_raw(),
            "ForwardPayload": {
                "Value": {
                    "SumType": "InvoicePayloadJetton",
                    "Value": {"Id": hex::encode(id.as_bytes())},
                }
            }
        })
    }

    #[test]
    fn test_jetton_notify_payment() {
        let id = new_invoice_id();
        let account = jetton_account();
        let tx = jetton_notify_tx(notify_body(&id, "500"), recipient());
        let payments = extract_jetton_payments(&tx, &account).unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].invoice_id, id);
        assert_eq!(payments[0].amount, 500);
        assert_eq!(
            payments[0].currency,
            Currency::Jetton(account.info.jetton.unwrap())
        );
        assert_eq!(payments[0].paid_by, payer());
        assert_eq!(payments[0].recipient, recipient());
    }

    #[test]
    fn test_jetton_text_comment_payload() {
        let id = new_invoice_id();
        let body = serde_json::json!({
            "Amount": "42",
            "Sender": payer().to_raw(),
            "ForwardPayload": {
                "Value": {
                    "SumType": "TextCommentJetton",
                    "Value": {"Text": id.to_string()},
                }
            }
        });
        let payments =
            extract_jetton_payments(&jetton_notify_tx(body, recipient()), &jetton_account())
                .unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].invoice_id, id);
        assert_eq!(payments[0].amount, 42);
    }

    #[test]
    fn test_jetton_wrong_destination_is_parse_error() {
        let id = new_invoice_id();
        let elsewhere = AccountId::new(0, [0x55; 32]);
        let tx = jetton_notify_tx(notify_body(&id, "500"), elsewhere);
        let err = extract_jetton_payments(&tx, &jetton_account()).unwrap_err();
        assert!(matches!(err, CoreError::MessageParse(_)));
    }

    #[test]
    fn test_jetton_bad_amount_is_parse_error() {
        let id = new_invoice_id();
        let tx = jetton_notify_tx(notify_body(&id, "lots"), recipient());
        assert!(extract_jetton_payments(&tx, &jetton_account()).is_err());
    }

    #[test]
    fn test_jetton_no_notification_is_silent() {
        let mut tx = jetton_notify_tx(serde_json::json!({}), recipient());
        tx.out_messages[0].decoded_operation = "JettonBurn".to_string();
        assert!(extract_jetton_payments(&tx, &jetton_account())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_jetton_missing_forward_payload_is_silent() {
        let body = serde_json::json!({
            "Amount": "500",
            "Sender": payer().to_raw(),
        });
        let tx = jetton_notify_tx(body, recipient());
        assert!(extract_jetton_payments(&tx, &jetton_account())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_jetton_malformed_payload_is_parse_error() {
        let body = serde_json::json!({
            "Amount": "500",
            "Sender": payer().to_raw(),
            "ForwardPayload": {
                "Value": {
                    "SumType": "InvoicePayloadJetton",
                    "Value": {},
                }
            }
        });
        let tx = jetton_notify_tx(body, recipient());
        assert!(extract_jetton_payments(&tx, &jetton_account()).is_err());
    }
}
