// Copyright (c) TX Society
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::{AccountId, Bits256};

/// Decoded operation carried by an invoice payment message.
pub const INVOICE_PAYLOAD_OP: &str = "InvoicePayload";
/// Decoded operation of a plain text comment.
pub const TEXT_COMMENT_OP: &str = "TextComment";
/// Decoded operation of a jetton transfer notification.
pub const JETTON_NOTIFY_OP: &str = "JettonNotify";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountInfo {
    /// The earliest logical time the crawler may go back to; transactions with
    /// `lt <= max_depth_lt` are invisible.
    pub max_depth_lt: u64,
    pub recipient: AccountId,
    /// Set iff this is a jetton wallet observed on behalf of the recipient.
    pub jetton: Option<AccountId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    pub info: AccountInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxId {
    pub lt: u64,
    pub hash: Bits256,
}

/// A contiguous range of missing history: `start_hash`/`start_lt` identify the
/// unknown parent of the earliest stored transaction, `end_lt` the highest
/// stored LT strictly below it (0 if none).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxGap {
    pub start_lt: u64,
    pub end_lt: u64,
    pub start_hash: Bits256,
}

/// Transactions of one account form a singly linked list backwards through
/// `(prev_tx_lt, prev_tx_hash)`; `prev_tx_lt == 0` at genesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub lt: u64,
    pub hash: Bits256,
    pub prev_tx_lt: u64,
    pub prev_tx_hash: Bits256,
    pub utime: u32,
    pub success: bool,
    pub in_message: Message,
    #[serde(default)]
    pub out_messages: Vec<Message>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MsgType {
    Int,
    ExtIn,
    ExtOut,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub msg_type: MsgType,
    #[serde(default)]
    pub source: Option<AccountId>,
    #[serde(default)]
    pub destination: Option<AccountId>,
    /// Value in the smallest native units.
    #[serde(default)]
    pub value: u64,
    /// Extra-currency id to amount, only nonzero entries.
    #[serde(default, with = "extra_currencies_serde")]
    pub extra_currencies: BTreeMap<u32, u128>,
    /// Operation name produced by the message decoder; empty when undecoded.
    #[serde(default)]
    pub decoded_operation: String,
    /// Free-form decoded body keyed by field name.
    #[serde(default)]
    pub decoded_body: serde_json::Value,
}

impl Message {
    pub fn internal(source: AccountId, destination: AccountId, value: u64) -> Self {
        Self {
            msg_type: MsgType::Int,
            source: Some(source),
            destination: Some(destination),
            value,
            extra_currencies: BTreeMap::new(),
            decoded_operation: String::new(),
            decoded_body: serde_json::Value::Null,
        }
    }
}

/// Extra-currency amounts exceed `u64`, so they travel as decimal strings in
/// the stored JSON.
mod extra_currencies_serde {
    use std::collections::BTreeMap;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<u32, u128>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_map(map.iter().map(|(k, v)| (k.to_string(), v.to_string())))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<u32, u128>, D::Error> {
        let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(k, v)| {
                let id = k.parse::<u32>().map_err(D::Error::custom)?;
                let amount = v.parse::<u128>().map_err(D::Error::custom)?;
                Ok((id, amount))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_json_round_trip() {
        let mut message = Message::internal(
            AccountId::new(0, [1; 32]),
            AccountId::new(0, [2; 32]),
            1_000_000_000,
        );
        message
            .extra_currencies
            .insert(239, 340_282_366_920_938_463_463_374_607_431_768_211_455);
        message.decoded_operation = INVOICE_PAYLOAD_OP.to_string();
        message.decoded_body = serde_json::json!({"Id": "0123456789abcdef"});

        let json = serde_json::to_value(&message).unwrap();
        // u128 amounts are strings on the wire
        assert_eq!(
            json["extra_currencies"]["239"],
            serde_json::json!("340282366920938463463374607431768211455")
        );
        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn test_transaction_json_round_trip() {
        let tx = Transaction {
            lt: 100,
            hash: Bits256([3; 32]),
            prev_tx_lt: 90,
            prev_tx_hash: Bits256([4; 32]),
            utime: 1_700_000_000,
            success: true,
            in_message: Message::internal(
                AccountId::new(0, [1; 32]),
                AccountId::new(0, [2; 32]),
                42,
            ),
            out_messages: vec![],
        };
        let json = serde_json::to_value(&tx).unwrap();
        let back: Transaction = serde_json::from_value(json).unwrap();
        assert_eq!(back, tx);
    }
}
