// Copyright (c) TX Society
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::payload::encode_payload;
use crate::core::{AccountId, Bits256, Currency, ExtendedCurrency};
use crate::error::CoreError;

pub type InvoiceId = Uuid;

/// Invoice ids are UUIDv7 so insertion order matches time order, which makes
/// cursor pagination by id correct.
pub fn new_invoice_id() -> InvoiceId {
    Uuid::now_v7()
}

pub fn parse_invoice_id(id: &str) -> Result<InvoiceId, CoreError> {
    if id.is_empty() {
        return Err(CoreError::MessageParse("invalid id length".into()));
    }
    let parsed =
        Uuid::parse_str(id).map_err(|e| CoreError::MessageParse(format!("invalid id: {e}")))?;
    if parsed.get_version_num() != 7 {
        return Err(CoreError::MessageParse("invalid invoice id".into()));
    }
    Ok(parsed)
}

pub fn invoice_id_from_bytes(data: &[u8]) -> Result<InvoiceId, CoreError> {
    let parsed = Uuid::from_slice(data)
        .map_err(|e| CoreError::MessageParse(format!("invalid id: {e}")))?;
    if parsed.get_version_num() != 7 {
        return Err(CoreError::MessageParse("invalid invoice id".into()));
    }
    Ok(parsed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Waiting,
    Paid,
    Cancelled,
    Expired,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Waiting => "waiting",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Cancelled => "cancelled",
            InvoiceStatus::Expired => "expired",
        }
    }
}

impl FromStr for InvoiceStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(InvoiceStatus::Waiting),
            "paid" => Ok(InvoiceStatus::Paid),
            "cancelled" => Ok(InvoiceStatus::Cancelled),
            "expired" => Ok(InvoiceStatus::Expired),
            other => Err(CoreError::CorruptStorage(format!(
                "unknown invoice status: {other}"
            ))),
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Invoice {
    pub id: InvoiceId,
    pub recipient: AccountId,
    pub status: InvoiceStatus,
    pub amount: u128,
    /// Everything received on top of (or before reaching) `amount`. Never
    /// negative; reduced by `amount` on the paid transition, the residual
    /// stays stored for audit.
    pub overpayment: u128,
    pub currency: Currency,
    pub created_at: DateTime<Utc>,
    pub expire_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub private_info: serde_json::Value,
    pub metadata: serde_json::Value,
    pub paid_by: Option<AccountId>,
    pub paid_at: Option<DateTime<Utc>>,
    pub tx_hash: Option<Bits256>,
}

/// A payment extracted from one transaction. Transient: only its effect on
/// the invoice is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    pub invoice_id: InvoiceId,
    pub currency: Currency,
    pub amount: u128,
    pub paid_by: AccountId,
    pub recipient: AccountId,
    pub tx_hash: Bits256,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceMetadata {
    pub merchant_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub merchant_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub merchant_logo: String,
    #[serde(default)]
    pub goods: Vec<InvoiceItem>,
    #[serde(rename = "mcc_code", default)]
    pub mcc: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicInvoice {
    pub id: String,
    pub status: String,
    pub amount: String,
    pub currency: String,
    #[serde(rename = "pay_to_address")]
    pub recipient: String,
    pub payment_links: HashMap<String, String>,
    pub created_at: i64,
    pub expire_at: i64,
    pub updated_at: i64,
    pub overpayment: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub paid_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<i64>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tx_hash: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrivateInvoice {
    #[serde(flatten)]
    pub public: PublicInvoice,
    pub private_info: serde_json::Value,
    pub metadata: serde_json::Value,
}

pub const DEFAULT_PAYMENT_PREFIXES: [(&str, &str); 2] = [
    ("universal", "ton://"),
    ("tonkeeper", "https://app.tonkeeper.com/"),
];

pub fn convert_invoice_to_printable_public(
    prefixes: &HashMap<String, String>,
    invoice: &Invoice,
    currencies: &HashMap<String, ExtendedCurrency>,
    adnl_address: Option<&Bits256>,
) -> anyhow::Result<PublicInvoice> {
    let ticker = currencies
        .iter()
        .find(|(_, c)| c.currency == invoice.currency)
        .map(|(t, _)| t.clone())
        .ok_or_else(|| anyhow!("currency not found: {}", invoice.currency))?;

    let mut payment_links = HashMap::with_capacity(prefixes.len());
    for (name, prefix) in prefixes {
        let link = generate_payment_link(prefix, invoice, adnl_address)
            .with_context(|| format!("payment link {name}"))?;
        payment_links.insert(name.clone(), link);
    }

    Ok(PublicInvoice {
        id: invoice.id.to_string(),
        status: invoice.status.as_str().to_string(),
        amount: invoice.amount.to_string(),
        currency: ticker,
        recipient: invoice.recipient.to_raw(),
        payment_links,
        created_at: invoice.created_at.timestamp(),
        expire_at: invoice.expire_at.timestamp(),
        updated_at: invoice.updated_at.timestamp(),
        overpayment: invoice.overpayment.to_string(),
        paid_by: invoice.paid_by.map(|a| a.to_raw()).unwrap_or_default(),
        paid_at: invoice.paid_at.map(|t| t.timestamp()),
        tx_hash: invoice.tx_hash.map(|h| h.to_hex()).unwrap_or_default(),
    })
}

pub fn convert_invoice_to_printable_private(
    prefixes: &HashMap<String, String>,
    invoice: &Invoice,
    currencies: &HashMap<String, ExtendedCurrency>,
    adnl_address: Option<&Bits256>,
) -> anyhow::Result<PrivateInvoice> {
    let public = convert_invoice_to_printable_public(prefixes, invoice, currencies, adnl_address)?;
    Ok(PrivateInvoice {
        public,
        private_info: invoice.private_info.clone(),
        metadata: invoice.metadata.clone(),
    })
}

/// Render a deep link for one wallet prefix. The formats are wire contracts.
pub fn generate_payment_link(
    prefix: &str,
    invoice: &Invoice,
    adnl_address: Option<&Bits256>,
) -> anyhow::Result<String> {
    let payload = encode_payload(&invoice.id, adnl_address);
    match invoice.currency {
        Currency::Ton => Ok(format!(
            "{}transfer/{}?amount={}&bin={}&exp={}",
            prefix,
            invoice.recipient.to_human(false, false),
            invoice.amount,
            payload,
            invoice.expire_at.timestamp(),
        )),
        Currency::Jetton(master) => Ok(format!(
            "{}transfer/{}?jetton={}&amount={}&bin={}&exp={}",
            prefix,
            invoice.recipient.to_human(true, false),
            master.to_human(true, false),
            invoice.amount,
            payload,
            invoice.expire_at.timestamp(),
        )),
        Currency::Extra(_) => bail!("extra not supported yet"),
    }
}
