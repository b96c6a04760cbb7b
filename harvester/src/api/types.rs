// Copyright (c) TX Society
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

use crate::core::{InvoiceMetadata, PrivateInvoice};

#[derive(Debug, Deserialize)]
pub struct NewInvoice {
    pub amount: String,
    pub currency: String,
    pub life_time: i64,
    #[serde(default)]
    pub private_info: Option<serde_json::Value>,
    pub metadata: InvoiceMetadata,
}

#[derive(Debug, Deserialize)]
pub struct NewKey {
    #[serde(rename = "wallet_version", default)]
    pub _wallet_version: String,
    pub public_key: String,
    pub signed_encryption_key: String,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub after: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InvoiceList {
    pub invoices: Vec<PrivateInvoice>,
}
