// Copyright (c) TX Society
// SPDX-License-Identifier: Apache-2.0

//! Core domain model: addresses, currencies, accounts, transactions,
//! invoices and payments.

mod address;
mod currency;
mod invoice;
pub mod keys;
pub mod payload;
mod types;

pub use address::{AccountId, Bits256};
pub use currency::{Currency, ExtendedCurrency, DEFAULT_TON_TICKER};
pub use invoice::{
    convert_invoice_to_printable_private, convert_invoice_to_printable_public, invoice_id_from_bytes,
    new_invoice_id, parse_invoice_id, Invoice, InvoiceId, InvoiceItem, InvoiceMetadata,
    InvoiceStatus, Payment, PrivateInvoice, PublicInvoice, DEFAULT_PAYMENT_PREFIXES,
};
pub use types::{
    Account, AccountInfo, Message, MsgType, Transaction, TxGap, TxId, INVOICE_PAYLOAD_OP,
    JETTON_NOTIFY_OP, TEXT_COMMENT_OP,
};
