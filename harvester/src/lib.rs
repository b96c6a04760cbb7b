// Copyright (c) TX Society
// SPDX-License-Identifier: Apache-2.0

//! Payment-acceptance harvester for the TON blockchain.
//!
//! Given a merchant recipient address and a whitelist of currencies (the
//! native coin, extra sub-currencies and jetton masters), the service issues
//! invoices, observes on-chain transactions for the tracked accounts, extracts
//! invoice-bound payments from message payloads, settles invoices
//! transactionally and dispatches at-least-once webhook notifications.
//!
//! ```text
//! Chain gateway ──► Loader ──► transactions table ──► Extractor
//!                                                        │
//!                                          Store.save_payments (atomic)
//!                                                        │
//!                               invoice_notifications outbox ──► Notifier ──► webhook
//! ```

pub mod api;
pub mod chain;
pub mod config;
pub mod core;
pub mod error;
pub mod indexer;
pub mod notifier;
pub mod store;
pub mod webhook;
