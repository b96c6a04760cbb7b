// Copyright (c) TX Society
// SPDX-License-Identifier: Apache-2.0

//! HTTP surface: a bearer-authenticated private merchant API and an open
//! public API for payers.

mod handlers;
mod types;

pub use handlers::create_api_router;
pub use types::*;

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use ed25519_dalek::SigningKey;
use serde_json::json;

use crate::core::{Bits256, ExtendedCurrency};
use crate::error::CoreError;
use crate::store::Store;

/// Shared state for API handlers.
pub struct ApiState {
    pub store: Store,
    pub currencies: HashMap<String, ExtendedCurrency>,
    pub adnl_address: Option<Bits256>,
    pub payment_prefixes: HashMap<String, String>,
    /// Metadata-encryption key; absent when the service runs without `KEY`.
    pub encryption_key: Option<SigningKey>,
    pub token: String,
}

impl ApiState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        currencies: HashMap<String, ExtendedCurrency>,
        adnl_address: Option<Bits256>,
        payment_prefixes: HashMap<String, String>,
        encryption_key: Option<SigningKey>,
        token: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            currencies,
            adnl_address,
            payment_prefixes,
            encryption_key,
            token,
        })
    }
}

/// JSON error body `{"error": message}` with the mapped status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: "missing or invalid bearer token".into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn locked(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::LOCKED,
            message: message.into(),
        }
    }

    pub fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "internal server error".into(),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound => Self::not_found("not found"),
            _ => Self::internal(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({"error": self.message}))).into_response()
    }
}
