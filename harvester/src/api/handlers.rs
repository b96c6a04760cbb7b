// Copyright (c) TX Society
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::{Duration, Utc};
use tracing::error;

use crate::api::{ApiError, ApiState, HistoryQuery, InvoiceList, NewInvoice, NewKey};
use crate::core::keys::{encrypt_metadata, parse_signed_encryption_key};
use crate::core::{
    convert_invoice_to_printable_private, convert_invoice_to_printable_public, new_invoice_id,
    parse_invoice_id, AccountId, ExtendedCurrency, Invoice, InvoiceMetadata, InvoiceStatus,
};
use crate::error::CoreError;

const DEFAULT_HISTORY_LIMIT: i64 = 20;

pub fn create_api_router(state: Arc<ApiState>) -> Router {
    let private = Router::new()
        .route("/invoice", post(create_invoice))
        .route("/invoices", get(get_invoice_history))
        .route("/invoices/:id", get(get_invoice))
        .route("/invoices/:id/cancel", post(cancel_invoice))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));
    let public = Router::new()
        .route("/invoices/:id", get(get_invoice_public))
        .route("/invoices/:id/metadata", get(get_encrypted_metadata))
        .route("/keys/:account/commit", post(commit_key));
    Router::new()
        .nest("/tonpay/private/api/v1", private)
        .nest("/tonpay/public/api/v1", public)
        .with_state(state)
}

async fn auth_middleware(
    State(state): State<Arc<ApiState>>,
    request: Request,
    next: Next,
) -> Response {
    let bearer = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    if bearer != Some(state.token.as_str()) {
        return ApiError::unauthorized().into_response();
    }
    next.run(request).await
}

async fn create_invoice(
    State(state): State<Arc<ApiState>>,
    Json(data): Json<NewInvoice>,
) -> Result<Json<crate::core::PrivateInvoice>, ApiError> {
    let invoice = convert_new_invoice(data, state.store.recipient(), &state.currencies)
        .map_err(|e| ApiError::bad_request(format!("invoice data parsing error: {e}")))?;
    state.store.create_invoice(&invoice).await?;
    let printable = convert_invoice_to_printable_private(
        &state.payment_prefixes,
        &invoice,
        &state.currencies,
        state.adnl_address.as_ref(),
    )
    .map_err(log_internal)?;
    Ok(Json(printable))
}

async fn get_invoice(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<crate::core::PrivateInvoice>, ApiError> {
    let id = parse_invoice_id(&id).map_err(|_| ApiError::bad_request("invalid id"))?;
    let invoice = state.store.get_invoice(id).await?;
    let printable = convert_invoice_to_printable_private(
        &state.payment_prefixes,
        &invoice,
        &state.currencies,
        state.adnl_address.as_ref(),
    )
    .map_err(log_internal)?;
    Ok(Json(printable))
}

async fn get_invoice_public(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<crate::core::PublicInvoice>, ApiError> {
    let id = parse_invoice_id(&id).map_err(|_| ApiError::bad_request("invalid id"))?;
    let invoice = state.store.get_invoice(id).await?;
    let printable = convert_invoice_to_printable_public(
        &state.payment_prefixes,
        &invoice,
        &state.currencies,
        state.adnl_address.as_ref(),
    )
    .map_err(log_internal)?;
    Ok(Json(printable))
}

async fn cancel_invoice(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<crate::core::PrivateInvoice>, ApiError> {
    let id = parse_invoice_id(&id).map_err(|_| ApiError::bad_request("invalid id"))?;
    let invoice = match state.store.cancel_invoice(id).await {
        Ok(invoice) => invoice,
        Err(CoreError::NotFound) => {
            return Err(ApiError::not_found("no waiting payment invoice found"))
        }
        Err(err) => return Err(err.into()),
    };
    let printable = convert_invoice_to_printable_private(
        &state.payment_prefixes,
        &invoice,
        &state.currencies,
        state.adnl_address.as_ref(),
    )
    .map_err(log_internal)?;
    Ok(Json(printable))
}

async fn get_invoice_history(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<InvoiceList>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    if limit <= 0 {
        return Err(ApiError::bad_request("invalid limit"));
    }
    let after = match query.after.as_deref() {
        Some(after) => {
            let id = parse_invoice_id(after)
                .map_err(|e| ApiError::bad_request(format!("invalid invoice ID: {e}")))?;
            // the cursor must reference a known invoice
            match state.store.get_invoice(id).await {
                Ok(_) => id,
                Err(CoreError::NotFound) => {
                    return Err(ApiError::bad_request("unknown invoice ID"))
                }
                Err(err) => return Err(err.into()),
            }
        }
        None => uuid::Uuid::nil(),
    };
    let invoices = state.store.get_invoices(after, limit).await?;
    let mut printable = Vec::with_capacity(invoices.len());
    for invoice in &invoices {
        printable.push(
            convert_invoice_to_printable_private(
                &state.payment_prefixes,
                invoice,
                &state.currencies,
                state.adnl_address.as_ref(),
            )
            .map_err(log_internal)?,
        );
    }
    Ok(Json(InvoiceList {
        invoices: printable,
    }))
}

async fn commit_key(
    State(state): State<Arc<ApiState>>,
    Path(account): Path<String>,
    Json(data): Json<NewKey>,
) -> Result<(), ApiError> {
    let account: AccountId = account
        .parse()
        .map_err(|e| ApiError::bad_request(format!("invalid account: {e}")))?;
    let key = parse_signed_encryption_key(&data.public_key, &data.signed_encryption_key)
        .map_err(|e| ApiError::bad_request(format!("key parsing error: {e}")))?;
    state.store.save_encryption_key(account, key).await?;
    Ok(())
}

async fn get_encrypted_metadata(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let Some(encryption_key) = state.encryption_key.as_ref() else {
        return Err(ApiError::locked("encrypted data is not available"));
    };
    let id = parse_invoice_id(&id).map_err(|_| ApiError::bad_request("invalid id"))?;
    let invoice = state.store.get_invoice(id).await?;
    if invoice.status != InvoiceStatus::Paid {
        return Err(ApiError::bad_request("invalid invoice"));
    }
    let paid_by = invoice.paid_by.ok_or_else(ApiError::internal)?;
    let key = state.store.get_encryption_key(paid_by).await?;
    let metadata = serde_json::to_vec(&invoice.metadata).map_err(|_| ApiError::internal())?;
    let encrypted = encrypt_metadata(encryption_key, &key, &metadata).map_err(log_internal)?;
    Ok((
        [(CONTENT_TYPE, "application/octet-stream")],
        encrypted,
    )
        .into_response())
}

fn log_internal(err: anyhow::Error) -> ApiError {
    error!("api internal error: {err:#}");
    ApiError::internal()
}

fn convert_new_invoice(
    data: NewInvoice,
    recipient: AccountId,
    currencies: &HashMap<String, ExtendedCurrency>,
) -> anyhow::Result<Invoice> {
    let amount = data
        .amount
        .parse::<u128>()
        .map_err(|_| anyhow::anyhow!("can not parse amount string"))?;
    if amount == 0 {
        anyhow::bail!("amount must be positive integer");
    }
    if data.life_time <= 0 {
        anyhow::bail!("life time must be positive integer");
    }
    let extended = currencies
        .get(&data.currency)
        .ok_or_else(|| anyhow::anyhow!("currency ticker {} not found", data.currency))?;
    validate_metadata(&data.metadata)?;

    let now = Utc::now();
    Ok(Invoice {
        id: new_invoice_id(),
        recipient,
        status: InvoiceStatus::Waiting,
        amount,
        overpayment: 0,
        currency: extended.currency,
        created_at: now,
        expire_at: now + Duration::seconds(data.life_time),
        updated_at: now,
        private_info: data
            .private_info
            .unwrap_or_else(|| serde_json::json!({})),
        metadata: serde_json::to_value(&data.metadata)?,
        paid_by: None,
        paid_at: None,
        tx_hash: None,
    })
}

fn validate_metadata(metadata: &InvoiceMetadata) -> anyhow::Result<()> {
    if metadata.merchant_name.is_empty() {
        anyhow::bail!("missing merchant_name");
    }
    if metadata.mcc < 0 || metadata.mcc > 9999 {
        anyhow::bail!("mcc_code must be between 0 and 9999");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Currency;

    fn currencies() -> HashMap<String, ExtendedCurrency> {
        HashMap::from([("TON".to_string(), ExtendedCurrency::ton())])
    }

    fn recipient() -> AccountId {
        AccountId::new(0, [0x42; 32])
    }

    fn new_invoice_data(amount: &str, currency: &str, life_time: i64) -> NewInvoice {
        NewInvoice {
            amount: amount.to_string(),
            currency: currency.to_string(),
            life_time,
            private_info: None,
            metadata: InvoiceMetadata {
                merchant_name: "Arrakis Traders".to_string(),
                merchant_url: String::new(),
                merchant_logo: String::new(),
                goods: vec![],
                mcc: 5999,
            },
        }
    }

    #[test]
    fn test_convert_new_invoice_happy_path() {
        let invoice =
            convert_new_invoice(new_invoice_data("1000", "TON", 3600), recipient(), &currencies())
                .unwrap();
        assert_eq!(invoice.amount, 1000);
        assert_eq!(invoice.overpayment, 0);
        assert_eq!(invoice.status, InvoiceStatus::Waiting);
        assert_eq!(invoice.currency, Currency::Ton);
        assert_eq!(invoice.recipient, recipient());
        assert_eq!(
            (invoice.expire_at - invoice.created_at).num_seconds(),
            3600
        );
        assert_eq!(invoice.metadata["merchant_name"], "Arrakis Traders");
    }

    #[test]
    fn test_convert_new_invoice_rejects_bad_amount() {
        for amount in ["0", "-10", "1.5", "lots"] {
            assert!(
                convert_new_invoice(new_invoice_data(amount, "TON", 60), recipient(), &currencies())
                    .is_err(),
                "amount {amount} must be rejected"
            );
        }
    }

    #[test]
    fn test_convert_new_invoice_rejects_bad_lifetime() {
        assert!(convert_new_invoice(
            new_invoice_data("10", "TON", 0),
            recipient(),
            &currencies()
        )
        .is_err());
        assert!(convert_new_invoice(
            new_invoice_data("10", "TON", -5),
            recipient(),
            &currencies()
        )
        .is_err());
    }

    #[test]
    fn test_convert_new_invoice_rejects_unknown_ticker() {
        assert!(convert_new_invoice(
            new_invoice_data("10", "SPICE", 60),
            recipient(),
            &currencies()
        )
        .is_err());
    }

    #[test]
    fn test_metadata_validation() {
        let mut metadata = new_invoice_data("10", "TON", 60).metadata;
        assert!(validate_metadata(&metadata).is_ok());

        metadata.mcc = 10_000;
        assert!(validate_metadata(&metadata).is_err());

        metadata.mcc = 0;
        metadata.merchant_name = String::new();
        assert!(validate_metadata(&metadata).is_err());
    }
}
