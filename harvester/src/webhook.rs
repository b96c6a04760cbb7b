// Copyright (c) TX Society
// SPDX-License-Identifier: Apache-2.0

//! Retrying webhook POST client for merchant notifications.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::info;
use url::Url;

use crate::core::PrivateInvoice;
use crate::error::{CoreError, CoreResult};
use crate::notifier::Sender;

const MAX_ATTEMPTS: u64 = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct WebhookClient {
    client: reqwest::Client,
    url: Url,
}

impl WebhookClient {
    pub fn new(webhook_url: Url) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: webhook_url,
        })
    }

    async fn do_request(&self, body: &[u8]) -> Result<(), String> {
        let response = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json; charset=UTF-8")
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| format!("webhook sending error: {e}"))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("webhook response status: {}", response.status()))
        }
    }
}

#[async_trait]
impl Sender for WebhookClient {
    /// Any 2xx is success; up to three attempts with linearly increasing
    /// backoff before the caller sees a failure.
    async fn send(&self, invoice: &PrivateInvoice) -> CoreResult<()> {
        let body = serde_json::to_vec(invoice)
            .map_err(|e| CoreError::Webhook(format!("marshal invoice: {e}")))?;
        for attempt in 1..=MAX_ATTEMPTS {
            match self.do_request(&body).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    info!("webhook sending: {e}");
                    tokio::time::sleep(Duration::from_secs(attempt)).await;
                }
            }
        }
        Err(CoreError::Webhook("attempts to send a webhook ended".into()))
    }
}
