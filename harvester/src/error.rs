// Copyright (c) TX Society
// SPDX-License-Identifier: Apache-2.0

//! Error classification for the harvester.
//!
//! Every fallible seam maps into one of these kinds; retry and panic decisions
//! are made on the variant, never on message text.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// A lookup found nothing. Surfaced verbatim to the caller, never retried.
    #[error("not found")]
    NotFound,

    /// Database connectivity or query failure. Callers retry with backoff.
    #[error("storage error: {0}")]
    Storage(String),

    /// A persistence invariant does not hold. Fatal; the process must not
    /// continue against a corrupt store.
    #[error("storage corrupted: {0}")]
    CorruptStorage(String),

    /// Transient chain RPC failure. The loader retries these.
    #[error("chain error: {0}")]
    ChainTransient(String),

    /// The chain returned data that fails verification (hash mismatch,
    /// jetton wallet reporting a different master or owner).
    #[error("chain verification failed: {0}")]
    ChainVerification(String),

    /// The chain client has no proven masterchain head yet.
    #[error("chain client not initialized")]
    NotInitialized,

    /// A message whose shape claims to be a payment carries a malformed body.
    /// Recorded on the transaction row; the processed LT still advances.
    #[error("message parse error: {0}")]
    MessageParse(String),

    /// Webhook delivery failed after all attempts. The outbox row is kept.
    #[error("webhook delivery failed: {0}")]
    Webhook(String),
}

impl CoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::NotFound)
    }
}

impl From<diesel::result::Error> for CoreError {
    fn from(err: diesel::result::Error) -> Self {
        match err {
            diesel::result::Error::NotFound => CoreError::NotFound,
            other => CoreError::Storage(other.to_string()),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diesel_not_found_maps_to_not_found() {
        let err: CoreError = diesel::result::Error::NotFound.into();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_diesel_other_maps_to_storage() {
        let err: CoreError = diesel::result::Error::BrokenTransactionManager.into();
        assert!(matches!(err, CoreError::Storage(_)));
    }
}
