//! Facade error

use govern_common::{ConfigError, StoreError};
use govern_idempotency::IdempotencyError;
use govern_quota::QuotaError;
use govern_tx::{Classify, TransactionError};
use thiserror::Error;

/// Any failure the governance core can report
#[derive(Error, Debug)]
pub enum GovernError {
    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Idempotency coordinator failure
    #[error(transparent)]
    Idempotency(#[from] IdempotencyError),

    /// Transaction coordinator failure
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// Quota service failure
    #[error(transparent)]
    Quota(#[from] QuotaError),

    /// Coordination store failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Classify for GovernError {
    fn error_class(&self) -> &str {
        match self {
            Self::Config(_) => "config",
            Self::Idempotency(IdempotencyError::DuplicateRequest { .. }) => {
                "idempotency.duplicate_request"
            }
            Self::Idempotency(_) => "idempotency",
            Self::Transaction(err) => err.error_class(),
            Self::Quota(err) => err.error_class(),
            Self::Store(err) => err.error_class(),
        }
    }
}
