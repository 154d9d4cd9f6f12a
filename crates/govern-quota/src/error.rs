//! Quota errors

use govern_common::StoreError;
use govern_tx::{Classify, TransactionError};
use thiserror::Error;

/// Quota result type
pub type QuotaResult<T> = Result<T, QuotaError>;

/// Errors raised by the quota service.
///
/// Exceeding a quota is not an error: it is a check result with
/// `allowed == false`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuotaError {
    /// No quota row for the tenant
    #[error("tenant quota not found: {0}")]
    NotFound(String),

    /// Negative amount, bad resource name or limit below -1
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Ledger failure
    #[error("quota store error: {0}")]
    Store(#[from] StoreError),

    /// Transaction coordinator failure
    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

impl Classify for QuotaError {
    fn error_class(&self) -> &str {
        match self {
            Self::NotFound(_) => "quota.not_found",
            Self::InvalidArgument(_) => "quota.invalid_argument",
            Self::Store(_) => "quota.store",
            Self::Transaction(err) => err.error_class(),
        }
    }
}
