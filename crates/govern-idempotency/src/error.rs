//! Idempotency errors

use govern_common::StoreError;
use thiserror::Error;

/// Errors raised by the idempotency coordinator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyError {
    /// An identical request is still being processed
    #[error("{message}")]
    DuplicateRequest {
        /// Policy-configured, user-facing message
        message: String,
    },

    /// The context carries no request identity to fingerprint
    #[error("request identity missing from context")]
    MissingRequest,

    /// Cached result could not be encoded or decoded
    #[error("cached result serialization failed: {0}")]
    Serialization(String),

    /// Coordination store failure
    #[error("coordination store error: {0}")]
    Store(#[from] StoreError),
}
