//! Error types shared by the store adapters

use thiserror::Error;

/// Failure reported by a coordination or persistent store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Addressed record does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Write rejected because of concurrent state
    #[error("conflict: {0}")]
    Conflict(String),

    /// Stored value has the wrong shape for the requested operation
    #[error("invalid value at {key}: {reason}")]
    InvalidValue {
        /// Offending key
        key: String,
        /// What was wrong with it
        reason: String,
    },

    /// Backend unavailable or misbehaving
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
