//! Transaction errors and error classification

use govern_common::StoreError;
use thiserror::Error;

/// Errors raised by the coordinator itself (never by the wrapped work)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    /// MANDATORY propagation found no active transaction
    #[error("transaction required")]
    Required,

    /// NEVER propagation found an active transaction
    #[error("transaction not allowed")]
    NotAllowed,

    /// A transaction was already active where a new one was being installed
    #[error("transaction stack out of sync: {0}")]
    Stack(String),

    /// The persistent store failed to begin/commit/rollback
    #[error("transaction store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors that can be matched against rollback rules.
///
/// Classes are dotted names; a rule matches its own class and every class
/// beneath it, so `business` covers `business.validation`.
pub trait Classify {
    /// Dotted class name of this error
    fn error_class(&self) -> &str;
}

impl Classify for TransactionError {
    fn error_class(&self) -> &str {
        match self {
            Self::Required => "transaction.required",
            Self::NotAllowed => "transaction.not_allowed",
            Self::Stack(_) => "transaction.stack",
            Self::Store(_) => "transaction.store",
        }
    }
}

impl Classify for StoreError {
    fn error_class(&self) -> &str {
        match self {
            Self::NotFound(_) => "store.not_found",
            Self::Conflict(_) => "store.conflict",
            Self::InvalidValue { .. } => "store.invalid_value",
            Self::Backend(_) => "store.backend",
        }
    }
}

/// Whether `class` falls under `rule`
pub fn class_matches(class: &str, rule: &str) -> bool {
    match class.strip_prefix(rule) {
        Some(rest) => rest.is_empty() || rest.starts_with('.'),
        None => false,
    }
}
