//! Per-operation idempotency policy

use govern_common::IdempotencyConfig;
use std::time::Duration;

/// How one operation is deduplicated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyPolicy {
    /// Claim lifetime and replay window
    pub timeout: Duration,
    /// Namespace prepended to the fingerprint
    pub key_prefix: String,
    /// Message carried by `DuplicateRequest`
    pub message: String,
    /// Drop the claim immediately when the work fails
    pub delete_on_error: bool,
}

impl Default for IdempotencyPolicy {
    fn default() -> Self {
        Self::from(&IdempotencyConfig::default())
    }
}

impl From<&IdempotencyConfig> for IdempotencyPolicy {
    fn from(config: &IdempotencyConfig) -> Self {
        Self {
            timeout: config.timeout(),
            key_prefix: config.key_prefix.clone(),
            message: config.message.clone(),
            delete_on_error: config.delete_on_error,
        }
    }
}

impl IdempotencyPolicy {
    /// Default policy with a custom window
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout, ..Self::default() }
    }

    /// Override the key namespace
    pub fn prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = key_prefix.into();
        self
    }

    /// Override the duplicate-submission message
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Keep the claim after a failure so retries wait out the window
    pub fn keep_on_error(mut self) -> Self {
        self.delete_on_error = false;
        self
    }
}
