//! Governance configuration
//!
//! Loaded from TOML. Every section has defaults, so an empty file (or no file)
//! yields a working configuration.

use crate::context::IsolationLevel;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Idempotency defaults
    pub idempotency: IdempotencyConfig,
    /// Quota service settings
    pub quota: QuotaConfig,
    /// Transaction defaults
    pub transaction: TransactionConfig,
    /// Retention job settings
    pub retention: RetentionConfig,
}

impl GovernanceConfig {
    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML, every default spelled out
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values the coordinators cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.idempotency.timeout_secs == 0 {
            return Err(ConfigError::Invalid("idempotency.timeout_secs must be > 0".into()));
        }
        if self.idempotency.key_prefix.is_empty() {
            return Err(ConfigError::Invalid("idempotency.key_prefix must not be empty".into()));
        }
        if self.quota.usage_cache_ttl_secs == 0 {
            return Err(ConfigError::Invalid("quota.usage_cache_ttl_secs must be > 0".into()));
        }
        if self.retention.interval_secs == 0 {
            return Err(ConfigError::Invalid("retention.interval_secs must be > 0".into()));
        }
        Ok(())
    }
}

/// Defaults applied to idempotent operations that do not override them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    /// Claim and replay window in seconds
    pub timeout_secs: u64,
    /// Namespace for fingerprints in the coordination store
    pub key_prefix: String,
    /// Message returned for duplicate submissions
    pub message: String,
    /// Drop the claim when the work fails
    pub delete_on_error: bool,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            key_prefix: "idempotent:".to_string(),
            message: "request is being processed, please do not resubmit".to_string(),
            delete_on_error: true,
        }
    }
}

impl IdempotencyConfig {
    /// Window as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Quota service settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Maximum staleness of cached usage figures, in seconds
    pub usage_cache_ttl_secs: u64,
    /// Namespace for usage cache keys
    pub cache_key_prefix: String,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            usage_cache_ttl_secs: 60,
            cache_key_prefix: "quota:usage:".to_string(),
        }
    }
}

impl QuotaConfig {
    /// Cache TTL as a duration
    pub fn usage_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.usage_cache_ttl_secs)
    }
}

/// Transaction defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Isolation used when options leave it unset
    pub isolation: IsolationLevel,
}

/// Retention job settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Seconds between runs of the API usage purge
    pub interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { interval_secs: 86_400 }
    }
}

impl RetentionConfig {
    /// Interval as a duration
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML did not parse
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Could not be rendered back to TOML
    #[error("render error: {0}")]
    Render(#[from] toml::ser::Error),

    /// Parsed but unusable
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = GovernanceConfig::from_toml_str("").unwrap();
        assert_eq!(config, GovernanceConfig::default());
        assert_eq!(config.idempotency.timeout(), Duration::from_secs(5));
        assert_eq!(config.quota.usage_cache_ttl(), Duration::from_secs(60));
    }

    #[test]
    fn test_partial_override() {
        let config = GovernanceConfig::from_toml_str(
            r#"
            [idempotency]
            timeout_secs = 30
            delete_on_error = false

            [transaction]
            isolation = "serializable"
            "#,
        )
        .unwrap();

        assert_eq!(config.idempotency.timeout_secs, 30);
        assert!(!config.idempotency.delete_on_error);
        assert_eq!(config.idempotency.key_prefix, "idempotent:");
        assert_eq!(config.transaction.isolation, IsolationLevel::Serializable);
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let err = GovernanceConfig::from_toml_str("[idempotency]\ntimeout_secs = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let err = GovernanceConfig::from_toml_str("[quota\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_rendered_config_parses_back() {
        let config = GovernanceConfig::from_toml_str("[quota]\nusage_cache_ttl_secs = 15").unwrap();
        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("usage_cache_ttl_secs = 15"));
        assert!(rendered.contains("[retention]"));
        assert_eq!(GovernanceConfig::from_toml_str(&rendered).unwrap(), config);
    }
}
