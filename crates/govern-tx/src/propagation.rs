//! Propagation and rollback policy

use crate::error::{class_matches, Classify};
use govern_common::IsolationLevel;
use serde::{Deserialize, Serialize};

/// How a unit of work relates to an already active transaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Propagation {
    /// Join the active transaction, or start one
    #[default]
    Required,
    /// Always start a fresh transaction, suspending any active one
    RequiresNew,
    /// Join the active transaction, fail without one
    Mandatory,
    /// Join the active transaction, or run without one
    Supports,
    /// Run without a transaction, suspending any active one
    NotSupported,
    /// Run without a transaction, fail if one is active
    Never,
    /// Savepoint inside the active transaction, or start one
    Nested,
}

/// rollbackFor / noRollbackFor lists of error classes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackRules {
    /// Classes that trigger rollback; empty means every error does
    pub rollback_for: Vec<String>,
    /// Classes that commit despite the error
    pub no_rollback_for: Vec<String>,
}

impl RollbackRules {
    /// Decide whether `error` should undo the transaction.
    ///
    /// `no_rollback_for` wins over `rollback_for`.
    pub fn should_rollback<E: Classify + ?Sized>(&self, error: &E) -> bool {
        let class = error.error_class();
        if self.no_rollback_for.iter().any(|rule| class_matches(class, rule)) {
            return false;
        }
        self.rollback_for.is_empty()
            || self.rollback_for.iter().any(|rule| class_matches(class, rule))
    }
}

/// Free-function form of [`RollbackRules::should_rollback`]
pub fn should_rollback<E: Classify + ?Sized>(error: &E, rules: &RollbackRules) -> bool {
    rules.should_rollback(error)
}

/// Options for one `with_transaction` call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOptions {
    /// Propagation behavior
    pub propagation: Propagation,
    /// Isolation for newly started transactions; `None` uses the coordinator default
    pub isolation: Option<IsolationLevel>,
    /// Rollback policy
    pub rules: RollbackRules,
    /// Label used in logs
    pub name: Option<String>,
}

impl TransactionOptions {
    /// Options with the given propagation and default rules
    pub fn new(propagation: Propagation) -> Self {
        Self { propagation, ..Self::default() }
    }

    /// REQUIRED propagation
    pub fn required() -> Self {
        Self::new(Propagation::Required)
    }

    /// REQUIRES_NEW propagation
    pub fn requires_new() -> Self {
        Self::new(Propagation::RequiresNew)
    }

    /// NESTED propagation
    pub fn nested() -> Self {
        Self::new(Propagation::Nested)
    }

    /// Isolation for a transaction these options start
    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = Some(isolation);
        self
    }

    /// Add an error class that triggers rollback
    pub fn rollback_for(mut self, class: impl Into<String>) -> Self {
        self.rules.rollback_for.push(class.into());
        self
    }

    /// Add an error class that commits despite the error
    pub fn no_rollback_for(mut self, class: impl Into<String>) -> Self {
        self.rules.no_rollback_for.push(class.into());
        self
    }

    /// Label for logs
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}
