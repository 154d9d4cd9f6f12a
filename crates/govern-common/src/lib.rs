//! Governance Common - Shared primitives for the request-governance core
//!
//! This crate provides the pieces every coordinator leans on:
//! - Coordination store adapter (get / set / set-if-absent / delete / increment)
//! - Request context threaded explicitly through every wrapped call
//! - Transaction context stack (active + suspended transactions per call chain)
//! - Configuration
//! - Error handling
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                     REQUEST-GOVERNANCE CORE                         │
//! │                                                                     │
//! │   inbound op ──► Idempotency ──► Transaction ──► business logic     │
//! │                  Coordinator     Coordinator          │             │
//! │                      │               │                ▼             │
//! │                      │               │          Quota Service       │
//! │  ┌───────────────────▼───┐   ┌───────▼──────────────────────────┐   │
//! │  │  COORDINATION STORE   │   │        PERSISTENT STORE          │   │
//! │  │  claims, replays,     │   │  tenant rows, usage, history,    │   │
//! │  │  usage cache          │   │  transactions + savepoints       │   │
//! │  └───────────────────────┘   └──────────────────────────────────┘   │
//! │                                                                     │
//! │   RequestContext { principal, tenant, request, TransactionStack }   │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod context;
pub mod error;
pub mod store;

pub use config::{
    ConfigError, GovernanceConfig, IdempotencyConfig, QuotaConfig, RetentionConfig,
    TransactionConfig,
};
pub use context::{
    IsolationLevel, RequestContext, RequestInfo, SuspendedScope, TenantId, TransactionContext,
    TransactionHandle, TransactionStack,
};
pub use error::{StoreError, StoreResult};
pub use store::{CoordinationStore, InMemoryCoordinationStore};
