//! Quota Service
//!
//! Per-tenant limits on three resources and the usage they are checked
//! against:
//!
//! ```text
//! ┌──────────┬──────────────────────────────┬────────────────────────────┐
//! │ resource │ usage source                 │ increment / decrement      │
//! ├──────────┼──────────────────────────────┼────────────────────────────┤
//! │ user     │ live count of active users   │ no-op / no-op              │
//! │ storage  │ tenant row storage_used_mb   │ add / subtract, clamp at 0 │
//! │ api      │ today's daily tally (cached) │ upsert / no-op             │
//! └──────────┴──────────────────────────────┴────────────────────────────┘
//! ```
//!
//! A limit of `-1` means unlimited. Limit changes and their audit records are
//! written in one transaction. Usage writes join the caller's transaction.

#![warn(missing_docs)]

pub mod error;
pub mod ledger;
pub mod model;
pub mod service;

pub use error::{QuotaError, QuotaResult};
pub use ledger::{InMemoryQuotaLedger, QuotaLedger};
pub use model::{
    ApiUsageRecord, QuotaChangeRecord, QuotaCheckResult, QuotaStatus, QuotaType, QuotaUpdate,
    QuotaUsageOverview, ResourceType, TenantQuota, UsageSnapshot, UNLIMITED,
};
pub use service::{
    calculate_status, calculate_usage_rate, previous_month_start, QuotaService,
    DANGER_THRESHOLD, DEFAULT_USAGE_CACHE_TTL, WARNING_THRESHOLD,
};
