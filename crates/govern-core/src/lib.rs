//! Governance Core - multi-tenant request governance
//!
//! Decides whether an operation may run (quota), whether it already ran
//! (idempotency), and how its effects are committed or undone (transaction).
//!
//! ```text
//!  ┌─────────────────────────────── Governance ───────────────────────────────┐
//!  │                                                                          │
//!  │  run_governed(ctx, policy, options, work)                                │
//!  │     │                                                                    │
//!  │     ▼                                                                    │
//!  │  IdempotencyCoordinator ──► TransactionCoordinator ──► work(ctx)         │
//!  │     │ claims / replays          │ begin / commit /         │             │
//!  │     │                           │ rollback / savepoints    ▼             │
//!  │     ▼                           ▼                     QuotaService       │
//!  │  CoordinationStore          TransactionManager        (QuotaLedger)      │
//!  └──────────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod retention;

pub use error::GovernError;
pub use retention::run_retention;

pub use govern_common::{
    CoordinationStore, GovernanceConfig, InMemoryCoordinationStore, RequestContext, RequestInfo,
    TenantId,
};
pub use govern_idempotency::{IdempotencyCoordinator, IdempotencyError, IdempotencyPolicy};
pub use govern_quota::{
    InMemoryQuotaLedger, QuotaCheckResult, QuotaError, QuotaLedger, QuotaService, QuotaUpdate,
    ResourceType, TenantQuota,
};
pub use govern_tx::{
    Classify, Propagation, TransactionCoordinator, TransactionError, TransactionManager,
    TransactionOptions,
};

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// The three coordinators wired over shared stores
pub struct Governance {
    config: GovernanceConfig,
    idempotency: IdempotencyCoordinator,
    transactions: Arc<TransactionCoordinator>,
    quota: QuotaService,
}

impl Governance {
    /// Wire the coordinators over the given stores
    pub fn new(
        config: GovernanceConfig,
        store: Arc<dyn CoordinationStore>,
        ledger: Arc<dyn QuotaLedger>,
        manager: Arc<dyn TransactionManager>,
    ) -> Self {
        let transactions = Arc::new(
            TransactionCoordinator::new(manager)
                .with_default_isolation(config.transaction.isolation),
        );
        let quota =
            QuotaService::with_config(ledger, transactions.clone(), store.clone(), &config.quota);
        Self {
            idempotency: IdempotencyCoordinator::new(store),
            transactions,
            quota,
            config,
        }
    }

    /// Everything in memory; the ledger is returned for seeding tenants and users
    pub fn in_memory(config: GovernanceConfig) -> (Self, Arc<InMemoryQuotaLedger>) {
        let ledger = Arc::new(InMemoryQuotaLedger::new());
        let governance = Self::new(
            config,
            Arc::new(InMemoryCoordinationStore::new()),
            ledger.clone(),
            ledger.clone(),
        );
        (governance, ledger)
    }

    /// Configuration the coordinators were built from
    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    /// Idempotency coordinator over the shared coordination store
    pub fn idempotency(&self) -> &IdempotencyCoordinator {
        &self.idempotency
    }

    /// Transaction coordinator over the persistent store
    pub fn transactions(&self) -> &TransactionCoordinator {
        &self.transactions
    }

    /// Quota service
    pub fn quota(&self) -> &QuotaService {
        &self.quota
    }

    /// Idempotency policy built from the configured defaults
    pub fn default_policy(&self) -> IdempotencyPolicy {
        IdempotencyPolicy::from(&self.config.idempotency)
    }

    /// Run `work` deduplicated by `policy`, then inside a transaction shaped
    /// by `options`. A replayed result never opens a transaction.
    pub async fn run_governed<T, E, F, Fut>(
        &self,
        ctx: &RequestContext,
        policy: &IdempotencyPolicy,
        options: &TransactionOptions,
        work: F,
    ) -> Result<T, E>
    where
        F: FnOnce(RequestContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: Serialize + DeserializeOwned,
        E: From<IdempotencyError> + From<TransactionError> + Classify,
    {
        self.idempotency
            .with_idempotency(ctx, policy, |ctx| async move {
                self.transactions.with_transaction(&ctx, options, work).await
            })
            .await
    }

    /// One retention pass over daily API usage
    pub async fn run_retention_once(&self) -> Result<u64, GovernError> {
        let deleted = self.quota.reset_monthly_api_usage().await?;
        info!(deleted, "retention pass finished");
        Ok(deleted)
    }
}
