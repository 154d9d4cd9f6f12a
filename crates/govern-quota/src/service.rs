//! Quota Service - checks, usage metering and limit changes

use crate::error::{QuotaError, QuotaResult};
use crate::ledger::QuotaLedger;
use crate::model::{
    QuotaChangeRecord, QuotaCheckResult, QuotaStatus, QuotaUpdate, QuotaUsageOverview,
    ResourceType, TenantQuota, UsageSnapshot, UNLIMITED,
};
use chrono::{Datelike, Months, NaiveDate, Utc};
use govern_common::{
    CoordinationStore, QuotaConfig, RequestContext, StoreError, TenantId, TransactionHandle,
};
use govern_tx::{TransactionCoordinator, TransactionOptions};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Max staleness of cached usage figures unless configured otherwise
pub const DEFAULT_USAGE_CACHE_TTL: Duration = Duration::from_secs(60);

/// Usage rate at which a resource turns `Warning`
pub const WARNING_THRESHOLD: f64 = 80.0;

/// Usage rate at which a resource turns `Danger`
pub const DANGER_THRESHOLD: f64 = 100.0;

/// `used / quota` as a percentage rounded to 2 decimals.
///
/// Unlimited quotas report 0. A zero quota reports 100 once anything is used.
pub fn calculate_usage_rate(used: i64, quota: i64) -> f64 {
    if quota < 0 {
        return 0.0;
    }
    if quota == 0 {
        return if used > 0 { 100.0 } else { 0.0 };
    }
    let rate = used as f64 / quota as f64 * 100.0;
    (rate * 100.0).round() / 100.0
}

/// Status of the worst resource
pub fn calculate_status(rates: &[f64]) -> QuotaStatus {
    let worst = rates.iter().copied().fold(0.0_f64, f64::max);
    if worst >= DANGER_THRESHOLD {
        QuotaStatus::Danger
    } else if worst >= WARNING_THRESHOLD {
        QuotaStatus::Warning
    } else {
        QuotaStatus::Normal
    }
}

/// First day of the month before the one containing `today`
pub fn previous_month_start(today: NaiveDate) -> NaiveDate {
    let month_start = today.with_day(1).unwrap_or(today);
    month_start
        .checked_sub_months(Months::new(1))
        .unwrap_or(month_start)
}

/// Per-tenant quota enforcement
pub struct QuotaService {
    ledger: Arc<dyn QuotaLedger>,
    transactions: Arc<TransactionCoordinator>,
    cache: Arc<dyn CoordinationStore>,
    cache_ttl: Duration,
    cache_prefix: String,
}

impl QuotaService {
    /// Service with the default cache settings
    pub fn new(
        ledger: Arc<dyn QuotaLedger>,
        transactions: Arc<TransactionCoordinator>,
        cache: Arc<dyn CoordinationStore>,
    ) -> Self {
        Self::with_config(ledger, transactions, cache, &QuotaConfig::default())
    }

    /// Service with cache TTL and key prefix taken from `config`
    pub fn with_config(
        ledger: Arc<dyn QuotaLedger>,
        transactions: Arc<TransactionCoordinator>,
        cache: Arc<dyn CoordinationStore>,
        config: &QuotaConfig,
    ) -> Self {
        Self {
            ledger,
            transactions,
            cache,
            cache_ttl: config.usage_cache_ttl(),
            cache_prefix: config.cache_key_prefix.clone(),
        }
    }

    /// Whether `increment` more units of `resource` fit the tenant's quota.
    /// Read-only. Reads run under `ctx`'s active transaction, if any.
    pub async fn check_quota(
        &self,
        ctx: &RequestContext,
        tenant_id: TenantId,
        resource: ResourceType,
        increment: i64,
    ) -> QuotaResult<QuotaCheckResult> {
        if increment < 0 {
            return Err(QuotaError::InvalidArgument(format!(
                "increment must be non-negative, got {increment}"
            )));
        }

        let tx = ctx.transaction_handle();
        let quota = self.tenant_quota(tx.as_ref(), tenant_id).await?;
        let limit = quota.limit(resource);
        let used = self.current_usage(tx.as_ref(), &quota, resource).await?;

        let allowed = limit == UNLIMITED || used.saturating_add(increment) <= limit;
        let remaining = if limit == UNLIMITED { UNLIMITED } else { (limit - used).max(0) };
        let message = if allowed {
            format!("{resource} quota ok")
        } else {
            format!("{resource} quota exceeded: {used} of {limit} used, {increment} requested")
        };

        debug!(tenant = %tenant_id, %resource, used, limit, increment, allowed, "quota check");

        Ok(QuotaCheckResult {
            allowed,
            used,
            limit,
            usage_rate: calculate_usage_rate(used, limit),
            remaining,
            message,
        })
    }

    /// Record consumption of `amount` units. The write joins `ctx`'s active
    /// transaction and is undone if that transaction rolls back.
    pub async fn increment_usage(
        &self,
        ctx: &RequestContext,
        tenant_id: TenantId,
        resource: ResourceType,
        amount: i64,
    ) -> QuotaResult<()> {
        ensure_amount(amount)?;
        let tx = ctx.transaction_handle();
        match resource {
            ResourceType::User => {
                debug!(tenant = %tenant_id, "user usage is counted live, increment ignored");
                return Ok(());
            }
            ResourceType::Storage => {
                let used = self
                    .ledger
                    .adjust_storage_used(tx.as_ref(), tenant_id, amount)
                    .await
                    .map_err(tenant_not_found)?;
                debug!(tenant = %tenant_id, amount, used, "storage usage incremented");
            }
            ResourceType::Api => {
                self.tenant_quota(tx.as_ref(), tenant_id).await?;
                let count = self.ledger.add_api_usage(tx.as_ref(), tenant_id, today(), amount).await?;
                debug!(tenant = %tenant_id, amount, count, "api usage incremented");
            }
        }
        self.evict(tenant_id, resource).await;
        Ok(())
    }

    /// Release `amount` units. API calls stay counted once made.
    pub async fn decrement_usage(
        &self,
        ctx: &RequestContext,
        tenant_id: TenantId,
        resource: ResourceType,
        amount: i64,
    ) -> QuotaResult<()> {
        ensure_amount(amount)?;
        match resource {
            ResourceType::User => {
                debug!(tenant = %tenant_id, "user usage is counted live, decrement ignored");
            }
            ResourceType::Api => {
                debug!(tenant = %tenant_id, amount, "api usage cannot be decremented");
            }
            ResourceType::Storage => {
                let tx = ctx.transaction_handle();
                let used = self
                    .ledger
                    .adjust_storage_used(tx.as_ref(), tenant_id, -amount)
                    .await
                    .map_err(tenant_not_found)?;
                debug!(tenant = %tenant_id, amount, used, "storage usage decremented");
                self.evict(tenant_id, resource).await;
            }
        }
        Ok(())
    }

    /// Apply limit changes and record one history entry per changed limit,
    /// all in one transaction. Returns the records written.
    pub async fn update_quota(
        &self,
        ctx: &RequestContext,
        tenant_id: TenantId,
        update: &QuotaUpdate,
        changed_by: &str,
    ) -> QuotaResult<Vec<QuotaChangeRecord>> {
        for (quota_type, value) in update.fields() {
            if let Some(value) = value.filter(|v| *v < UNLIMITED) {
                return Err(QuotaError::InvalidArgument(format!(
                    "{quota_type} quota must be -1 or non-negative, got {value}"
                )));
            }
        }

        let options = TransactionOptions::required().named("update_quota");
        let records = self
            .transactions
            .with_transaction(ctx, &options, |ctx| async move {
                let tx = ctx.transaction_handle();
                let mut quota = self.tenant_quota(tx.as_ref(), tenant_id).await?;

                let mut records = Vec::new();
                for (quota_type, value) in update.fields() {
                    let Some(new_value) = value else { continue };
                    let field = match quota_type {
                        ResourceType::User => &mut quota.user_quota,
                        ResourceType::Storage => &mut quota.storage_quota_mb,
                        ResourceType::Api => &mut quota.api_quota_per_month,
                    };
                    if *field != new_value {
                        records.push(QuotaChangeRecord::new(
                            tenant_id, quota_type, *field, new_value, changed_by,
                        ));
                        *field = new_value;
                    }
                }

                if records.is_empty() {
                    return Ok(records);
                }

                self.ledger.update_quota_limits(tx.as_ref(), &quota).await?;
                for record in &records {
                    self.ledger.insert_change_record(tx.as_ref(), record).await?;
                }
                Ok::<_, QuotaError>(records)
            })
            .await?;

        for record in &records {
            info!(
                tenant = %tenant_id,
                quota_type = %record.quota_type,
                old = record.old_value,
                new = record.new_value,
                changed_by,
                "quota changed"
            );
        }
        Ok(records)
    }

    /// Purge daily API tallies older than the start of last month
    pub async fn reset_monthly_api_usage(&self) -> QuotaResult<u64> {
        self.reset_monthly_api_usage_at(today()).await
    }

    /// `reset_monthly_api_usage` as if run on `today`
    pub async fn reset_monthly_api_usage_at(&self, today: NaiveDate) -> QuotaResult<u64> {
        let cutoff = previous_month_start(today);
        match self.ledger.delete_api_usage_before(None, cutoff).await {
            Ok(deleted) => {
                info!(%cutoff, deleted, "api usage retention completed");
                Ok(deleted)
            }
            Err(err) => {
                error!(%cutoff, error = %err, "api usage retention failed");
                Err(err.into())
            }
        }
    }

    /// Every resource's usage and the overall status
    pub async fn usage_overview(
        &self,
        ctx: &RequestContext,
        tenant_id: TenantId,
    ) -> QuotaResult<QuotaUsageOverview> {
        let tx = ctx.transaction_handle();
        let quota = self.tenant_quota(tx.as_ref(), tenant_id).await?;
        let mut resources = Vec::with_capacity(ResourceType::ALL.len());
        for resource in ResourceType::ALL {
            let used = self.current_usage(tx.as_ref(), &quota, resource).await?;
            let limit = quota.limit(resource);
            let usage_rate = calculate_usage_rate(used, limit);
            resources.push(UsageSnapshot {
                resource_type: resource,
                used,
                limit,
                usage_rate,
                status: calculate_status(&[usage_rate]),
            });
        }
        let rates: Vec<f64> = resources.iter().map(|r| r.usage_rate).collect();
        Ok(QuotaUsageOverview {
            tenant_id,
            status: calculate_status(&rates),
            resources,
        })
    }

    /// Limit changes for a tenant, newest first
    pub async fn quota_history(
        &self,
        ctx: &RequestContext,
        tenant_id: TenantId,
    ) -> QuotaResult<Vec<QuotaChangeRecord>> {
        let tx = ctx.transaction_handle();
        self.tenant_quota(tx.as_ref(), tenant_id).await?;
        Ok(self.ledger.change_history(tx.as_ref(), tenant_id).await?)
    }

    async fn tenant_quota(
        &self,
        tx: Option<&TransactionHandle>,
        tenant_id: TenantId,
    ) -> QuotaResult<TenantQuota> {
        self.ledger
            .get_tenant_quota(tx, tenant_id)
            .await?
            .ok_or_else(|| QuotaError::NotFound(tenant_id.to_string()))
    }

    /// Inside a transaction the usage cache is neither read nor written
    async fn current_usage(
        &self,
        tx: Option<&TransactionHandle>,
        quota: &TenantQuota,
        resource: ResourceType,
    ) -> QuotaResult<i64> {
        let tenant_id = quota.tenant_id;
        match resource {
            ResourceType::User => Ok(self.ledger.count_active_users(tx, tenant_id).await?),
            ResourceType::Storage => Ok(quota.storage_used_mb),
            ResourceType::Api => {
                let today = today();
                if tx.is_some() {
                    return Ok(self.ledger.api_usage_on(tx, tenant_id, today).await?);
                }
                let key = self.api_cache_key(tenant_id, today);
                if let Some(cached) = self.cached_usage(&key).await {
                    return Ok(cached);
                }
                let used = self.ledger.api_usage_on(None, tenant_id, today).await?;
                self.cache_usage(&key, used).await;
                Ok(used)
            }
        }
    }

    /// Daily tallies are keyed by date so a new day never reads yesterday's entry
    fn api_cache_key(&self, tenant_id: TenantId, date: NaiveDate) -> String {
        format!("{}{}:{}:{}", self.cache_prefix, tenant_id, ResourceType::Api, date)
    }

    async fn cached_usage(&self, key: &str) -> Option<i64> {
        match self.cache.get(key).await {
            Ok(Some(value)) => match value.parse() {
                Ok(used) => Some(used),
                Err(_) => {
                    warn!(key = %key, value = %value, "discarding unreadable usage cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(key = %key, error = %err, "usage cache read failed, using ledger");
                None
            }
        }
    }

    async fn cache_usage(&self, key: &str, used: i64) {
        if let Err(err) = self.cache.set(key, &used.to_string(), self.cache_ttl).await {
            warn!(key = %key, error = %err, "usage cache write failed");
        }
    }

    async fn evict(&self, tenant_id: TenantId, resource: ResourceType) {
        if resource != ResourceType::Api {
            return;
        }
        let key = self.api_cache_key(tenant_id, today());
        if let Err(err) = self.cache.delete(&key).await {
            warn!(key = %key, error = %err, "usage cache eviction failed");
        }
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn ensure_amount(amount: i64) -> QuotaResult<()> {
    if amount < 0 {
        return Err(QuotaError::InvalidArgument(format!(
            "amount must be non-negative, got {amount}"
        )));
    }
    Ok(())
}

fn tenant_not_found(err: StoreError) -> QuotaError {
    match err {
        StoreError::NotFound(what) => QuotaError::NotFound(what),
        other => QuotaError::Store(other),
    }
}
