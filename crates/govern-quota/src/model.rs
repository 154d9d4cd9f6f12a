//! Quota Domain Model

use crate::error::QuotaError;
use chrono::{DateTime, NaiveDate, Utc};
use govern_common::TenantId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Quota value meaning "no limit"
pub const UNLIMITED: i64 = -1;

/// Per-tenant quota row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantQuota {
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Max active users
    pub user_quota: i64,
    /// Storage quota (MB)
    pub storage_quota_mb: i64,
    /// API calls per month
    pub api_quota_per_month: i64,
    /// Storage used (MB)
    pub storage_used_mb: i64,
}

impl TenantQuota {
    /// Unlimited quota with nothing used
    pub fn unlimited(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            user_quota: UNLIMITED,
            storage_quota_mb: UNLIMITED,
            api_quota_per_month: UNLIMITED,
            storage_used_mb: 0,
        }
    }

    /// Limit configured for a resource
    pub fn limit(&self, resource: ResourceType) -> i64 {
        match resource {
            ResourceType::User => self.user_quota,
            ResourceType::Storage => self.storage_quota_mb,
            ResourceType::Api => self.api_quota_per_month,
        }
    }
}

/// Resource a quota applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    /// Active users
    User,
    /// Stored data in MB
    Storage,
    /// API calls
    Api,
}

impl ResourceType {
    /// Every resource, in display order
    pub const ALL: [ResourceType; 3] = [Self::User, Self::Storage, Self::Api];

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Storage => "storage",
            Self::Api => "api",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = QuotaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "storage" => Ok(Self::Storage),
            "api" => Ok(Self::Api),
            other => Err(QuotaError::InvalidArgument(format!(
                "unknown resource type: {other}"
            ))),
        }
    }
}

/// Quota field recorded in change history
pub type QuotaType = ResourceType;

/// Usage health derived from usage rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaStatus {
    /// Below the warning threshold
    Normal,
    /// At or above 80%
    Warning,
    /// At or above 100%
    Danger,
}

/// Append-only audit of a quota limit change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaChangeRecord {
    /// Record id
    pub id: Uuid,
    /// Tenant whose limit changed
    pub tenant_id: TenantId,
    /// Which limit changed
    pub quota_type: QuotaType,
    /// Limit before the change
    pub old_value: i64,
    /// Limit after the change
    pub new_value: i64,
    /// Principal that made the change
    pub changed_by: String,
    /// When the change was made
    pub change_time: DateTime<Utc>,
}

impl QuotaChangeRecord {
    /// Record stamped with a fresh id and the current time
    pub fn new(
        tenant_id: TenantId,
        quota_type: QuotaType,
        old_value: i64,
        new_value: i64,
        changed_by: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            quota_type,
            old_value,
            new_value,
            changed_by: changed_by.into(),
            change_time: Utc::now(),
        }
    }
}

/// Daily API call tally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiUsageRecord {
    /// Tenant that made the calls
    pub tenant_id: TenantId,
    /// UTC calendar day
    pub date: NaiveDate,
    /// Calls made that day
    pub count: i64,
}

/// Point-in-time usage of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    /// Resource measured
    pub resource_type: ResourceType,
    /// Current usage
    pub used: i64,
    /// Configured limit, `UNLIMITED` for none
    pub limit: i64,
    /// Percentage of the limit in use
    pub usage_rate: f64,
    /// Health of this resource alone
    pub status: QuotaStatus,
}

/// Outcome of a quota check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaCheckResult {
    /// Whether the requested increment fits
    pub allowed: bool,
    /// Usage before the increment
    pub used: i64,
    /// Configured limit
    pub limit: i64,
    /// Percentage of the limit in use
    pub usage_rate: f64,
    /// Headroom left; `UNLIMITED` when there is no limit
    pub remaining: i64,
    /// Human-readable outcome
    pub message: String,
}

/// Requested limit changes; `None` leaves a limit untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUpdate {
    /// New max active users
    pub user_quota: Option<i64>,
    /// New storage quota (MB)
    pub storage_quota_mb: Option<i64>,
    /// New API calls per month
    pub api_quota_per_month: Option<i64>,
}

impl QuotaUpdate {
    /// Set the user limit
    pub fn user(mut self, value: i64) -> Self {
        self.user_quota = Some(value);
        self
    }

    /// Set the storage limit
    pub fn storage(mut self, value: i64) -> Self {
        self.storage_quota_mb = Some(value);
        self
    }

    /// Set the API limit
    pub fn api(mut self, value: i64) -> Self {
        self.api_quota_per_month = Some(value);
        self
    }

    pub(crate) fn fields(&self) -> [(QuotaType, Option<i64>); 3] {
        [
            (ResourceType::User, self.user_quota),
            (ResourceType::Storage, self.storage_quota_mb),
            (ResourceType::Api, self.api_quota_per_month),
        ]
    }
}

/// Dashboard view of every resource for a tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaUsageOverview {
    /// Tenant described
    pub tenant_id: TenantId,
    /// One snapshot per resource
    pub resources: Vec<UsageSnapshot>,
    /// Worst status across resources
    pub status: QuotaStatus,
}
