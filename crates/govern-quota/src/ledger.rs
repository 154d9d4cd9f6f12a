//! Quota Ledger - persistence for tenant quotas, usage and change history
//!
//! Every method takes the transaction it runs under, if any. Writes made under
//! a transaction are undone when that transaction (or an enclosing savepoint)
//! rolls back.

use crate::model::{ApiUsageRecord, QuotaChangeRecord, TenantQuota};
use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use govern_common::{IsolationLevel, StoreError, StoreResult, TenantId, TransactionHandle};
use govern_tx::{SavepointId, TransactionManager};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;
use uuid::Uuid;

/// Persistent store behind the quota service
#[async_trait]
pub trait QuotaLedger: Send + Sync {
    /// Tenant quota row
    async fn get_tenant_quota(
        &self,
        tx: Option<&TransactionHandle>,
        tenant_id: TenantId,
    ) -> StoreResult<Option<TenantQuota>>;

    /// Overwrite the limit fields of an existing row (usage is left alone)
    async fn update_quota_limits(
        &self,
        tx: Option<&TransactionHandle>,
        quota: &TenantQuota,
    ) -> StoreResult<()>;

    /// Add `delta_mb` to stored usage, clamping at zero. Returns the new value.
    async fn adjust_storage_used(
        &self,
        tx: Option<&TransactionHandle>,
        tenant_id: TenantId,
        delta_mb: i64,
    ) -> StoreResult<i64>;

    /// Append a change record
    async fn insert_change_record(
        &self,
        tx: Option<&TransactionHandle>,
        record: &QuotaChangeRecord,
    ) -> StoreResult<()>;

    /// Change records, newest first
    async fn change_history(
        &self,
        tx: Option<&TransactionHandle>,
        tenant_id: TenantId,
    ) -> StoreResult<Vec<QuotaChangeRecord>>;

    /// Live count of active users
    async fn count_active_users(
        &self,
        tx: Option<&TransactionHandle>,
        tenant_id: TenantId,
    ) -> StoreResult<i64>;

    /// Upsert the daily API tally. Returns the new count.
    async fn add_api_usage(
        &self,
        tx: Option<&TransactionHandle>,
        tenant_id: TenantId,
        date: NaiveDate,
        amount: i64,
    ) -> StoreResult<i64>;

    /// API calls recorded on `date`
    async fn api_usage_on(
        &self,
        tx: Option<&TransactionHandle>,
        tenant_id: TenantId,
        date: NaiveDate,
    ) -> StoreResult<i64>;

    /// Delete every daily tally dated before `cutoff`. Returns rows deleted.
    async fn delete_api_usage_before(
        &self,
        tx: Option<&TransactionHandle>,
        cutoff: NaiveDate,
    ) -> StoreResult<u64>;
}

#[derive(Default)]
struct LedgerState {
    tenants: HashMap<TenantId, TenantQuota>,
    history: Vec<QuotaChangeRecord>,
    api_usage: HashMap<(TenantId, NaiveDate), i64>,
}

/// Inverse of one write. Only the fields the transaction touched are
/// restored, so writes made outside it survive a rollback.
enum Undo {
    Limits {
        tenant_id: TenantId,
        user: i64,
        storage: i64,
        api: i64,
    },
    /// Storage change actually applied, after clamping
    StorageDelta {
        tenant_id: TenantId,
        applied: i64,
    },
    ChangeRecord(Uuid),
    ApiUsage {
        key: (TenantId, NaiveDate),
        previous: Option<i64>,
    },
}

struct OpenTransaction {
    journal: Vec<Undo>,
    savepoints: Vec<(SavepointId, usize)>,
}

/// In-memory quota ledger (for testing and development).
///
/// Doubles as the transaction manager for its own writes: each open
/// transaction keeps an undo journal, and savepoints remember a position in
/// it. Uncommitted writes are visible to other readers.
#[derive(Default)]
pub struct InMemoryQuotaLedger {
    state: RwLock<LedgerState>,
    users: DashMap<TenantId, HashSet<Uuid>>,
    open: Mutex<HashMap<Uuid, OpenTransaction>>,
    next_savepoint: AtomicU64,
    fail_history_inserts: AtomicBool,
}

impl InMemoryQuotaLedger {
    /// Empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or replace a tenant row
    pub fn insert_tenant(&self, quota: TenantQuota) {
        self.state.write().tenants.insert(quota.tenant_id, quota);
    }

    /// Register an active user, returning its id
    pub fn add_user(&self, tenant_id: TenantId) -> Uuid {
        let user_id = Uuid::new_v4();
        self.users.entry(tenant_id).or_default().insert(user_id);
        user_id
    }

    /// Deactivate a user
    pub fn remove_user(&self, tenant_id: TenantId, user_id: Uuid) -> bool {
        self.users
            .get_mut(&tenant_id)
            .map(|mut users| users.remove(&user_id))
            .unwrap_or(false)
    }

    /// Every daily tally, oldest first
    pub fn api_usage_records(&self) -> Vec<ApiUsageRecord> {
        let mut records: Vec<_> = self
            .state
            .read()
            .api_usage
            .iter()
            .map(|(&(tenant_id, date), &count)| ApiUsageRecord { tenant_id, date, count })
            .collect();
        records.sort_by_key(|r| (r.date, r.tenant_id));
        records
    }

    /// Transactions begun and not yet finished
    pub fn open_transactions(&self) -> usize {
        self.open.lock().len()
    }

    /// Make change-record inserts fail with a backend error
    pub fn fail_history_inserts(&self, fail: bool) {
        self.fail_history_inserts.store(fail, Ordering::Relaxed);
    }

    fn ensure_open(&self, tx: Option<&TransactionHandle>) -> StoreResult<()> {
        match tx {
            Some(tx) if !self.open.lock().contains_key(&tx.id()) => {
                Err(StoreError::NotFound(format!("transaction {}", tx.id())))
            }
            _ => Ok(()),
        }
    }

    fn journal(&self, tx: Option<&TransactionHandle>, undo: Vec<Undo>) {
        if let Some(tx) = tx {
            if let Some(open) = self.open.lock().get_mut(&tx.id()) {
                open.journal.extend(undo);
            }
        }
    }

    fn apply_undo(&self, entries: Vec<Undo>) {
        let mut state = self.state.write();
        for undo in entries.into_iter().rev() {
            match undo {
                Undo::Limits { tenant_id, user, storage, api } => {
                    if let Some(row) = state.tenants.get_mut(&tenant_id) {
                        row.user_quota = user;
                        row.storage_quota_mb = storage;
                        row.api_quota_per_month = api;
                    }
                }
                Undo::StorageDelta { tenant_id, applied } => {
                    if let Some(row) = state.tenants.get_mut(&tenant_id) {
                        row.storage_used_mb = row.storage_used_mb.saturating_sub(applied).max(0);
                    }
                }
                Undo::ChangeRecord(id) => state.history.retain(|r| r.id != id),
                Undo::ApiUsage { key, previous: Some(count) } => {
                    state.api_usage.insert(key, count);
                }
                Undo::ApiUsage { key, previous: None } => {
                    state.api_usage.remove(&key);
                }
            }
        }
    }

    fn take_transaction(&self, tx: &TransactionHandle) -> StoreResult<OpenTransaction> {
        self.open
            .lock()
            .remove(&tx.id())
            .ok_or_else(|| StoreError::NotFound(format!("transaction {}", tx.id())))
    }

    /// Drop the savepoint and everything after it, returning the journal
    /// entries written since it was created.
    fn unwind_to(&self, tx: &TransactionHandle, savepoint: SavepointId) -> StoreResult<Vec<Undo>> {
        let mut open = self.open.lock();
        let transaction = open
            .get_mut(&tx.id())
            .ok_or_else(|| StoreError::NotFound(format!("transaction {}", tx.id())))?;
        let index = transaction
            .savepoints
            .iter()
            .position(|(id, _)| *id == savepoint)
            .ok_or_else(|| StoreError::NotFound(format!("savepoint {}", savepoint.0)))?;
        let (_, mark) = transaction.savepoints[index];
        transaction.savepoints.truncate(index);
        Ok(transaction.journal.split_off(mark))
    }
}

#[async_trait]
impl QuotaLedger for InMemoryQuotaLedger {
    async fn get_tenant_quota(
        &self,
        _tx: Option<&TransactionHandle>,
        tenant_id: TenantId,
    ) -> StoreResult<Option<TenantQuota>> {
        Ok(self.state.read().tenants.get(&tenant_id).cloned())
    }

    async fn update_quota_limits(
        &self,
        tx: Option<&TransactionHandle>,
        quota: &TenantQuota,
    ) -> StoreResult<()> {
        self.ensure_open(tx)?;
        let undo = {
            let mut state = self.state.write();
            let row = state
                .tenants
                .get_mut(&quota.tenant_id)
                .ok_or_else(|| StoreError::NotFound(format!("tenant {}", quota.tenant_id)))?;
            let undo = Undo::Limits {
                tenant_id: row.tenant_id,
                user: row.user_quota,
                storage: row.storage_quota_mb,
                api: row.api_quota_per_month,
            };
            row.user_quota = quota.user_quota;
            row.storage_quota_mb = quota.storage_quota_mb;
            row.api_quota_per_month = quota.api_quota_per_month;
            undo
        };
        self.journal(tx, vec![undo]);
        Ok(())
    }

    async fn adjust_storage_used(
        &self,
        tx: Option<&TransactionHandle>,
        tenant_id: TenantId,
        delta_mb: i64,
    ) -> StoreResult<i64> {
        self.ensure_open(tx)?;
        let (applied, used) = {
            let mut state = self.state.write();
            let row = state
                .tenants
                .get_mut(&tenant_id)
                .ok_or_else(|| StoreError::NotFound(format!("tenant {tenant_id}")))?;
            let before = row.storage_used_mb;
            row.storage_used_mb = before.saturating_add(delta_mb).max(0);
            (row.storage_used_mb - before, row.storage_used_mb)
        };
        self.journal(tx, vec![Undo::StorageDelta { tenant_id, applied }]);
        Ok(used)
    }

    async fn insert_change_record(
        &self,
        tx: Option<&TransactionHandle>,
        record: &QuotaChangeRecord,
    ) -> StoreResult<()> {
        self.ensure_open(tx)?;
        if self.fail_history_inserts.load(Ordering::Relaxed) {
            return Err(StoreError::Backend("change record insert failed".into()));
        }
        self.state.write().history.push(record.clone());
        self.journal(tx, vec![Undo::ChangeRecord(record.id)]);
        Ok(())
    }

    async fn change_history(
        &self,
        _tx: Option<&TransactionHandle>,
        tenant_id: TenantId,
    ) -> StoreResult<Vec<QuotaChangeRecord>> {
        let state = self.state.read();
        // Insertion order breaks ties between records written in the same instant.
        let mut records: Vec<_> = state
            .history
            .iter()
            .enumerate()
            .filter(|(_, r)| r.tenant_id == tenant_id)
            .collect();
        records.sort_by(|(ia, a), (ib, b)| b.change_time.cmp(&a.change_time).then(ib.cmp(ia)));
        Ok(records.into_iter().map(|(_, r)| r.clone()).collect())
    }

    async fn count_active_users(
        &self,
        _tx: Option<&TransactionHandle>,
        tenant_id: TenantId,
    ) -> StoreResult<i64> {
        Ok(self.users.get(&tenant_id).map(|u| u.len() as i64).unwrap_or(0))
    }

    async fn add_api_usage(
        &self,
        tx: Option<&TransactionHandle>,
        tenant_id: TenantId,
        date: NaiveDate,
        amount: i64,
    ) -> StoreResult<i64> {
        self.ensure_open(tx)?;
        let key = (tenant_id, date);
        let (previous, count) = {
            let mut state = self.state.write();
            let previous = state.api_usage.get(&key).copied();
            let count = previous.unwrap_or(0).saturating_add(amount);
            state.api_usage.insert(key, count);
            (previous, count)
        };
        self.journal(tx, vec![Undo::ApiUsage { key, previous }]);
        Ok(count)
    }

    async fn api_usage_on(
        &self,
        _tx: Option<&TransactionHandle>,
        tenant_id: TenantId,
        date: NaiveDate,
    ) -> StoreResult<i64> {
        Ok(self.state.read().api_usage.get(&(tenant_id, date)).copied().unwrap_or(0))
    }

    async fn delete_api_usage_before(
        &self,
        tx: Option<&TransactionHandle>,
        cutoff: NaiveDate,
    ) -> StoreResult<u64> {
        self.ensure_open(tx)?;
        let removed: Vec<Undo> = {
            let mut state = self.state.write();
            let expired: Vec<_> = state
                .api_usage
                .keys()
                .filter(|(_, date)| *date < cutoff)
                .copied()
                .collect();
            expired
                .into_iter()
                .filter_map(|key| {
                    state
                        .api_usage
                        .remove(&key)
                        .map(|count| Undo::ApiUsage { key, previous: Some(count) })
                })
                .collect()
        };
        let deleted = removed.len() as u64;
        self.journal(tx, removed);
        Ok(deleted)
    }
}

#[async_trait]
impl TransactionManager for InMemoryQuotaLedger {
    async fn begin(&self, isolation: IsolationLevel) -> StoreResult<TransactionHandle> {
        let handle = TransactionHandle::new(isolation);
        self.open.lock().insert(
            handle.id(),
            OpenTransaction {
                journal: Vec::new(),
                savepoints: Vec::new(),
            },
        );
        debug!(tx = %handle.id(), ?isolation, "ledger transaction opened");
        Ok(handle)
    }

    async fn commit(&self, tx: &TransactionHandle) -> StoreResult<()> {
        let transaction = self.take_transaction(tx)?;
        debug!(tx = %tx.id(), writes = transaction.journal.len(), "ledger transaction committed");
        Ok(())
    }

    async fn rollback(&self, tx: &TransactionHandle) -> StoreResult<()> {
        let transaction = self.take_transaction(tx)?;
        debug!(tx = %tx.id(), writes = transaction.journal.len(), "ledger transaction rolled back");
        self.apply_undo(transaction.journal);
        Ok(())
    }

    async fn create_savepoint(&self, tx: &TransactionHandle) -> StoreResult<SavepointId> {
        let savepoint = SavepointId(self.next_savepoint.fetch_add(1, Ordering::Relaxed));
        let mut open = self.open.lock();
        let transaction = open
            .get_mut(&tx.id())
            .ok_or_else(|| StoreError::NotFound(format!("transaction {}", tx.id())))?;
        let mark = transaction.journal.len();
        transaction.savepoints.push((savepoint, mark));
        Ok(savepoint)
    }

    async fn rollback_to_savepoint(
        &self,
        tx: &TransactionHandle,
        savepoint: SavepointId,
    ) -> StoreResult<()> {
        let undone = self.unwind_to(tx, savepoint)?;
        self.apply_undo(undone);
        Ok(())
    }

    async fn release_savepoint(
        &self,
        tx: &TransactionHandle,
        savepoint: SavepointId,
    ) -> StoreResult<()> {
        let mut open = self.open.lock();
        let transaction = open
            .get_mut(&tx.id())
            .ok_or_else(|| StoreError::NotFound(format!("transaction {}", tx.id())))?;
        let index = transaction
            .savepoints
            .iter()
            .position(|(id, _)| *id == savepoint)
            .ok_or_else(|| StoreError::NotFound(format!("savepoint {}", savepoint.0)))?;
        transaction.savepoints.truncate(index);
        Ok(())
    }
}
