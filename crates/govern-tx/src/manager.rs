//! Transaction Manager - the persistent store's transaction primitive

use async_trait::async_trait;
use govern_common::{IsolationLevel, StoreError, StoreResult, TransactionHandle};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use uuid::Uuid;

/// Savepoint inside an open transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SavepointId(pub u64);

/// Begin/commit/rollback plus savepoints, implemented by the persistent store
#[async_trait]
pub trait TransactionManager: Send + Sync {
    /// Open a transaction at the given isolation
    async fn begin(&self, isolation: IsolationLevel) -> StoreResult<TransactionHandle>;

    /// Make the transaction's writes durable
    async fn commit(&self, tx: &TransactionHandle) -> StoreResult<()>;

    /// Discard the transaction's writes
    async fn rollback(&self, tx: &TransactionHandle) -> StoreResult<()>;

    /// Mark a point the transaction can later roll back to
    async fn create_savepoint(&self, tx: &TransactionHandle) -> StoreResult<SavepointId>;

    /// Discard writes made after the savepoint
    async fn rollback_to_savepoint(
        &self,
        tx: &TransactionHandle,
        savepoint: SavepointId,
    ) -> StoreResult<()>;

    /// Forget the savepoint, keeping its writes
    async fn release_savepoint(
        &self,
        tx: &TransactionHandle,
        savepoint: SavepointId,
    ) -> StoreResult<()>;
}

/// Something that happened to a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionEvent {
    /// `begin`
    Begin(Uuid, IsolationLevel),
    /// `commit`
    Commit(Uuid),
    /// `rollback`
    Rollback(Uuid),
    /// `create_savepoint`
    Savepoint(Uuid, SavepointId),
    /// `rollback_to_savepoint`
    RollbackToSavepoint(Uuid, SavepointId),
    /// `release_savepoint`
    ReleaseSavepoint(Uuid, SavepointId),
}

/// In-memory transaction manager that only records what was asked of it
/// (for testing coordinators without a real store)
#[derive(Default)]
pub struct InMemoryTransactionManager {
    open: Mutex<HashMap<Uuid, Vec<SavepointId>>>,
    events: Mutex<Vec<TransactionEvent>>,
    next_savepoint: AtomicU64,
    fail_commits: AtomicBool,
}

impl InMemoryTransactionManager {
    /// Manager with no open transactions
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far
    pub fn events(&self) -> Vec<TransactionEvent> {
        self.events.lock().clone()
    }

    /// Number of transactions begun and not yet finished
    pub fn open_transactions(&self) -> usize {
        self.open.lock().len()
    }

    /// Make every subsequent commit fail with a backend error
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::Relaxed);
    }

    fn record(&self, event: TransactionEvent) {
        self.events.lock().push(event);
    }

    fn close(&self, tx: &TransactionHandle) -> StoreResult<()> {
        self.open
            .lock()
            .remove(&tx.id())
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("transaction {}", tx.id())))
    }
}

#[async_trait]
impl TransactionManager for InMemoryTransactionManager {
    async fn begin(&self, isolation: IsolationLevel) -> StoreResult<TransactionHandle> {
        let handle = TransactionHandle::new(isolation);
        self.open.lock().insert(handle.id(), Vec::new());
        self.record(TransactionEvent::Begin(handle.id(), isolation));
        Ok(handle)
    }

    async fn commit(&self, tx: &TransactionHandle) -> StoreResult<()> {
        if self.fail_commits.load(Ordering::Relaxed) {
            return Err(StoreError::Backend("commit failed".into()));
        }
        self.close(tx)?;
        self.record(TransactionEvent::Commit(tx.id()));
        Ok(())
    }

    async fn rollback(&self, tx: &TransactionHandle) -> StoreResult<()> {
        self.close(tx)?;
        self.record(TransactionEvent::Rollback(tx.id()));
        Ok(())
    }

    async fn create_savepoint(&self, tx: &TransactionHandle) -> StoreResult<SavepointId> {
        let savepoint = SavepointId(self.next_savepoint.fetch_add(1, Ordering::Relaxed));
        self.open
            .lock()
            .get_mut(&tx.id())
            .ok_or_else(|| StoreError::NotFound(format!("transaction {}", tx.id())))?
            .push(savepoint);
        self.record(TransactionEvent::Savepoint(tx.id(), savepoint));
        Ok(savepoint)
    }

    async fn rollback_to_savepoint(
        &self,
        tx: &TransactionHandle,
        savepoint: SavepointId,
    ) -> StoreResult<()> {
        self.record(TransactionEvent::RollbackToSavepoint(tx.id(), savepoint));
        self.release_savepoint_entry(tx, savepoint)
    }

    async fn release_savepoint(
        &self,
        tx: &TransactionHandle,
        savepoint: SavepointId,
    ) -> StoreResult<()> {
        self.record(TransactionEvent::ReleaseSavepoint(tx.id(), savepoint));
        self.release_savepoint_entry(tx, savepoint)
    }
}

impl InMemoryTransactionManager {
    fn release_savepoint_entry(
        &self,
        tx: &TransactionHandle,
        savepoint: SavepointId,
    ) -> StoreResult<()> {
        let mut open = self.open.lock();
        let savepoints = open
            .get_mut(&tx.id())
            .ok_or_else(|| StoreError::NotFound(format!("transaction {}", tx.id())))?;
        let position = savepoints
            .iter()
            .position(|sp| *sp == savepoint)
            .ok_or_else(|| StoreError::NotFound(format!("savepoint {}", savepoint.0)))?;
        savepoints.truncate(position);
        Ok(())
    }
}
