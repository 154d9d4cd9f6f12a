//! Request context and the transaction context stack
//!
//! Nothing here is ambient: the caller builds a [`RequestContext`] and passes
//! it as the first argument through every wrapped call. Clones of a context
//! share one [`TransactionStack`], so a call chain sees a single consistent
//! view of its active and suspended transactions.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Tenant ID
pub type TenantId = Uuid;

/// Isolation level requested when a new transaction starts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Whatever the store uses by default
    #[default]
    Default,
    /// Dirty reads allowed
    ReadUncommitted,
    /// Only committed data visible
    ReadCommitted,
    /// Repeated reads see the same rows
    RepeatableRead,
    /// Full serializability
    Serializable,
}

/// Opaque handle to a transaction opened on the persistent store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionHandle {
    id: Uuid,
    isolation: IsolationLevel,
}

impl TransactionHandle {
    /// Mint a handle for a freshly begun transaction
    pub fn new(isolation: IsolationLevel) -> Self {
        Self { id: Uuid::new_v4(), isolation }
    }

    /// Store-side transaction id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Isolation the transaction was started with
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }
}

/// One physical transaction as seen by a call chain
#[derive(Debug)]
pub struct TransactionContext {
    handle: TransactionHandle,
    started_at: DateTime<Utc>,
    is_nested: bool,
}

impl TransactionContext {
    /// Wrap a handle. `is_nested` marks a transaction started while another
    /// one was suspended underneath it.
    pub fn new(handle: TransactionHandle, is_nested: bool) -> Self {
        Self {
            handle,
            started_at: Utc::now(),
            is_nested,
        }
    }

    /// Transaction id
    pub fn transaction_id(&self) -> Uuid {
        self.handle.id()
    }

    /// Underlying store handle
    pub fn handle(&self) -> &TransactionHandle {
        &self.handle
    }

    /// Isolation level in force
    pub fn isolation(&self) -> IsolationLevel {
        self.handle.isolation()
    }

    /// When the transaction began
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Whether this transaction runs inside a suspended outer one
    pub fn is_nested(&self) -> bool {
        self.is_nested
    }
}

/// Token returned by [`TransactionStack::suspend`], consumed by `resume`
#[derive(Debug)]
#[must_use = "a suspended scope must be resumed"]
pub struct SuspendedScope {
    depth: usize,
}

/// Active transaction plus the stack of suspended ones.
///
/// At most one context is active per call chain. Suspending moves the active
/// context (or the absence of one) onto the stack; resuming puts back the very
/// same `Arc`.
#[derive(Debug, Default)]
pub struct TransactionStack {
    active: Option<Arc<TransactionContext>>,
    suspended: Vec<Option<Arc<TransactionContext>>>,
}

impl TransactionStack {
    /// Create an empty stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently active transaction
    pub fn current(&self) -> Option<Arc<TransactionContext>> {
        self.active.clone()
    }

    /// Install a newly begun transaction as active.
    ///
    /// Returns the context back if another one is still active.
    pub fn activate(
        &mut self,
        context: Arc<TransactionContext>,
    ) -> Result<(), Arc<TransactionContext>> {
        if self.active.is_some() {
            return Err(context);
        }
        self.active = Some(context);
        Ok(())
    }

    /// Clear the active transaction if it is the given one
    pub fn finish(&mut self, transaction_id: Uuid) -> Option<Arc<TransactionContext>> {
        match &self.active {
            Some(active) if active.transaction_id() == transaction_id => self.active.take(),
            _ => None,
        }
    }

    /// Move the active transaction (if any) onto the suspended stack
    pub fn suspend(&mut self) -> SuspendedScope {
        self.suspended.push(self.active.take());
        SuspendedScope { depth: self.suspended.len() }
    }

    /// Restore what the matching `suspend` set aside.
    ///
    /// Anything suspended above the scope (left behind by a misbehaving inner
    /// call) is dropped so the stack cannot drift.
    pub fn resume(&mut self, scope: SuspendedScope) -> Option<Arc<TransactionContext>> {
        self.suspended.truncate(scope.depth);
        let restored = self.suspended.pop().flatten();
        self.active = restored.clone();
        restored
    }

    /// Number of suspended scopes
    pub fn suspended_depth(&self) -> usize {
        self.suspended.len()
    }

    /// Whether the given transaction sits on the suspended stack
    pub fn is_suspended(&self, transaction_id: Uuid) -> bool {
        self.suspended
            .iter()
            .flatten()
            .any(|ctx| ctx.transaction_id() == transaction_id)
    }
}

/// HTTP-level identity of the inbound request, used for fingerprinting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInfo {
    /// HTTP method
    pub method: String,
    /// Request path
    pub path: String,
    /// Serialized body or query parameters
    pub body: String,
}

impl RequestInfo {
    /// Request without a body
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            path: path.into(),
            body: String::new(),
        }
    }

    /// Attach the serialized body
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }
}

/// Explicit per-request context
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    principal: Option<String>,
    tenant_id: Option<TenantId>,
    request: Option<RequestInfo>,
    transactions: Arc<Mutex<TransactionStack>>,
}

impl RequestContext {
    /// Anonymous context with an empty transaction stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for an authenticated principal
    pub fn for_principal(principal: impl Into<String>) -> Self {
        Self {
            principal: Some(principal.into()),
            ..Self::default()
        }
    }

    /// Scope to a tenant
    pub fn with_tenant(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    /// Attach the inbound request identity
    pub fn with_request(mut self, request: RequestInfo) -> Self {
        self.request = Some(request);
        self
    }

    /// Authenticated principal, if any
    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    /// Tenant scope, if any
    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    /// Inbound request identity, if any
    pub fn request(&self) -> Option<&RequestInfo> {
        self.request.as_ref()
    }

    /// Active transaction of this call chain
    pub fn transaction(&self) -> Option<Arc<TransactionContext>> {
        self.transactions.lock().current()
    }

    /// Store handle of the active transaction
    pub fn transaction_handle(&self) -> Option<TransactionHandle> {
        self.transaction().map(|ctx| ctx.handle().clone())
    }

    /// Run a short synchronous operation against the transaction stack.
    ///
    /// The lock is never held across an `.await`.
    pub fn with_transactions<R>(&self, f: impl FnOnce(&mut TransactionStack) -> R) -> R {
        f(&mut self.transactions.lock())
    }
}
