//! Transaction Coordinator
//!
//! Per invocation the coordinator walks one of these paths:
//!
//! ```text
//!   NoTransaction ──begin──► Active ──ok──────────► Committed
//!        │                     │  ├──err+rollback──► RolledBack
//!        │                     │  └──dropped───────► RolledBack (spawned)
//!        │                     └──suspend (REQUIRES_NEW / NOT_SUPPORTED)
//!        │                              │
//!        │                          Suspended ──inner done──► resume ► Active
//!        └── run without transaction (SUPPORTS / NOT_SUPPORTED / NEVER)
//! ```
//!
//! The wrapped work's value or error always comes back unchanged. The only
//! errors the coordinator adds are its own: propagation violations and store
//! failures on begin/commit. A joined participant never decides the outcome;
//! the owner commits or rolls back on its own work's result.

use crate::error::{Classify, TransactionError};
use crate::manager::{SavepointId, TransactionManager};
use crate::propagation::{Propagation, TransactionOptions};
use govern_common::{IsolationLevel, RequestContext, SuspendedScope, TransactionContext};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Wraps units of work in transactions according to their propagation
pub struct TransactionCoordinator {
    manager: Arc<dyn TransactionManager>,
    default_isolation: IsolationLevel,
}

impl TransactionCoordinator {
    /// Coordinator over the persistent store's transaction manager
    pub fn new(manager: Arc<dyn TransactionManager>) -> Self {
        Self {
            manager,
            default_isolation: IsolationLevel::Default,
        }
    }

    /// Isolation used when options leave it unset
    pub fn with_default_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.default_isolation = isolation;
        self
    }

    /// Run `work` under the transaction semantics described by `options`.
    ///
    /// `work` receives a clone of `ctx`; inside it `ctx.transaction()` is the
    /// transaction the work runs under, if any. Dropping the returned future
    /// before it completes rolls back any transaction it began.
    pub async fn with_transaction<T, E, F, Fut>(
        &self,
        ctx: &RequestContext,
        options: &TransactionOptions,
        work: F,
    ) -> Result<T, E>
    where
        F: FnOnce(RequestContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<TransactionError> + Classify,
    {
        let existing = ctx.transaction();

        match (options.propagation, existing) {
            (Propagation::Required | Propagation::Supports | Propagation::Mandatory, Some(tx)) => {
                debug!(tx = %tx.transaction_id(), name = ?options.name, "joining active transaction");
                work(ctx.clone()).await
            }
            (Propagation::Nested, Some(tx)) => self.run_in_savepoint(ctx, tx, options, work).await,
            (Propagation::Required | Propagation::RequiresNew | Propagation::Nested, None) => {
                self.run_in_new(ctx, options, false, work).await
            }
            (Propagation::RequiresNew, Some(outer)) => {
                debug!(outer = %outer.transaction_id(), "suspending for REQUIRES_NEW");
                let _suspended = SuspendGuard::suspend(ctx);
                self.run_in_new(ctx, options, true, work).await
            }
            (Propagation::NotSupported, Some(outer)) => {
                debug!(outer = %outer.transaction_id(), "suspending for NOT_SUPPORTED");
                let _suspended = SuspendGuard::suspend(ctx);
                work(ctx.clone()).await
            }
            (Propagation::Mandatory, None) => Err(TransactionError::Required.into()),
            (Propagation::Never, Some(_)) => Err(TransactionError::NotAllowed.into()),
            (Propagation::Supports | Propagation::NotSupported | Propagation::Never, None) => {
                work(ctx.clone()).await
            }
        }
    }

    async fn run_in_savepoint<T, E, F, Fut>(
        &self,
        ctx: &RequestContext,
        tx: Arc<TransactionContext>,
        options: &TransactionOptions,
        work: F,
    ) -> Result<T, E>
    where
        F: FnOnce(RequestContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<TransactionError> + Classify,
    {
        let savepoint = self
            .manager
            .create_savepoint(tx.handle())
            .await
            .map_err(TransactionError::from)?;
        debug!(tx = %tx.transaction_id(), savepoint = savepoint.0, "savepoint created");

        match work(ctx.clone()).await {
            Ok(value) => {
                self.manager
                    .release_savepoint(tx.handle(), savepoint)
                    .await
                    .map_err(TransactionError::from)?;
                Ok(value)
            }
            Err(err) => {
                if options.rules.should_rollback(&err) {
                    self.undo_savepoint(&tx, savepoint).await;
                } else if let Err(release) =
                    self.manager.release_savepoint(tx.handle(), savepoint).await
                {
                    warn!(tx = %tx.transaction_id(), error = %release, "failed to release savepoint");
                }
                Err(err)
            }
        }
    }

    async fn run_in_new<T, E, F, Fut>(
        &self,
        ctx: &RequestContext,
        options: &TransactionOptions,
        is_nested: bool,
        work: F,
    ) -> Result<T, E>
    where
        F: FnOnce(RequestContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<TransactionError> + Classify,
    {
        let isolation = options.isolation.unwrap_or(self.default_isolation);
        let handle = self.manager.begin(isolation).await.map_err(TransactionError::from)?;
        let tx = Arc::new(TransactionContext::new(handle, is_nested));
        let id = tx.transaction_id();

        if let Err(rejected) = ctx.with_transactions(|stack| stack.activate(Arc::clone(&tx))) {
            self.undo(&rejected).await;
            return Err(TransactionError::Stack(format!(
                "cannot start {id} while another transaction is active"
            ))
            .into());
        }
        debug!(tx = %id, ?isolation, is_nested, name = ?options.name, "transaction started");

        let mut active = ActiveGuard {
            ctx,
            manager: Arc::clone(&self.manager),
            tx: Arc::clone(&tx),
            settled: false,
        };
        let outcome = work(ctx.clone()).await;

        let result = match outcome {
            Ok(value) => match self.manager.commit(tx.handle()).await {
                Ok(()) => {
                    debug!(tx = %id, "transaction committed");
                    Ok(value)
                }
                Err(commit) => {
                    error!(tx = %id, error = %commit, "commit failed");
                    self.undo(&tx).await;
                    Err(TransactionError::Store(commit).into())
                }
            },
            Err(err) => {
                if options.rules.should_rollback(&err) {
                    self.undo(&tx).await;
                } else {
                    debug!(tx = %id, class = err.error_class(), "committing despite error");
                    if let Err(commit) = self.manager.commit(tx.handle()).await {
                        error!(tx = %id, error = %commit, "commit after tolerated error failed");
                    }
                }
                Err(err)
            }
        };
        active.settled = true;
        result
    }

    /// Roll back; a failure here is logged so the caller still sees the
    /// error that caused the rollback.
    async fn undo(&self, tx: &TransactionContext) {
        match self.manager.rollback(tx.handle()).await {
            Ok(()) => debug!(tx = %tx.transaction_id(), "transaction rolled back"),
            Err(err) => error!(tx = %tx.transaction_id(), error = %err, "rollback failed"),
        }
    }

    async fn undo_savepoint(&self, tx: &TransactionContext, savepoint: SavepointId) {
        match self.manager.rollback_to_savepoint(tx.handle(), savepoint).await {
            Ok(()) => debug!(tx = %tx.transaction_id(), savepoint = savepoint.0, "rolled back to savepoint"),
            Err(err) => error!(tx = %tx.transaction_id(), error = %err, "savepoint rollback failed"),
        }
    }
}

/// Clears the active transaction when its scope ends. If the scope ends
/// before commit or rollback ran (the future was dropped), the transaction is
/// rolled back on the current runtime.
struct ActiveGuard<'a> {
    ctx: &'a RequestContext,
    manager: Arc<dyn TransactionManager>,
    tx: Arc<TransactionContext>,
    settled: bool,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let id = self.tx.transaction_id();
        self.ctx.with_transactions(|stack| stack.finish(id));
        if self.settled {
            return;
        }

        warn!(tx = %id, "transaction abandoned before completion, rolling back");
        let manager = Arc::clone(&self.manager);
        let handle = self.tx.handle().clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(err) = manager.rollback(&handle).await {
                        error!(tx = %handle.id(), error = %err, "rollback of abandoned transaction failed");
                    }
                });
            }
            Err(_) => error!(tx = %id, "no runtime to roll back abandoned transaction"),
        }
    }
}

/// Resumes the suspended transaction when its scope ends, including on cancellation
struct SuspendGuard<'a> {
    ctx: &'a RequestContext,
    scope: Option<SuspendedScope>,
}

impl<'a> SuspendGuard<'a> {
    fn suspend(ctx: &'a RequestContext) -> Self {
        let scope = ctx.with_transactions(|stack| stack.suspend());
        Self { ctx, scope: Some(scope) }
    }
}

impl Drop for SuspendGuard<'_> {
    fn drop(&mut self) {
        if let Some(scope) = self.scope.take() {
            self.ctx.with_transactions(|stack| stack.resume(scope));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::{InMemoryTransactionManager, TransactionEvent};
    use govern_common::StoreError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    enum AppError {
        Business(&'static str),
        Notice,
        Tx(TransactionError),
    }

    impl From<TransactionError> for AppError {
        fn from(err: TransactionError) -> Self {
            Self::Tx(err)
        }
    }

    impl Classify for AppError {
        fn error_class(&self) -> &str {
            match self {
                Self::Business(_) => "business.failure",
                Self::Notice => "business.notice",
                Self::Tx(err) => err.error_class(),
            }
        }
    }

    fn setup() -> (Arc<InMemoryTransactionManager>, TransactionCoordinator) {
        let manager = Arc::new(InMemoryTransactionManager::new());
        let coordinator = TransactionCoordinator::new(manager.clone());
        (manager, coordinator)
    }

    fn commits(events: &[TransactionEvent]) -> usize {
        events.iter().filter(|e| matches!(e, TransactionEvent::Commit(_))).count()
    }

    fn rollbacks(events: &[TransactionEvent]) -> usize {
        events.iter().filter(|e| matches!(e, TransactionEvent::Rollback(_))).count()
    }

    #[tokio::test]
    async fn test_required_commits_on_success() {
        let (manager, coordinator) = setup();
        let coordinator = &coordinator;
        let ctx = RequestContext::new();

        let value: Result<u32, AppError> = coordinator
            .with_transaction(&ctx, &TransactionOptions::required(), |inner| async move {
                assert!(inner.transaction().is_some());
                Ok(7)
            })
            .await;

        assert_eq!(value, Ok(7));
        let events = manager.events();
        assert_eq!(commits(&events), 1);
        assert_eq!(rollbacks(&events), 0);
        assert!(ctx.transaction().is_none());
    }

    #[tokio::test]
    async fn test_required_rolls_back_on_error() {
        let (manager, coordinator) = setup();
        let coordinator = &coordinator;
        let ctx = RequestContext::new();

        let result: Result<(), AppError> = coordinator
            .with_transaction(&ctx, &TransactionOptions::required(), |_| async {
                Err(AppError::Business("boom"))
            })
            .await;

        assert_eq!(result, Err(AppError::Business("boom")));
        let events = manager.events();
        assert_eq!(commits(&events), 0);
        assert_eq!(rollbacks(&events), 1);
        assert_eq!(manager.open_transactions(), 0);
    }

    #[tokio::test]
    async fn test_no_rollback_for_commits_and_propagates() {
        let (manager, coordinator) = setup();
        let coordinator = &coordinator;
        let ctx = RequestContext::new();
        let options = TransactionOptions::required().no_rollback_for("business.notice");

        let result: Result<(), AppError> = coordinator
            .with_transaction(&ctx, &options, |_| async { Err(AppError::Notice) })
            .await;

        assert_eq!(result, Err(AppError::Notice));
        let events = manager.events();
        assert_eq!(commits(&events), 1);
        assert_eq!(rollbacks(&events), 0);
    }

    #[tokio::test]
    async fn test_required_joins_existing() {
        let (manager, coordinator) = setup();
        let coordinator = &coordinator;
        let ctx = RequestContext::new();

        let result: Result<(), AppError> = coordinator
            .with_transaction(&ctx, &TransactionOptions::required(), |outer_ctx| async move {
                let outer_id = outer_ctx.transaction().unwrap().transaction_id();
                coordinator
                    .with_transaction(&outer_ctx, &TransactionOptions::required(), |inner| async move {
                        assert_eq!(inner.transaction().unwrap().transaction_id(), outer_id);
                        Ok::<_, AppError>(())
                    })
                    .await
            })
            .await;

        assert!(result.is_ok());
        let begins = manager
            .events()
            .iter()
            .filter(|e| matches!(e, TransactionEvent::Begin(..)))
            .count();
        assert_eq!(begins, 1);
    }

    #[tokio::test]
    async fn test_handled_participant_failure_lets_owner_commit() {
        let (manager, coordinator) = setup();
        let coordinator = &coordinator;
        let ctx = RequestContext::new();

        let result: Result<u32, AppError> = coordinator
            .with_transaction(&ctx, &TransactionOptions::required(), |outer_ctx| async move {
                let inner: Result<(), AppError> = coordinator
                    .with_transaction(&outer_ctx, &TransactionOptions::required(), |_| async {
                        Err(AppError::Business("inner"))
                    })
                    .await;
                assert_eq!(inner, Err(AppError::Business("inner")));
                // Outer recovers from the inner failure
                Ok(42)
            })
            .await;

        assert_eq!(result, Ok(42));
        let events = manager.events();
        assert_eq!(commits(&events), 1);
        assert_eq!(rollbacks(&events), 0);
    }

    #[tokio::test]
    async fn test_propagated_participant_failure_rolls_back_owner() {
        let (manager, coordinator) = setup();
        let coordinator = &coordinator;
        let ctx = RequestContext::new();

        let result: Result<(), AppError> = coordinator
            .with_transaction(&ctx, &TransactionOptions::required(), |outer_ctx| async move {
                coordinator
                    .with_transaction(&outer_ctx, &TransactionOptions::required(), |_| async {
                        Err(AppError::Business("inner"))
                    })
                    .await
            })
            .await;

        assert_eq!(result, Err(AppError::Business("inner")));
        let events = manager.events();
        assert_eq!(commits(&events), 0);
        assert_eq!(rollbacks(&events), 1);
    }

    #[tokio::test]
    async fn test_supports_and_mandatory_join_existing() {
        let (manager, coordinator) = setup();
        let coordinator = &coordinator;
        let ctx = RequestContext::new();

        let result: Result<(), AppError> = coordinator
            .with_transaction(&ctx, &TransactionOptions::required(), |outer_ctx| async move {
                let outer_id = outer_ctx.transaction().unwrap().transaction_id();
                for propagation in [Propagation::Supports, Propagation::Mandatory] {
                    coordinator
                        .with_transaction(&outer_ctx, &TransactionOptions::new(propagation), |inner| async move {
                            assert_eq!(inner.transaction().unwrap().transaction_id(), outer_id);
                            Ok::<_, AppError>(())
                        })
                        .await?;
                }
                Ok(())
            })
            .await;

        assert!(result.is_ok());
        let events = manager.events();
        let begins = events.iter().filter(|e| matches!(e, TransactionEvent::Begin(..))).count();
        assert_eq!(begins, 1);
        assert_eq!(commits(&events), 1);
    }

    #[tokio::test]
    async fn test_requires_new_suspends_and_resumes_same_context() {
        let (manager, coordinator) = setup();
        let coordinator = &coordinator;
        let ctx = RequestContext::new();

        let result: Result<(), AppError> = coordinator
            .with_transaction(&ctx, &TransactionOptions::required(), |outer_ctx| async move {
                let outer = outer_ctx.transaction().unwrap();

                let inner: Result<(), AppError> = coordinator
                    .with_transaction(&outer_ctx, &TransactionOptions::requires_new(), |inner_ctx| {
                        let outer = Arc::clone(&outer);
                        async move {
                            let inner = inner_ctx.transaction().unwrap();
                            assert_ne!(inner.transaction_id(), outer.transaction_id());
                            assert!(inner.is_nested());
                            assert!(inner_ctx
                                .with_transactions(|s| s.is_suspended(outer.transaction_id())));
                            Err(AppError::Business("inner fails alone"))
                        }
                    })
                    .await;
                assert!(inner.is_err());

                let resumed = outer_ctx.transaction().unwrap();
                assert!(Arc::ptr_eq(&resumed, &outer));
                Ok(())
            })
            .await;

        assert!(result.is_ok());
        let events = manager.events();
        // inner rolled back, outer committed
        assert_eq!(commits(&events), 1);
        assert_eq!(rollbacks(&events), 1);
        assert!(ctx.transaction().is_none());
        assert_eq!(ctx.with_transactions(|s| s.suspended_depth()), 0);
    }

    #[tokio::test]
    async fn test_requires_new_commits_inner_and_outer_separately() {
        let (manager, coordinator) = setup();
        let coordinator = &coordinator;
        let ctx = RequestContext::new();

        let result: Result<(), AppError> = coordinator
            .with_transaction(&ctx, &TransactionOptions::required(), |outer_ctx| async move {
                let outer = outer_ctx.transaction().unwrap();
                let inner_id = coordinator
                    .with_transaction(&outer_ctx, &TransactionOptions::requires_new(), |inner| async move {
                        Ok::<_, AppError>(inner.transaction().unwrap().transaction_id())
                    })
                    .await?;
                assert_ne!(inner_id, outer.transaction_id());
                assert!(Arc::ptr_eq(&outer_ctx.transaction().unwrap(), &outer));
                Ok(())
            })
            .await;

        assert!(result.is_ok());
        let events = manager.events();
        assert_eq!(commits(&events), 2);
        assert_eq!(rollbacks(&events), 0);
        // inner commit lands before the outer one
        let outer_id = match events[0] {
            TransactionEvent::Begin(id, _) => id,
            ref other => panic!("unexpected first event {other:?}"),
        };
        assert_eq!(events.last(), Some(&TransactionEvent::Commit(outer_id)));
    }

    #[tokio::test]
    async fn test_requires_new_rolls_back_on_error_without_outer() {
        let (manager, coordinator) = setup();
        let coordinator = &coordinator;
        let ctx = RequestContext::new();

        let result: Result<(), AppError> = coordinator
            .with_transaction(&ctx, &TransactionOptions::requires_new(), |_| async {
                Err(AppError::Business("x"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(rollbacks(&manager.events()), 1);
        assert_eq!(commits(&manager.events()), 0);
    }

    #[tokio::test]
    async fn test_mandatory_without_transaction_fails() {
        let (_, coordinator) = setup();
        let coordinator = &coordinator;
        let ran = AtomicUsize::new(0);
        let ran = &ran;
        let ctx = RequestContext::new();

        let result: Result<(), AppError> = coordinator
            .with_transaction(&ctx, &TransactionOptions::new(Propagation::Mandatory), |_| async move {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert_eq!(result, Err(AppError::Tx(TransactionError::Required)));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_never_with_transaction_fails() {
        let (_, coordinator) = setup();
        let coordinator = &coordinator;
        let ctx = RequestContext::new();

        let result: Result<(), AppError> = coordinator
            .with_transaction(&ctx, &TransactionOptions::required(), |outer_ctx| async move {
                coordinator
                    .with_transaction(&outer_ctx, &TransactionOptions::new(Propagation::Never), |_| async {
                        Ok(())
                    })
                    .await
            })
            .await;

        assert_eq!(result, Err(AppError::Tx(TransactionError::NotAllowed)));
    }

    #[tokio::test]
    async fn test_supports_without_transaction_passes_through() {
        let (manager, coordinator) = setup();
        let coordinator = &coordinator;
        let ctx = RequestContext::new();

        let result: Result<(), AppError> = coordinator
            .with_transaction(&ctx, &TransactionOptions::new(Propagation::Supports), |inner| async move {
                assert!(inner.transaction().is_none());
                Err(AppError::Business("untouched"))
            })
            .await;

        assert_eq!(result, Err(AppError::Business("untouched")));
        assert!(manager.events().is_empty());
    }

    #[tokio::test]
    async fn test_not_supported_suspends_outer() {
        let (manager, coordinator) = setup();
        let coordinator = &coordinator;
        let ctx = RequestContext::new();

        let result: Result<(), AppError> = coordinator
            .with_transaction(&ctx, &TransactionOptions::required(), |outer_ctx| async move {
                let outer = outer_ctx.transaction().unwrap();
                coordinator
                    .with_transaction(
                        &outer_ctx,
                        &TransactionOptions::new(Propagation::NotSupported),
                        |inner| async move {
                            assert!(inner.transaction().is_none());
                            Ok::<_, AppError>(())
                        },
                    )
                    .await?;
                assert!(Arc::ptr_eq(&outer_ctx.transaction().unwrap(), &outer));
                Ok(())
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(commits(&manager.events()), 1);
    }

    #[tokio::test]
    async fn test_not_supported_error_restores_outer() {
        let (manager, coordinator) = setup();
        let coordinator = &coordinator;
        let ctx = RequestContext::new();

        let result: Result<(), AppError> = coordinator
            .with_transaction(&ctx, &TransactionOptions::required(), |outer_ctx| async move {
                let outer = outer_ctx.transaction().unwrap();
                let inner: Result<(), AppError> = coordinator
                    .with_transaction(
                        &outer_ctx,
                        &TransactionOptions::new(Propagation::NotSupported),
                        |inner| async move {
                            assert!(inner.transaction().is_none());
                            Err(AppError::Business("outside"))
                        },
                    )
                    .await;
                assert_eq!(inner, Err(AppError::Business("outside")));
                assert!(Arc::ptr_eq(&outer_ctx.transaction().unwrap(), &outer));
                assert_eq!(outer_ctx.with_transactions(|s| s.suspended_depth()), 0);
                Ok(())
            })
            .await;

        assert!(result.is_ok());
        let events = manager.events();
        assert_eq!(commits(&events), 1);
        assert_eq!(rollbacks(&events), 0);
    }

    #[tokio::test]
    async fn test_nested_rolls_back_to_savepoint_only() {
        let (manager, coordinator) = setup();
        let coordinator = &coordinator;
        let ctx = RequestContext::new();

        let result: Result<(), AppError> = coordinator
            .with_transaction(&ctx, &TransactionOptions::required(), |outer_ctx| async move {
                let nested: Result<(), AppError> = coordinator
                    .with_transaction(&outer_ctx, &TransactionOptions::nested(), |_| async {
                        Err(AppError::Business("nested"))
                    })
                    .await;
                assert!(nested.is_err());
                Ok(())
            })
            .await;

        assert!(result.is_ok());
        let events = manager.events();
        assert!(events.iter().any(|e| matches!(e, TransactionEvent::RollbackToSavepoint(..))));
        assert_eq!(commits(&events), 1);
        assert_eq!(rollbacks(&events), 0);
    }

    #[tokio::test]
    async fn test_nested_releases_savepoint_on_success() {
        let (manager, coordinator) = setup();
        let coordinator = &coordinator;
        let ctx = RequestContext::new();

        let result: Result<u8, AppError> = coordinator
            .with_transaction(&ctx, &TransactionOptions::required(), |outer_ctx| async move {
                coordinator
                    .with_transaction(&outer_ctx, &TransactionOptions::nested(), |_| async { Ok(1) })
                    .await
            })
            .await;

        assert_eq!(result, Ok(1));
        assert!(manager
            .events()
            .iter()
            .any(|e| matches!(e, TransactionEvent::ReleaseSavepoint(..))));
    }

    #[tokio::test]
    async fn test_isolation_only_applies_to_new_transactions() {
        let manager = Arc::new(InMemoryTransactionManager::new());
        let coordinator = TransactionCoordinator::new(manager.clone())
            .with_default_isolation(IsolationLevel::ReadCommitted);
        let coordinator = &coordinator;
        let ctx = RequestContext::new();

        let result: Result<(), AppError> = coordinator
            .with_transaction(&ctx, &TransactionOptions::required(), |outer_ctx| async move {
                let serializable =
                    TransactionOptions::required().with_isolation(IsolationLevel::Serializable);
                coordinator
                    .with_transaction(&outer_ctx, &serializable, |inner| async move {
                        assert_eq!(
                            inner.transaction().unwrap().isolation(),
                            IsolationLevel::ReadCommitted
                        );
                        Ok(())
                    })
                    .await
            })
            .await;

        assert!(result.is_ok());
        assert!(matches!(
            manager.events()[0],
            TransactionEvent::Begin(_, IsolationLevel::ReadCommitted)
        ));
    }

    #[tokio::test]
    async fn test_commit_failure_surfaces_as_transaction_error() {
        let (manager, coordinator) = setup();
        let coordinator = &coordinator;
        manager.fail_commits(true);
        let ctx = RequestContext::new();

        let result: Result<(), AppError> = coordinator
            .with_transaction(&ctx, &TransactionOptions::required(), |_| async { Ok(()) })
            .await;

        assert_eq!(
            result,
            Err(AppError::Tx(TransactionError::Store(StoreError::Backend(
                "commit failed".into()
            ))))
        );
        assert!(ctx.transaction().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_call_rolls_back_its_transaction() {
        let (manager, coordinator) = setup();
        let ctx = RequestContext::new();

        let options = TransactionOptions::required();
        let call = coordinator.with_transaction(&ctx, &options, |_| {
            std::future::pending::<Result<(), AppError>>()
        });
        let timed_out = tokio::time::timeout(Duration::from_millis(10), call).await;
        assert!(timed_out.is_err());
        assert!(ctx.transaction().is_none());

        // rollback runs on a spawned task
        tokio::task::yield_now().await;
        assert_eq!(manager.open_transactions(), 0);
        assert_eq!(rollbacks(&manager.events()), 1);
        assert_eq!(commits(&manager.events()), 0);
    }
}
