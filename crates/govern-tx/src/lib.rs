//! Transaction Coordinator
//!
//! Executes a unit of work under an atomic persistence transaction with
//! explicit propagation rules for nested invocations and a configurable
//! rollback policy.
//!
//! ```text
//! with_transaction(ctx, options, work)
//!        │
//!        ▼
//!  ┌──────────────┐  top of ctx's TransactionStack?   ┌────────────────────┐
//!  │ Propagation  │ ─────────────────────────────────►│ join / savepoint / │
//!  │   decision   │                                   │ suspend + begin /  │
//!  └──────────────┘                                   │ run bare / reject  │
//!                                                     └─────────┬──────────┘
//!                                                               ▼
//!                                           work(ctx) ──► commit | rollback
//!                                                         (RollbackRules)
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod coordinator;
pub mod error;
pub mod manager;
pub mod propagation;

pub use coordinator::TransactionCoordinator;
pub use error::{class_matches, Classify, TransactionError};
pub use manager::{InMemoryTransactionManager, SavepointId, TransactionEvent, TransactionManager};
pub use propagation::{should_rollback, Propagation, RollbackRules, TransactionOptions};
