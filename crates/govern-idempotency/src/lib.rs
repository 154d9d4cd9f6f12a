//! Idempotency Coordinator
//!
//! Guarantees that identical requests (same principal, method, path and body)
//! run their work at most once inside the policy window, and that later
//! identical requests observe the first result instead of re-executing.
//!
//! ```text
//!  fingerprint ──set_if_absent(PROCESSING, ttl)──┬── claimed ──► work ──┬─ ok ──► set(result, ttl)
//!                                                │                      └─ err ─► delete | keep marker
//!                                                └── taken ──► get ──┬─ PROCESSING ─► DuplicateRequest
//!                                                                    └─ result ─────► replay
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod coordinator;
pub mod error;
pub mod fingerprint;
pub mod policy;

pub use coordinator::{IdempotencyCoordinator, PROCESSING_MARKER};
pub use error::IdempotencyError;
pub use fingerprint::fingerprint;
pub use policy::IdempotencyPolicy;
