//! Claim, execute, cache, replay

use crate::error::IdempotencyError;
use crate::fingerprint::fingerprint;
use crate::policy::IdempotencyPolicy;
use govern_common::{CoordinationStore, RequestContext};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Value held by a claimed but unfinished fingerprint.
///
/// Not valid JSON, so it can never be mistaken for a cached result.
pub const PROCESSING_MARKER: &str = "__PROCESSING__";

/// Wraps units of work with at-most-once execution per request fingerprint
pub struct IdempotencyCoordinator {
    store: Arc<dyn CoordinationStore>,
}

impl IdempotencyCoordinator {
    /// Coordinator over a shared coordination store
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    /// Fingerprint this context's request would be claimed under
    pub fn key_for(
        &self,
        ctx: &RequestContext,
        policy: &IdempotencyPolicy,
    ) -> Result<String, IdempotencyError> {
        let request = ctx.request().ok_or(IdempotencyError::MissingRequest)?;
        Ok(fingerprint(&policy.key_prefix, ctx.principal(), request))
    }

    /// Run `work` unless an identical request already ran or is running.
    ///
    /// - running: fails with `DuplicateRequest` without calling `work`
    /// - finished inside the window: returns the cached result
    /// - otherwise: runs `work`, caching success; failures propagate unchanged
    pub async fn with_idempotency<T, E, F, Fut>(
        &self,
        ctx: &RequestContext,
        policy: &IdempotencyPolicy,
        work: F,
    ) -> Result<T, E>
    where
        F: FnOnce(RequestContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: Serialize + DeserializeOwned,
        E: From<IdempotencyError>,
    {
        let key = self.key_for(ctx, policy)?;

        if let Some(cached) = self.claim::<T>(&key, policy).await? {
            return Ok(cached);
        }

        match work(ctx.clone()).await {
            Ok(value) => {
                self.remember(&key, &value, policy).await;
                Ok(value)
            }
            Err(err) => {
                if policy.delete_on_error {
                    if let Err(delete) = self.store.delete(&key).await {
                        warn!(key = %key, error = %delete, "failed to release idempotency claim");
                    } else {
                        debug!(key = %key, "idempotency claim released after failure");
                    }
                } else {
                    debug!(key = %key, "idempotency claim kept until it expires");
                }
                Err(err)
            }
        }
    }

    /// Take the fingerprint, or report what already holds it.
    ///
    /// `Ok(None)` means this call owns the claim and must run the work.
    async fn claim<T: DeserializeOwned>(
        &self,
        key: &str,
        policy: &IdempotencyPolicy,
    ) -> Result<Option<T>, IdempotencyError> {
        // Second pass only happens when the holder expired between our two calls.
        for _ in 0..2 {
            if self.store.set_if_absent(key, PROCESSING_MARKER, policy.timeout).await? {
                debug!(key = %key, "idempotency claim acquired");
                return Ok(None);
            }

            match self.store.get(key).await? {
                Some(value) if value == PROCESSING_MARKER => break,
                Some(value) => {
                    debug!(key = %key, "replaying cached result");
                    return serde_json::from_str(&value)
                        .map(Some)
                        .map_err(|e| IdempotencyError::Serialization(e.to_string()));
                }
                None => continue,
            }
        }

        warn!(key = %key, "duplicate submission rejected");
        Err(IdempotencyError::DuplicateRequest {
            message: policy.message.clone(),
        })
    }

    /// Replace the claim with the result. The work already succeeded, so a
    /// failure here is logged rather than returned.
    async fn remember<T: Serialize>(&self, key: &str, value: &T, policy: &IdempotencyPolicy) {
        let stored = match serde_json::to_string(value) {
            Ok(json) => self.store.set(key, &json, policy.timeout).await,
            Err(err) => {
                warn!(key = %key, error = %err, "result not cacheable, releasing claim");
                self.store.delete(key).await.map(|_| ())
            }
        };
        if let Err(err) = stored {
            warn!(key = %key, error = %err, "failed to record idempotent result");
        }
    }
}
