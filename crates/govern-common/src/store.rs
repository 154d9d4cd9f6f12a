//! Coordination Store - thin adapter over an external key/value cache
//!
//! The coordinators only ever need five primitives. `set_if_absent` must be a
//! single atomic operation at the backend: a claim built from `get` followed
//! by `set` lets two concurrent callers both believe they won.

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Key/value cache used for claims, replays and short-lived usage caching
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Read a live value
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Unconditionally write a value that expires after `ttl`
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// Atomically write `value` only if no live value exists.
    ///
    /// Returns `true` when this call created the entry.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    /// Remove a value, returning whether a live one existed
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Atomically add `delta` to an integer value, creating it at `delta`
    async fn increment_by(&self, key: &str, delta: i64) -> StoreResult<i64>;
}

struct Slot {
    value: String,
    expires_at: Option<Instant>,
}

impl Slot {
    fn expiring(value: &str, ttl: Duration) -> Self {
        Self {
            value: value.to_string(),
            expires_at: Some(Instant::now() + ttl),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| now < deadline)
    }
}

/// In-memory coordination store (for testing and single-node development).
///
/// Expiry is lazy: dead entries are dropped the next time they are touched.
/// Time comes from `tokio::time`, so paused-clock tests can advance past TTLs.
#[derive(Default)]
pub struct InMemoryCoordinationStore {
    slots: DashMap<String, Slot>,
}

impl InMemoryCoordinationStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.slots.iter().filter(|slot| slot.is_live(now)).count()
    }

    /// Whether the store holds no live entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining time to live of a key, `None` if absent or persistent
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let slot = self.slots.get(key)?;
        if !slot.is_live(now) {
            return None;
        }
        slot.expires_at.map(|deadline| deadline - now)
    }
}

#[async_trait]
impl CoordinationStore for InMemoryCoordinationStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = Instant::now();
        {
            match self.slots.get(key) {
                Some(slot) if slot.is_live(now) => return Ok(Some(slot.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        if self.slots.remove_if(key, |_, slot| !slot.is_live(now)).is_some() {
            trace!(key = %key, "expired entry evicted");
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        self.slots.insert(key.to_string(), Slot::expiring(value, ttl));
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let now = Instant::now();
        // The shard lock held by `entry` makes check-and-insert one step.
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    trace!(key = %key, "claim held by another caller");
                    Ok(false)
                } else {
                    debug!(key = %key, ?ttl, "expired claim taken over");
                    occupied.insert(Slot::expiring(value, ttl));
                    Ok(true)
                }
            }
            Entry::Vacant(vacant) => {
                trace!(key = %key, ?ttl, "claim taken");
                vacant.insert(Slot::expiring(value, ttl));
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let now = Instant::now();
        Ok(self
            .slots
            .remove(key)
            .map(|(_, slot)| slot.is_live(now))
            .unwrap_or(false))
    }

    async fn increment_by(&self, key: &str, delta: i64) -> StoreResult<i64> {
        let now = Instant::now();
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) if occupied.get().is_live(now) => {
                let slot = occupied.get_mut();
                let current: i64 = slot.value.parse().map_err(|_| StoreError::InvalidValue {
                    key: key.to_string(),
                    reason: "value is not an integer".into(),
                })?;
                let next = current.checked_add(delta).ok_or_else(|| StoreError::InvalidValue {
                    key: key.to_string(),
                    reason: format!("incrementing {current} by {delta} overflows"),
                })?;
                slot.value = next.to_string();
                Ok(next)
            }
            Entry::Occupied(mut occupied) => {
                occupied.insert(Slot { value: delta.to_string(), expires_at: None });
                Ok(delta)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot { value: delta.to_string(), expires_at: None });
                Ok(delta)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = InMemoryCoordinationStore::new();

        tokio_test::assert_ok!(store.set("k", "v", Duration::from_secs(10)).await);
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        assert!(store.delete("k").await.unwrap());
        assert!(store.get("k").await.unwrap().is_none());
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_if_absent_only_first_wins() {
        let store = InMemoryCoordinationStore::new();

        assert!(store.set_if_absent("claim", "a", Duration::from_secs(5)).await.unwrap());
        assert!(!store.set_if_absent("claim", "b", Duration::from_secs(5)).await.unwrap());
        assert_eq!(store.get("claim").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let store = InMemoryCoordinationStore::new();
        store.set_if_absent("claim", "a", Duration::from_secs(5)).await.unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(store.get("claim").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get("claim").await.unwrap().is_none());

        // An expired claim is claimable again
        assert!(store.set_if_absent("claim", "b", Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn test_increment_by() {
        let store = InMemoryCoordinationStore::new();

        assert_eq!(store.increment_by("counter", 3).await.unwrap(), 3);
        assert_eq!(store.increment_by("counter", 2).await.unwrap(), 5);
        assert_eq!(store.increment_by("counter", -1).await.unwrap(), 4);

        store.set("text", "abc", Duration::from_secs(5)).await.unwrap();
        assert!(matches!(
            store.increment_by("text", 1).await,
            Err(StoreError::InvalidValue { .. })
        ));
    }

    #[tokio::test]
    async fn test_increment_overflow_rejected() {
        let store = InMemoryCoordinationStore::new();
        store.increment_by("counter", i64::MAX).await.unwrap();

        let err = tokio_test::assert_err!(store.increment_by("counter", 1).await);
        assert!(matches!(err, StoreError::InvalidValue { .. }));
        // counter is left untouched
        assert_eq!(store.get("counter").await.unwrap(), Some(i64::MAX.to_string()));
        assert_eq!(store.increment_by("counter", -1).await.unwrap(), i64::MAX - 1);
    }

    #[tokio::test]
    async fn test_concurrent_claims_single_winner() {
        let store = Arc::new(InMemoryCoordinationStore::new());

        let mut handles = Vec::new();
        for i in 0..32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .set_if_absent("race", &i.to_string(), Duration::from_secs(30))
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
