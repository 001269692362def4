//! Read-through cache used for derived views (effective permissions, dashboard).
//!
//! The cache is an optimization only. Every writer that changes the data behind
//! a key calls [`Cache::invalidate`] before it returns, so a reader never sees a
//! value older than the last completed mutation.
//!
//! Each key carries a generation that `invalidate` bumps. A reader records the
//! generation before it loads from the store and `put` refuses the value when
//! the generation has moved on, so a load that raced a write cannot be stored
//! after that write's invalidation.

use std::future::Future;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::errors::{AppError, AppResult};

pub trait Cache: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    /// Current generation of `key`; read before computing a value to store.
    fn generation(&self, key: &str) -> u64;
    /// Stores `value` unless `key` was invalidated after `generation` was read.
    /// Returns whether the value was stored.
    fn put(&self, key: &str, value: Value, ttl: Duration, generation: u64) -> bool;
    fn invalidate(&self, key: &str);
}

/// Returns the cached value under `key`, or runs `producer` and stores its result.
pub async fn get_or_compute<T, F, Fut>(cache: &dyn Cache, key: &str, ttl: Duration, producer: F) -> AppResult<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    if let Some(hit) = cache.get(key) {
        match serde_json::from_value::<T>(hit) {
            Ok(value) => return Ok(value),
            Err(err) => {
                tracing::warn!(key, error = %err, "discarding undecodable cache entry");
                cache.invalidate(key);
            }
        }
    }

    let generation = cache.generation(key);
    let value = producer().await?;
    let encoded = serde_json::to_value(&value)
        .map_err(|err| AppError::internal(format!("failed to encode cache entry {key}: {err}")))?;
    if !cache.put(key, encoded, ttl, generation) {
        tracing::debug!(key, "cache entry invalidated while computing; not stored");
    }
    Ok(value)
}

struct Entry {
    value: Value,
    expires_at: Instant,
}

#[derive(Default)]
struct Slot {
    generation: u64,
    entry: Option<Entry>,
}

#[derive(Default)]
pub struct MemoryCache {
    slots: DashMap<String, Slot>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Option<Value> {
        let mut slot = self.slots.get_mut(key)?;
        match &slot.entry {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                slot.entry = None;
                None
            }
            None => None,
        }
    }

    fn generation(&self, key: &str) -> u64 {
        self.slots.get(key).map(|slot| slot.generation).unwrap_or(0)
    }

    fn put(&self, key: &str, value: Value, ttl: Duration, generation: u64) -> bool {
        // check and store under the same shard lock that invalidate takes
        let mut slot = self.slots.entry(key.to_string()).or_default();
        if slot.generation != generation {
            return false;
        }
        slot.entry = Some(Entry {
            value,
            expires_at: Instant::now() + ttl,
        });
        true
    }

    fn invalidate(&self, key: &str) {
        let mut slot = self.slots.entry(key.to_string()).or_default();
        slot.generation += 1;
        slot.entry = None;
    }
}

/// Cache that stores nothing; every lookup recomputes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

impl Cache for NoopCache {
    fn get(&self, _key: &str) -> Option<Value> {
        None
    }

    fn generation(&self, _key: &str) -> u64 {
        0
    }

    fn put(&self, _key: &str, _value: Value, _ttl: Duration, _generation: u64) -> bool {
        false
    }

    fn invalidate(&self, _key: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn computes_once_until_invalidated() {
        let cache = MemoryCache::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let n: usize = get_or_compute(&cache, "k", Duration::from_secs(60), || async {
                Ok(calls.fetch_add(1, Ordering::SeqCst) + 1)
            })
            .await
            .unwrap();
            assert_eq!(n, 1);
        }

        cache.invalidate("k");
        let n: usize = get_or_compute(&cache, "k", Duration::from_secs(60), || async {
            Ok(calls.fetch_add(1, Ordering::SeqCst) + 1)
        })
        .await
        .unwrap();
        assert_eq!(n, 2);
    }

    #[tokio::test]
    async fn expired_entries_are_dropped() {
        let cache = MemoryCache::new();
        assert!(cache.put("k", Value::from(1), Duration::from_millis(0), 0));
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn puts_from_before_an_invalidation_are_refused() {
        let cache = MemoryCache::new();
        let before = cache.generation("k");

        cache.invalidate("k");
        assert!(!cache.put("k", Value::from("stale"), Duration::from_secs(60), before));
        assert!(cache.get("k").is_none());

        let current = cache.generation("k");
        assert!(cache.put("k", Value::from("fresh"), Duration::from_secs(60), current));
        assert_eq!(cache.get("k"), Some(Value::from("fresh")));
    }

    #[tokio::test]
    async fn a_load_racing_an_invalidation_is_not_stored() {
        let cache = MemoryCache::new();

        let value: u32 = get_or_compute(&cache, "k", Duration::from_secs(60), || async {
            // a writer commits and invalidates while this load is in flight
            cache.invalidate("k");
            Ok(1)
        })
        .await
        .unwrap();

        assert_eq!(value, 1);
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn noop_cache_always_recomputes() {
        let cache = NoopCache;
        let calls = AtomicUsize::new(0);
        for expected in 1..=2 {
            let n: usize = get_or_compute(&cache, "k", Duration::from_secs(60), || async {
                Ok(calls.fetch_add(1, Ordering::SeqCst) + 1)
            })
            .await
            .unwrap();
            assert_eq!(n, expected);
        }
    }

    #[tokio::test]
    async fn producer_errors_are_not_cached() {
        let cache = MemoryCache::new();
        let res: AppResult<u32> =
            get_or_compute(&cache, "k", Duration::from_secs(60), || async { Err(AppError::internal("boom")) }).await;
        assert!(res.is_err());
        assert!(cache.get("k").is_none());
    }
}
