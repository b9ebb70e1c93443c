//! In-memory store with LRU eviction and per-entry TTL, backed by moka.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use moka::Expiry;
use strata_core::{StoreError, StrataConfig, Ttl};
use tracing::trace;

use crate::traits::{CacheStats, CacheValue, MemoryStore};

#[derive(Clone)]
struct Entry {
    value: Arc<dyn Any + Send + Sync>,
    ttl: Ttl,
}

/// Expires each entry after the TTL it was written with.
struct TtlExpiry;

impl Expiry<String, Entry> for TtlExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Entry,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl.as_duration()
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl.as_duration()
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    evictions: AtomicU64,
}

/// Process-local [`MemoryStore`].
///
/// Values are held as shared, type-erased objects; a read clones the value
/// out. Reading a key as a different type than it was written with is a
/// decode error.
pub struct InMemoryStore {
    capacity: usize,
    cache: Cache<String, Entry>,
    counters: Arc<Counters>,
}

impl InMemoryStore {
    /// Create a store holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let counters = Arc::new(Counters::default());

        let listener_counters = Arc::clone(&counters);
        let cache = Cache::builder()
            .max_capacity(capacity as u64)
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(TtlExpiry)
            .eviction_listener(move |key: Arc<String>, _value: Entry, cause: RemovalCause| {
                if cause.was_evicted() {
                    listener_counters.evictions.fetch_add(1, Ordering::Relaxed);
                    trace!(key = %key, ?cause, "Evicted memory entry");
                }
            })
            .build();

        Self {
            capacity,
            cache,
            counters,
        }
    }

    pub fn from_config(config: &StrataConfig) -> Self {
        Self::new(config.memory_capacity)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live entries after pending evictions and expirations settle.
    pub async fn len(&self) -> usize {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count() as usize
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::from_config(&StrataConfig::default())
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn get<T: CacheValue>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(entry) = self.cache.get(key).await else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        match entry.value.downcast_ref::<T>() {
            Some(value) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value.clone()))
            }
            None => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                Err(StoreError::Decode {
                    key: key.to_string(),
                    reason: format!("stored value is not a {}", std::any::type_name::<T>()),
                })
            }
        }
    }

    async fn put<T: CacheValue>(&self, key: &str, value: &T, ttl: Ttl) -> Result<(), StoreError> {
        let entry = Entry {
            value: Arc::new(value.clone()),
            ttl,
        };
        self.cache.insert(key.to_string(), entry).await;
        // Capacity is enforced during maintenance; run it so the bound holds on return.
        self.cache.run_pending_tasks().await;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.cache.remove(key).await.is_some())
    }

    async fn clear(&self) -> Result<u64, StoreError> {
        self.cache.run_pending_tasks().await;
        let removed = self.cache.entry_count();
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        Ok(removed)
    }

    async fn stats(&self) -> Result<CacheStats, StoreError> {
        self.cache.run_pending_tasks().await;
        Ok(CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            entry_count: self.cache.entry_count(),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        })
    }
}
