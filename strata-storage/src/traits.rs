//! Store traits for the memory and disk tiers.
//!
//! Both traits are generic over the cached value type, so a single store
//! instance can hold values of many types under different keys.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use strata_core::{StoreError, Ttl, ValueShape};

/// Marker trait for values that can pass through the cache tiers.
///
/// Blanket-implemented for every `Clone + Serialize + DeserializeOwned`
/// type that is `Send + Sync + 'static`.
pub trait CacheValue: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Fast, process-local tier.
///
/// Implementations must be safe for concurrent use; the cascade shares one
/// instance across every in-flight fetch.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Look up `key`. Expired entries read as `None`.
    async fn get<T: CacheValue>(&self, key: &str) -> Result<Option<T>, StoreError>;

    /// Insert or replace `key`, expiring after `ttl`.
    async fn put<T: CacheValue>(&self, key: &str, value: &T, ttl: Ttl) -> Result<(), StoreError>;

    /// Remove `key`. Returns true if an entry was present.
    async fn remove(&self, key: &str) -> Result<bool, StoreError>;

    /// Drop every entry. Returns the number removed.
    async fn clear(&self) -> Result<u64, StoreError>;

    async fn stats(&self) -> Result<CacheStats, StoreError>;
}

/// Persistent tier.
///
/// Values are encoded with the codec named by `shape`; reading with a
/// different shape than the entry was written with is a decode error.
#[async_trait]
pub trait DiskStore: Send + Sync {
    /// Look up `key`. Expired entries read as `None`.
    async fn get<T: CacheValue>(&self, key: &str, shape: ValueShape)
        -> Result<Option<T>, StoreError>;

    /// Insert or replace `key`, expiring after `ttl`.
    async fn put<T: CacheValue>(
        &self,
        key: &str,
        value: &T,
        ttl: Ttl,
        shape: ValueShape,
    ) -> Result<(), StoreError>;

    /// Remove `key`. Returns true if an entry was present.
    async fn remove(&self, key: &str) -> Result<bool, StoreError>;

    /// Drop every entry. Returns the number removed.
    async fn clear(&self) -> Result<u64, StoreError>;

    async fn stats(&self) -> Result<CacheStats, StoreError>;
}

/// Statistics about store usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of lookups that returned a value.
    pub hits: u64,
    /// Number of lookups that returned nothing, including expired entries.
    pub misses: u64,
    /// Number of lookups or writes that failed inside the store.
    pub errors: u64,
    /// Number of entries currently held.
    pub entry_count: u64,
    /// Number of entries dropped for capacity or expiry.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_empty() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
    }
}
