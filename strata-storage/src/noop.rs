//! A store that holds nothing.
//!
//! Useful as the unused tier of a cascade, e.g. the disk slot of a process
//! that only ever fetches with `MemoryOnly`.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use strata_core::{StoreError, Ttl, ValueShape};

use crate::traits::{CacheStats, CacheValue, DiskStore, MemoryStore};

/// Every lookup misses; every write is accepted and discarded.
#[derive(Debug, Default)]
pub struct NoopStore {
    misses: AtomicU64,
}

impl NoopStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn miss<T>(&self) -> Result<Option<T>, StoreError> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            misses: self.misses.load(Ordering::Relaxed),
            ..Default::default()
        }
    }
}

#[async_trait]
impl MemoryStore for NoopStore {
    async fn get<T: CacheValue>(&self, _key: &str) -> Result<Option<T>, StoreError> {
        self.miss()
    }

    async fn put<T: CacheValue>(&self, _key: &str, _value: &T, _ttl: Ttl) -> Result<(), StoreError> {
        Ok(())
    }

    async fn remove(&self, _key: &str) -> Result<bool, StoreError> {
        Ok(false)
    }

    async fn clear(&self) -> Result<u64, StoreError> {
        Ok(0)
    }

    async fn stats(&self) -> Result<CacheStats, StoreError> {
        Ok(self.snapshot())
    }
}

#[async_trait]
impl DiskStore for NoopStore {
    async fn get<T: CacheValue>(
        &self,
        _key: &str,
        _shape: ValueShape,
    ) -> Result<Option<T>, StoreError> {
        self.miss()
    }

    async fn put<T: CacheValue>(
        &self,
        _key: &str,
        _value: &T,
        _ttl: Ttl,
        _shape: ValueShape,
    ) -> Result<(), StoreError> {
        Ok(())
    }

    async fn remove(&self, _key: &str) -> Result<bool, StoreError> {
        Ok(false)
    }

    async fn clear(&self) -> Result<u64, StoreError> {
        Ok(0)
    }

    async fn stats(&self) -> Result<CacheStats, StoreError> {
        Ok(self.snapshot())
    }
}
