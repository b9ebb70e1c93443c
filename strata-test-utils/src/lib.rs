//! STRATA Test Utilities
//!
//! Shared test infrastructure for the STRATA workspace:
//! - A recording store that fakes either cache tier, with failure and
//!   latency knobs
//! - Counting origins
//! - Proptest strategies for descriptors

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use proptest::prelude::*;
use serde::{de::DeserializeOwned, Serialize};
use strata_core::{CacheDescriptor, CacheMode, OriginError, StoreError, Tier, Ttl, ValueShape};
use strata_storage::{CacheStats, CacheValue, DiskStore, MemoryStore};

// ============================================================================
// RECORDING STORE
// ============================================================================

/// One entry held by a [`RecordingStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEntry {
    pub value: serde_json::Value,
    pub ttl: Ttl,
    /// Shape the entry was written with. `None` for memory writes and seeded
    /// entries, which read back under any shape.
    pub shape: Option<ValueShape>,
}

/// Fake store for either cache tier.
///
/// Values are held as JSON so tests can inspect them without knowing the
/// type. Counts every `get` and `put`, and can be told to fail or stall.
pub struct RecordingStore {
    tier: Tier,
    entries: Mutex<HashMap<String, RecordedEntry>>,
    gets: AtomicUsize,
    puts: AtomicUsize,
    fail_gets: AtomicBool,
    fail_puts: AtomicBool,
    get_delay: Mutex<Option<Duration>>,
    put_delay: Mutex<Option<Duration>>,
}

impl RecordingStore {
    pub fn new(tier: Tier) -> Self {
        Self {
            tier,
            entries: Mutex::new(HashMap::new()),
            gets: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
            fail_gets: AtomicBool::new(false),
            fail_puts: AtomicBool::new(false),
            get_delay: Mutex::new(None),
            put_delay: Mutex::new(None),
        }
    }

    pub fn memory() -> Self {
        Self::new(Tier::Memory)
    }

    pub fn disk() -> Self {
        Self::new(Tier::Disk)
    }

    /// Every `get` sleeps for `delay` first.
    pub fn with_get_delay(self, delay: Duration) -> Self {
        self.set_get_delay(Some(delay));
        self
    }

    /// Every `put` sleeps for `delay` before storing.
    pub fn with_put_delay(self, delay: Duration) -> Self {
        self.set_put_delay(Some(delay));
        self
    }

    /// Every `get` fails with a backend error.
    pub fn failing_gets(self) -> Self {
        self.fail_gets(true);
        self
    }

    pub fn set_get_delay(&self, delay: Option<Duration>) {
        *lock(&self.get_delay) = delay;
    }

    pub fn set_put_delay(&self, delay: Option<Duration>) {
        *lock(&self.put_delay) = delay;
    }

    pub fn fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Insert an entry directly, without counting a `put`.
    /// Unserializable values are stored as `null`.
    pub fn seed<T: Serialize>(&self, key: &str, value: &T, ttl: Ttl) {
        let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        lock(&self.entries).insert(
            key.to_string(),
            RecordedEntry {
                value,
                ttl,
                shape: None,
            },
        );
    }

    pub fn entry(&self, key: &str) -> Option<RecordedEntry> {
        lock(&self.entries).get(key).cloned()
    }

    /// Decode the stored value at `key`.
    pub fn value<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.entry(key)
            .and_then(|entry| serde_json::from_value(entry.value).ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        lock(&self.entries).contains_key(key)
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    fn backend_error(&self, op: &str) -> StoreError {
        StoreError::Backend {
            tier: self.tier,
            reason: format!("injected {} failure", op),
        }
    }

    async fn read<T: CacheValue>(
        &self,
        key: &str,
        shape: Option<ValueShape>,
    ) -> Result<Option<T>, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);

        let delay = *lock(&self.get_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(self.backend_error("get"));
        }

        let Some(entry) = self.entry(key) else {
            return Ok(None);
        };
        if let (Some(requested), Some(stored)) = (shape, entry.shape) {
            if requested != stored {
                return Err(StoreError::Decode {
                    key: key.to_string(),
                    reason: format!("stored as {}, requested as {}", stored, requested),
                });
            }
        }
        serde_json::from_value(entry.value)
            .map(Some)
            .map_err(|e| StoreError::Decode {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    async fn write<T: CacheValue>(
        &self,
        key: &str,
        value: &T,
        ttl: Ttl,
        shape: Option<ValueShape>,
    ) -> Result<(), StoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);

        let delay = *lock(&self.put_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(self.backend_error("put"));
        }
        let value = serde_json::to_value(value).map_err(|e| StoreError::Encode {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        lock(&self.entries).insert(key.to_string(), RecordedEntry { value, ttl, shape });
        Ok(())
    }

    fn stats_snapshot(&self) -> CacheStats {
        CacheStats {
            entry_count: self.len() as u64,
            ..Default::default()
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl MemoryStore for RecordingStore {
    async fn get<T: CacheValue>(&self, key: &str) -> Result<Option<T>, StoreError> {
        self.read(key, None).await
    }

    async fn put<T: CacheValue>(&self, key: &str, value: &T, ttl: Ttl) -> Result<(), StoreError> {
        self.write(key, value, ttl, None).await
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        Ok(lock(&self.entries).remove(key).is_some())
    }

    async fn clear(&self) -> Result<u64, StoreError> {
        let mut entries = lock(&self.entries);
        let removed = entries.len() as u64;
        entries.clear();
        Ok(removed)
    }

    async fn stats(&self) -> Result<CacheStats, StoreError> {
        Ok(self.stats_snapshot())
    }
}

#[async_trait]
impl DiskStore for RecordingStore {
    async fn get<T: CacheValue>(
        &self,
        key: &str,
        shape: ValueShape,
    ) -> Result<Option<T>, StoreError> {
        self.read(key, Some(shape)).await
    }

    async fn put<T: CacheValue>(
        &self,
        key: &str,
        value: &T,
        ttl: Ttl,
        shape: ValueShape,
    ) -> Result<(), StoreError> {
        self.write(key, value, ttl, Some(shape)).await
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        Ok(lock(&self.entries).remove(key).is_some())
    }

    async fn clear(&self) -> Result<u64, StoreError> {
        let mut entries = lock(&self.entries);
        let removed = entries.len() as u64;
        entries.clear();
        Ok(removed)
    }

    async fn stats(&self) -> Result<CacheStats, StoreError> {
        Ok(self.stats_snapshot())
    }
}

// ============================================================================
// ORIGINS
// ============================================================================

/// Boxed future returned by the origins built here.
pub type OriginFuture<T> = Pin<Box<dyn Future<Output = Result<Option<T>, OriginError>> + Send>>;

/// Counts how many origins built from it were invoked.
#[derive(Debug, Clone, Default)]
pub struct OriginCalls(Arc<AtomicUsize>);

impl OriginCalls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    /// An origin that resolves to `result`.
    pub fn returning<T: Send + 'static>(
        &self,
        result: Result<Option<T>, OriginError>,
    ) -> impl FnOnce() -> OriginFuture<T> + Send + 'static {
        self.delayed(Duration::ZERO, result)
    }

    /// An origin that resolves to `result` after `delay`.
    pub fn delayed<T: Send + 'static>(
        &self,
        delay: Duration,
        result: Result<Option<T>, OriginError>,
    ) -> impl FnOnce() -> OriginFuture<T> + Send + 'static {
        let calls = Arc::clone(&self.0);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                result
            }) as OriginFuture<T>
        }
    }

    /// An origin that never resolves.
    pub fn pending<T: Send + 'static>(&self) -> impl FnOnce() -> OriginFuture<T> + Send + 'static {
        let calls = Arc::clone(&self.0);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(std::future::pending::<Result<Option<T>, OriginError>>()) as OriginFuture<T>
        }
    }
}

// ============================================================================
// PROPTEST STRATEGIES
// ============================================================================

pub fn arb_cache_mode() -> impl Strategy<Value = CacheMode> {
    proptest::sample::select(CacheMode::ALL.to_vec())
}

pub fn arb_ttl() -> impl Strategy<Value = Ttl> {
    prop_oneof![Just(Ttl::Infinite), (1u64..86_400).prop_map(Ttl::secs)]
}

pub fn arb_shape() -> impl Strategy<Value = ValueShape> {
    prop_oneof![Just(ValueShape::Json), Just(ValueShape::Binary)]
}

pub fn arb_key() -> impl Strategy<Value = String> {
    "[a-z]{1,8}:[0-9]{1,4}"
}

/// Descriptors with a non-empty key, in every mode.
pub fn arb_descriptor() -> impl Strategy<Value = CacheDescriptor> {
    (arb_key(), arb_cache_mode(), arb_ttl(), arb_shape()).prop_filter_map(
        "descriptor must build",
        |(key, mode, ttl, shape)| {
            CacheDescriptor::builder()
                .key(key)
                .mode(mode)
                .ttl(ttl)
                .shape(shape)
                .build()
                .ok()
        },
    )
}
