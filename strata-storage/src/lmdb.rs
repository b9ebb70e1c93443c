//! LMDB-backed disk store.
//!
//! Uses the heed crate (Rust bindings for LMDB) for a memory-mapped,
//! persistent key-value store.
//!
//! # Entry Format
//!
//! ```text
//! [cached_at: i64 LE millis][expires_at: i64 LE millis, -1 = never][shape: u8][payload]
//! ```
//!
//! The payload codec is chosen by [`ValueShape`]: `Json` uses heed's
//! `SerdeJson`, `Binary` uses `SerdeBincode`. Bincode is not self-describing,
//! so `Binary` suits concrete structs rather than `serde_json::Value`.
//!
//! # Blocking
//!
//! LMDB transactions block. Every operation runs on the tokio blocking pool,
//! so a caller-side timeout can abandon a stuck read; the read completes in
//! the background and its result is dropped.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use heed::types::{Bytes, SerdeBincode, SerdeJson};
use heed::{BytesDecode, BytesEncode, Database, Env, EnvOpenOptions};
use serde::{de::DeserializeOwned, Serialize};
use strata_core::{StoreError, StrataConfig, Tier, Ttl, ValueShape};
use tracing::{debug, info, trace};

use crate::traits::{CacheStats, CacheValue, DiskStore};

const HEADER_LEN: usize = 17;
const NO_EXPIRY: i64 = -1;

fn backend(err: impl Display) -> StoreError {
    StoreError::Backend {
        tier: Tier::Disk,
        reason: err.to_string(),
    }
}

// ============================================================================
// ENTRY ENVELOPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EntryHeader {
    cached_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    shape: ValueShape,
}

impl EntryHeader {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

fn encode_payload<T: Serialize>(
    key: &str,
    value: &T,
    shape: ValueShape,
) -> Result<Vec<u8>, StoreError> {
    let encoded = match shape {
        ValueShape::Json => SerdeJson::<T>::bytes_encode(value),
        ValueShape::Binary => SerdeBincode::<T>::bytes_encode(value),
    };
    encoded
        .map(|bytes| bytes.into_owned())
        .map_err(|e| StoreError::Encode {
            key: key.to_string(),
            reason: e.to_string(),
        })
}

fn decode_payload<T: DeserializeOwned>(
    key: &str,
    payload: &[u8],
    shape: ValueShape,
) -> Result<T, StoreError> {
    let decoded = match shape {
        ValueShape::Json => SerdeJson::<T>::bytes_decode(payload),
        ValueShape::Binary => SerdeBincode::<T>::bytes_decode(payload),
    };
    decoded.map_err(|e| StoreError::Decode {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn encode_entry<T: Serialize>(
    key: &str,
    value: &T,
    ttl: Ttl,
    shape: ValueShape,
    cached_at: DateTime<Utc>,
) -> Result<Vec<u8>, StoreError> {
    let payload = encode_payload(key, value, shape)?;
    let expires_at = ttl
        .expires_at(cached_at)
        .map(|at| at.timestamp_millis())
        .unwrap_or(NO_EXPIRY);

    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(&cached_at.timestamp_millis().to_le_bytes());
    bytes.extend_from_slice(&expires_at.to_le_bytes());
    bytes.push(shape.tag());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

fn read_i64(key: &str, bytes: &[u8]) -> Result<i64, StoreError> {
    let array: [u8; 8] = bytes.try_into().map_err(|_| StoreError::Decode {
        key: key.to_string(),
        reason: "truncated entry header".to_string(),
    })?;
    Ok(i64::from_le_bytes(array))
}

fn decode_header<'a>(key: &str, bytes: &'a [u8]) -> Result<(EntryHeader, &'a [u8]), StoreError> {
    if bytes.len() < HEADER_LEN {
        return Err(StoreError::Decode {
            key: key.to_string(),
            reason: format!("entry is {} bytes, header needs {}", bytes.len(), HEADER_LEN),
        });
    }

    let cached_millis = read_i64(key, &bytes[0..8])?;
    let expires_millis = read_i64(key, &bytes[8..16])?;
    let shape = ValueShape::from_tag(bytes[16]).ok_or_else(|| StoreError::Decode {
        key: key.to_string(),
        reason: format!("unknown shape tag {}", bytes[16]),
    })?;

    let cached_at = DateTime::from_timestamp_millis(cached_millis).unwrap_or_else(Utc::now);
    let expires_at = if expires_millis == NO_EXPIRY {
        None
    } else {
        DateTime::from_timestamp_millis(expires_millis)
    };

    Ok((
        EntryHeader {
            cached_at,
            expires_at,
            shape,
        },
        &bytes[HEADER_LEN..],
    ))
}

// ============================================================================
// STORE
// ============================================================================

/// Persistent [`DiskStore`] over a single LMDB database.
///
/// # Example
///
/// ```ignore
/// use strata_core::{Ttl, ValueShape};
/// use strata_storage::{DiskStore, LmdbDiskStore};
///
/// let store = LmdbDiskStore::open("/tmp/strata", 100)?;
/// store.put("user:42", &user, Ttl::secs(60), ValueShape::Json).await?;
/// let cached: Option<User> = store.get("user:42", ValueShape::Json).await?;
/// ```
#[derive(Clone, Debug)]
pub struct LmdbDiskStore {
    env: Env,
    db: Database<Bytes, Bytes>,
    path: PathBuf,
    stats: Arc<RwLock<CacheStats>>,
}

impl LmdbDiskStore {
    /// Open (or create) a store in `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let map_size = max_size_mb
            .max(1)
            .checked_mul(1024 * 1024)
            .ok_or_else(|| backend(format!("map size of {} MB overflows", max_size_mb)))?;
        std::fs::create_dir_all(path).map_err(backend)?;

        // SAFETY: the environment is not opened twice within this process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(1)
                .open(path)
        }
        .map_err(backend)?;

        let mut wtxn = env.write_txn().map_err(backend)?;
        let db: Database<Bytes, Bytes> = env.create_database(&mut wtxn, None).map_err(backend)?;
        wtxn.commit().map_err(backend)?;

        info!(path = %path.display(), max_size_mb, "Opened LMDB disk store");

        Ok(Self {
            env,
            db,
            path: path.to_path_buf(),
            stats: Arc::new(RwLock::new(CacheStats::default())),
        })
    }

    pub fn from_config(config: &StrataConfig) -> Result<Self, StoreError> {
        Self::open(&config.disk_path, config.disk_max_size_mb)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of stored entries, expired or not.
    pub async fn len(&self) -> Result<u64, StoreError> {
        self.run_blocking(|env, db| {
            let rtxn = env.read_txn().map_err(backend)?;
            db.len(&rtxn).map_err(backend)
        })
        .await
    }

    pub async fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len().await? == 0)
    }

    /// Delete every entry past its TTL, plus any entry whose header cannot
    /// be read. Returns the number of entries removed.
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        let now = Utc::now();
        let purged = self
            .run_blocking(move |env, db| {
                let mut wtxn = env.write_txn().map_err(backend)?;

                let doomed: Vec<Vec<u8>> = {
                    let mut doomed = Vec::new();
                    for item in db.iter(&wtxn).map_err(backend)? {
                        let (key, bytes) = item.map_err(backend)?;
                        let key_str = String::from_utf8_lossy(key);
                        let expired = decode_header(&key_str, bytes)
                            .map(|(header, _)| header.is_expired(now))
                            .unwrap_or(true);
                        if expired {
                            doomed.push(key.to_vec());
                        }
                    }
                    doomed
                };

                let mut purged = 0u64;
                for key in &doomed {
                    if db.delete(&mut wtxn, key).map_err(backend)? {
                        purged += 1;
                    }
                }
                wtxn.commit().map_err(backend)?;
                Ok(purged)
            })
            .await?;

        if purged > 0 {
            if let Ok(mut stats) = self.stats.write() {
                stats.evictions += purged;
            }
        }
        debug!(purged, "Purged expired disk entries");
        Ok(purged)
    }

    async fn run_blocking<R, F>(&self, op: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Env, Database<Bytes, Bytes>) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let env = self.env.clone();
        let db = self.db;
        tokio::task::spawn_blocking(move || op(&env, db))
            .await
            .map_err(backend)?
    }

    fn record(&self, update: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.write() {
            update(&mut stats);
        }
    }

    async fn read_raw(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let owned_key = key.to_string();
        self.run_blocking(move |env, db| {
            let rtxn = env.read_txn().map_err(backend)?;
            let bytes = db.get(&rtxn, owned_key.as_bytes()).map_err(backend)?;
            Ok(bytes.map(<[u8]>::to_vec))
        })
        .await
    }
}

#[async_trait]
impl DiskStore for LmdbDiskStore {
    async fn get<T: CacheValue>(
        &self,
        key: &str,
        shape: ValueShape,
    ) -> Result<Option<T>, StoreError> {
        let bytes = match self.read_raw(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.record(|s| s.misses += 1);
                return Ok(None);
            }
            Err(e) => {
                self.record(|s| s.errors += 1);
                return Err(e);
            }
        };

        let decoded = decode_header(key, &bytes).and_then(|(header, payload)| {
            if header.is_expired(Utc::now()) {
                return Ok(None);
            }
            if header.shape != shape {
                return Err(StoreError::Decode {
                    key: key.to_string(),
                    reason: format!("stored as {}, requested as {}", header.shape, shape),
                });
            }
            trace!(key = %key, cached_at = %header.cached_at, "Disk entry found");
            decode_payload::<T>(key, payload, shape).map(Some)
        });

        match &decoded {
            Ok(Some(_)) => self.record(|s| s.hits += 1),
            Ok(None) => self.record(|s| s.misses += 1),
            Err(_) => self.record(|s| s.errors += 1),
        }
        decoded
    }

    async fn put<T: CacheValue>(
        &self,
        key: &str,
        value: &T,
        ttl: Ttl,
        shape: ValueShape,
    ) -> Result<(), StoreError> {
        let entry = match encode_entry(key, value, ttl, shape, Utc::now()) {
            Ok(entry) => entry,
            Err(e) => {
                self.record(|s| s.errors += 1);
                return Err(e);
            }
        };

        let owned_key = key.to_string();
        let written = self
            .run_blocking(move |env, db| {
                let mut wtxn = env.write_txn().map_err(backend)?;
                db.put(&mut wtxn, owned_key.as_bytes(), &entry)
                    .map_err(backend)?;
                wtxn.commit().map_err(backend)
            })
            .await;

        if written.is_err() {
            self.record(|s| s.errors += 1);
        }
        written
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let owned_key = key.to_string();
        self.run_blocking(move |env, db| {
            let mut wtxn = env.write_txn().map_err(backend)?;
            let deleted = db.delete(&mut wtxn, owned_key.as_bytes()).map_err(backend)?;
            wtxn.commit().map_err(backend)?;
            Ok(deleted)
        })
        .await
    }

    async fn clear(&self) -> Result<u64, StoreError> {
        self.run_blocking(|env, db| {
            let mut wtxn = env.write_txn().map_err(backend)?;
            let removed = db.len(&wtxn).map_err(backend)?;
            db.clear(&mut wtxn).map_err(backend)?;
            wtxn.commit().map_err(backend)?;
            Ok(removed)
        })
        .await
    }

    async fn stats(&self) -> Result<CacheStats, StoreError> {
        let entry_count = self.len().await?;
        let stats = self
            .stats
            .read()
            .map_err(|_| StoreError::LockPoisoned { tier: Tier::Disk })?;
        Ok(CacheStats {
            entry_count,
            ..stats.clone()
        })
    }
}
