//! STRATA Storage - Memory and Disk Tiers
//!
//! Store traits consulted by the cascade, plus the stock implementations:
//! an LRU in-memory store, an LMDB disk store, and a no-op store.

pub mod lmdb;
pub mod memory;
pub mod noop;
pub mod traits;

pub use lmdb::LmdbDiskStore;
pub use memory::InMemoryStore;
pub use noop::NoopStore;
pub use traits::{CacheStats, CacheValue, DiskStore, MemoryStore};
