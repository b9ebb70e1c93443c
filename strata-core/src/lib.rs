//! STRATA Core - Descriptors, Outcomes, Errors
//!
//! Types shared by every tier of a fetch: the cache descriptor that routes a
//! request, the outcome delivered to the caller, the error taxonomy that
//! origin failures are folded into, and workspace configuration.
//! This crate performs no I/O beyond reading configuration files.

pub mod classify;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod outcome;

use uuid::Uuid;

pub use classify::{ClassifiedError, ErrorClassifier, ErrorCode, OriginError, TimeoutPhase};
pub use config::{StrataConfig, MAX_DISK_SIZE_MB};
pub use descriptor::{CacheDescriptor, CacheDescriptorBuilder, CacheMode, Tier, Ttl, ValueShape};
pub use error::{ConfigError, DispatchError, StoreError, StrataError, StrataResult};
pub use outcome::{FetchOutcome, Fetched, Provenance, TierResult};

/// Identifier of a single fetch invocation.
/// UUIDv7, so ids sort by start time in logs.
pub type FetchId = Uuid;

/// Generate a new time-ordered [`FetchId`].
pub fn new_fetch_id() -> FetchId {
    Uuid::now_v7()
}
