//! Error types for STRATA operations

use crate::descriptor::{CacheMode, Tier};
use thiserror::Error;
use uuid::Uuid;

/// Configuration errors.
///
/// Raised synchronously, before any tier is attempted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Cache key must not be empty when mode is {mode}")]
    EmptyKey { mode: CacheMode },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },

    #[error("Failed to read configuration file {path}: {reason}")]
    Io { path: String, reason: String },
}

/// Cache store errors.
///
/// The cascade never surfaces these to callers; a failing memory or disk
/// tier degrades to a miss.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{tier} store backend error: {reason}")]
    Backend { tier: Tier, reason: String },

    #[error("Failed to encode value for key {key}: {reason}")]
    Encode { key: String, reason: String },

    #[error("Failed to decode value for key {key}: {reason}")]
    Decode { key: String, reason: String },

    #[error("{tier} store lock poisoned")]
    LockPoisoned { tier: Tier },
}

/// Result dispatch errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Outcome for fetch {fetch_id} was already delivered")]
    AlreadyDelivered { fetch_id: Uuid },

    #[error("Fetch {fetch_id} was cancelled before delivery")]
    Cancelled { fetch_id: Uuid },

    #[error("Fetch {fetch_id} task aborted: {reason}")]
    Aborted { fetch_id: Uuid, reason: String },
}

/// Master error type for all STRATA errors.
#[derive(Debug, Clone, Error)]
pub enum StrataError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Result type alias for STRATA operations.
pub type StrataResult<T> = Result<T, StrataError>;

// =============================================================================
// TESTS
// =============================================================================
