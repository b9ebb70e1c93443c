//! Strata Configuration
//!
//! Runtime settings for the memory and disk tiers, logging, and error
//! message localisation. Loaded from `STRATA_*` environment variables or a
//! TOML file; every field has a development default.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::classify::ErrorClassifier;
use crate::error::ConfigError;

/// Upper bound for the LMDB map size (1 TiB).
pub const MAX_DISK_SIZE_MB: usize = 1024 * 1024;

/// Workspace-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    /// Maximum number of entries held by the memory tier.
    pub memory_capacity: usize,

    /// Budget for a single memory tier lookup, in milliseconds.
    pub memory_timeout_ms: u64,

    /// Directory holding the LMDB environment.
    pub disk_path: PathBuf,

    /// LMDB map size in megabytes.
    pub disk_max_size_mb: usize,

    /// Budget for a single disk tier lookup, in milliseconds.
    pub disk_timeout_ms: u64,

    /// Fallback `EnvFilter` directive when `RUST_LOG` is unset.
    pub log_filter: String,

    /// Emit logs as JSON lines.
    pub log_json: bool,

    /// Error message overrides keyed by code name (`"DNS"`), HTTP status
    /// (`"404"`) or timeout phase (`"TIMEOUT_CONNECT"`).
    pub messages: HashMap<String, String>,
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            memory_capacity: 1024,
            memory_timeout_ms: 50,
            disk_path: std::env::temp_dir().join("strata-cache"),
            disk_max_size_mb: 100,
            disk_timeout_ms: 500,
            log_filter: "info".to_string(),
            log_json: false,
            messages: HashMap::new(),
        }
    }
}

impl StrataConfig {
    /// Create StrataConfig from environment variables.
    ///
    /// Environment variables:
    /// - `STRATA_MEMORY_CAPACITY`: Memory tier entry limit (default: 1024)
    /// - `STRATA_MEMORY_TIMEOUT_MS`: Memory lookup budget (default: 50)
    /// - `STRATA_DISK_PATH`: LMDB directory (default: `$TMPDIR/strata-cache`)
    /// - `STRATA_DISK_MAX_SIZE_MB`: LMDB map size (default: 100)
    /// - `STRATA_DISK_TIMEOUT_MS`: Disk lookup budget (default: 500)
    /// - `STRATA_LOG`: Fallback log filter (default: "info")
    /// - `STRATA_LOG_JSON`: "true" or "false" (default: false)
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let memory_capacity = std::env::var("STRATA_MEMORY_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.memory_capacity);

        let memory_timeout_ms = std::env::var("STRATA_MEMORY_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.memory_timeout_ms);

        let disk_path = std::env::var("STRATA_DISK_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.disk_path);

        let disk_max_size_mb = std::env::var("STRATA_DISK_MAX_SIZE_MB")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.disk_max_size_mb);

        let disk_timeout_ms = std::env::var("STRATA_DISK_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.disk_timeout_ms);

        let log_filter = std::env::var("STRATA_LOG").unwrap_or(defaults.log_filter);

        let log_json = std::env::var("STRATA_LOG_JSON")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(defaults.log_json);

        Self {
            memory_capacity,
            memory_timeout_ms,
            disk_path,
            disk_max_size_mb,
            disk_timeout_ms,
            log_filter,
            log_json,
            messages: defaults.messages,
        }
    }

    /// Parse a TOML document. Missing fields take their defaults.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        toml::from_str(input).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "memory_capacity".to_string(),
                value: self.memory_capacity.to_string(),
                reason: "must be positive".to_string(),
            });
        }

        if self.memory_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "memory_timeout_ms".to_string(),
                value: self.memory_timeout_ms.to_string(),
                reason: "must be positive".to_string(),
            });
        }

        if self.disk_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "disk_timeout_ms".to_string(),
                value: self.disk_timeout_ms.to_string(),
                reason: "must be positive".to_string(),
            });
        }

        if self.disk_max_size_mb == 0 {
            return Err(ConfigError::InvalidValue {
                field: "disk_max_size_mb".to_string(),
                value: self.disk_max_size_mb.to_string(),
                reason: "must be positive".to_string(),
            });
        }

        if self.disk_max_size_mb > MAX_DISK_SIZE_MB
            || self.disk_max_size_mb.checked_mul(1024 * 1024).is_none()
        {
            return Err(ConfigError::InvalidValue {
                field: "disk_max_size_mb".to_string(),
                value: self.disk_max_size_mb.to_string(),
                reason: format!("must be at most {}", MAX_DISK_SIZE_MB),
            });
        }

        if self.disk_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "disk_path".to_string(),
                value: String::new(),
                reason: "must not be empty".to_string(),
            });
        }

        // Surfaces bad message keys at load time rather than first failure.
        self.classifier()?;

        Ok(())
    }

    pub fn memory_timeout(&self) -> Duration {
        Duration::from_millis(self.memory_timeout_ms)
    }

    pub fn disk_timeout(&self) -> Duration {
        Duration::from_millis(self.disk_timeout_ms)
    }

    pub fn disk_max_size_bytes(&self) -> usize {
        self.disk_max_size_mb.saturating_mul(1024 * 1024)
    }

    /// Build an [`ErrorClassifier`] with the configured message overrides.
    pub fn classifier(&self) -> Result<ErrorClassifier, ConfigError> {
        ErrorClassifier::default().with_overrides(&self.messages)
    }
}
