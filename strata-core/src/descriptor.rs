//! Cache descriptors: the immutable per-fetch configuration.
//!
//! A [`CacheDescriptor`] names the key a value is cached under, which tiers
//! the fetch may consult ([`CacheMode`]), how long written-back values live
//! ([`Ttl`]) and which codec the disk tier uses ([`ValueShape`]).
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use strata_core::{CacheDescriptor, CacheMode, Ttl};
//!
//! let descriptor = CacheDescriptor::builder()
//!     .key("user:42")
//!     .mode(CacheMode::MemoryAndDisk)
//!     .ttl(Ttl::Finite(Duration::from_secs(60)))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(descriptor.key(), "user:42");
//! assert!(descriptor.mode().uses_disk());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

// ============================================================================
// TIERS
// ============================================================================

/// One level of the fallback order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Memory,
    Disk,
    Origin,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            Tier::Memory => "memory",
            Tier::Disk => "disk",
            Tier::Origin => "origin",
        };
        write!(f, "{}", value)
    }
}

// ============================================================================
// CACHE MODE
// ============================================================================

/// Which cache tiers a fetch consults before the origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Origin only, nothing is cached.
    #[default]
    None,
    MemoryOnly,
    DiskOnly,
    MemoryAndDisk,
}

impl CacheMode {
    /// All modes, in declaration order.
    pub const ALL: [CacheMode; 4] = [
        CacheMode::None,
        CacheMode::MemoryOnly,
        CacheMode::DiskOnly,
        CacheMode::MemoryAndDisk,
    ];

    /// The full tier order for this mode. Always ends with [`Tier::Origin`].
    pub fn tiers(self) -> &'static [Tier] {
        match self {
            CacheMode::None => &[Tier::Origin],
            CacheMode::MemoryOnly => &[Tier::Memory, Tier::Origin],
            CacheMode::DiskOnly => &[Tier::Disk, Tier::Origin],
            CacheMode::MemoryAndDisk => &[Tier::Memory, Tier::Disk, Tier::Origin],
        }
    }

    /// The cache tiers consulted before the origin, in order.
    pub fn cache_tiers(self) -> &'static [Tier] {
        let tiers = self.tiers();
        &tiers[..tiers.len() - 1]
    }

    /// Returns true if any cache tier is enabled.
    pub fn is_cached(self) -> bool {
        !matches!(self, CacheMode::None)
    }

    pub fn uses_memory(self) -> bool {
        matches!(self, CacheMode::MemoryOnly | CacheMode::MemoryAndDisk)
    }

    pub fn uses_disk(self) -> bool {
        matches!(self, CacheMode::DiskOnly | CacheMode::MemoryAndDisk)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CacheMode::None => "none",
            CacheMode::MemoryOnly => "memory_only",
            CacheMode::DiskOnly => "disk_only",
            CacheMode::MemoryAndDisk => "memory_and_disk",
        }
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CacheMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(CacheMode::None),
            "memory_only" | "memory" => Ok(CacheMode::MemoryOnly),
            "disk_only" | "disk" => Ok(CacheMode::DiskOnly),
            "memory_and_disk" | "double" => Ok(CacheMode::MemoryAndDisk),
            other => Err(ConfigError::InvalidValue {
                field: "mode".to_string(),
                value: other.to_string(),
                reason: "expected none, memory_only, disk_only or memory_and_disk".to_string(),
            }),
        }
    }
}

// ============================================================================
// TTL
// ============================================================================

/// Lifetime of a written-back cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Ttl {
    /// Never expires.
    #[default]
    Infinite,
    /// Expires this long after it was written.
    Finite(Duration),
}

impl Ttl {
    pub fn secs(secs: u64) -> Self {
        Ttl::Finite(Duration::from_secs(secs))
    }

    /// Interpret a seconds count where any negative value means "forever".
    pub fn from_secs_signed(secs: i64) -> Self {
        if secs < 0 {
            Ttl::Infinite
        } else {
            Ttl::Finite(Duration::from_secs(secs as u64))
        }
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self, Ttl::Infinite)
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            Ttl::Infinite => None,
            Ttl::Finite(d) => Some(*d),
        }
    }

    /// Absolute expiry for an entry written at `written_at`.
    ///
    /// Durations too large to represent are treated as never expiring.
    pub fn expires_at(&self, written_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let duration = self.as_duration()?;
        let delta = chrono::Duration::from_std(duration).ok()?;
        written_at.checked_add_signed(delta)
    }
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ttl::Infinite => write!(f, "infinite"),
            Ttl::Finite(d) => write!(f, "{}s", d.as_secs()),
        }
    }
}

// ============================================================================
// VALUE SHAPE
// ============================================================================

/// Type tag selecting the codec used by tiers that persist bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueShape {
    /// Self-describing JSON. Works for any serde value, including
    /// `serde_json::Value`.
    #[default]
    Json,
    /// Compact bincode. Requires a concrete, non self-describing type.
    Binary,
}

impl ValueShape {
    /// Single-byte tag stored in persisted entry headers.
    pub fn tag(self) -> u8 {
        match self {
            ValueShape::Json => 1,
            ValueShape::Binary => 2,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(ValueShape::Json),
            2 => Some(ValueShape::Binary),
            _ => None,
        }
    }
}

impl fmt::Display for ValueShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueShape::Json => write!(f, "json"),
            ValueShape::Binary => write!(f, "binary"),
        }
    }
}

// ============================================================================
// DESCRIPTOR
// ============================================================================

/// Immutable configuration for a single fetch.
///
/// Invariant: if `mode` is not [`CacheMode::None`], `key` is non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheDescriptor {
    key: String,
    mode: CacheMode,
    ttl: Ttl,
    shape: ValueShape,
}

impl CacheDescriptor {
    pub fn builder() -> CacheDescriptorBuilder {
        CacheDescriptorBuilder::default()
    }

    /// A descriptor that skips every cache tier.
    pub fn no_cache() -> Self {
        Self {
            key: String::new(),
            mode: CacheMode::None,
            ttl: Ttl::Infinite,
            shape: ValueShape::default(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    pub fn ttl(&self) -> Ttl {
        self.ttl
    }

    pub fn shape(&self) -> ValueShape {
        self.shape
    }
}

/// Builder for [`CacheDescriptor`].
#[derive(Debug, Clone)]
pub struct CacheDescriptorBuilder {
    key: String,
    mode: CacheMode,
    ttl: Ttl,
    shape: ValueShape,
    condition: bool,
}

impl Default for CacheDescriptorBuilder {
    fn default() -> Self {
        Self {
            key: String::new(),
            mode: CacheMode::None,
            ttl: Ttl::Infinite,
            shape: ValueShape::default(),
            condition: true,
        }
    }
}

impl CacheDescriptorBuilder {
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn mode(mut self, mode: CacheMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn ttl(mut self, ttl: Ttl) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn shape(mut self, shape: ValueShape) -> Self {
        self.shape = shape;
        self
    }

    /// Cache only if `condition` holds; otherwise the built descriptor uses
    /// [`CacheMode::None`]. Repeated calls combine with logical AND.
    pub fn cache_if(mut self, condition: bool) -> Self {
        self.condition = self.condition && condition;
        self
    }

    /// Lazily evaluated form of [`cache_if`](Self::cache_if).
    pub fn cache_when(self, predicate: impl FnOnce() -> bool) -> Self {
        let condition = self.condition && predicate();
        self.cache_if(condition)
    }

    /// Build the descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyKey`] if the effective mode caches and the
    /// key is empty or whitespace.
    pub fn build(self) -> Result<CacheDescriptor, ConfigError> {
        let mode = if self.condition {
            self.mode
        } else {
            CacheMode::None
        };

        if mode.is_cached() && self.key.trim().is_empty() {
            return Err(ConfigError::EmptyKey { mode });
        }

        Ok(CacheDescriptor {
            key: self.key,
            mode,
            ttl: self.ttl,
            shape: self.shape,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_order_per_mode() {
        assert_eq!(CacheMode::None.tiers(), &[Tier::Origin]);
        assert_eq!(CacheMode::MemoryOnly.tiers(), &[Tier::Memory, Tier::Origin]);
        assert_eq!(CacheMode::DiskOnly.tiers(), &[Tier::Disk, Tier::Origin]);
        assert_eq!(
            CacheMode::MemoryAndDisk.tiers(),
            &[Tier::Memory, Tier::Disk, Tier::Origin]
        );
    }

    #[test]
    fn test_cache_tiers_exclude_origin() {
        for mode in CacheMode::ALL {
            assert!(!mode.cache_tiers().contains(&Tier::Origin));
            assert_eq!(mode.cache_tiers().len() + 1, mode.tiers().len());
        }
        assert!(CacheMode::None.cache_tiers().is_empty());
    }

    #[test]
    fn test_mode_round_trips_through_str() {
        for mode in CacheMode::ALL {
            assert_eq!(mode.to_string().parse::<CacheMode>().unwrap(), mode);
        }
        assert!("sometimes".parse::<CacheMode>().is_err());
    }

    #[test]
    fn test_build_rejects_empty_key_when_cached() {
        let err = CacheDescriptor::builder()
            .mode(CacheMode::DiskOnly)
            .key("   ")
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::EmptyKey {
                mode: CacheMode::DiskOnly
            }
        );
    }

    #[test]
    fn test_build_allows_empty_key_without_cache() {
        let descriptor = CacheDescriptor::builder().build().unwrap();
        assert_eq!(descriptor.mode(), CacheMode::None);
        assert_eq!(descriptor, CacheDescriptor::no_cache());
    }

    #[test]
    fn test_cache_if_false_degrades_to_none() {
        let descriptor = CacheDescriptor::builder()
            .mode(CacheMode::MemoryAndDisk)
            .cache_if(false)
            .build()
            .unwrap();
        assert_eq!(descriptor.mode(), CacheMode::None);

        let descriptor = CacheDescriptor::builder()
            .key("feed")
            .mode(CacheMode::MemoryOnly)
            .cache_if(true)
            .build()
            .unwrap();
        assert_eq!(descriptor.mode(), CacheMode::MemoryOnly);
    }

    #[test]
    fn test_cache_when_is_not_evaluated_after_false() {
        let descriptor = CacheDescriptor::builder()
            .key("feed")
            .mode(CacheMode::MemoryOnly)
            .cache_if(false)
            .cache_when(|| panic!("predicate must not run"))
            .build()
            .unwrap();
        assert_eq!(descriptor.mode(), CacheMode::None);
    }

    #[test]
    fn test_ttl_signed_seconds() {
        assert_eq!(Ttl::from_secs_signed(-1), Ttl::Infinite);
        assert_eq!(Ttl::from_secs_signed(60), Ttl::secs(60));
    }

    #[test]
    fn test_ttl_expires_at() {
        let now = Utc::now();
        assert_eq!(Ttl::Infinite.expires_at(now), None);
        assert_eq!(
            Ttl::secs(60).expires_at(now),
            Some(now + chrono::Duration::seconds(60))
        );
        assert_eq!(Ttl::Finite(Duration::MAX).expires_at(now), None);
    }

    #[test]
    fn test_shape_tags() {
        for shape in [ValueShape::Json, ValueShape::Binary] {
            assert_eq!(ValueShape::from_tag(shape.tag()), Some(shape));
        }
        assert_eq!(ValueShape::from_tag(0), None);
    }

    proptest::proptest! {
        #[test]
        fn prop_build_fails_only_for_blank_cached_keys(
            key in "[ a-z:0-9]{0,8}",
            mode_idx in 0usize..4,
            condition in proptest::bool::ANY,
        ) {
            let mode = CacheMode::ALL[mode_idx];
            let result = CacheDescriptor::builder()
                .key(key.clone())
                .mode(mode)
                .cache_if(condition)
                .build();

            let effective = if condition { mode } else { CacheMode::None };
            if effective.is_cached() && key.trim().is_empty() {
                proptest::prop_assert!(result.is_err());
            } else {
                let descriptor = result.unwrap();
                proptest::prop_assert_eq!(descriptor.mode(), effective);
            }
        }
    }
}
