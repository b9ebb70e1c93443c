//! Fetch outcomes and per-tier signals.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::classify::ClassifiedError;
use crate::descriptor::Tier;

/// Which tier produced the delivered value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Memory,
    Disk,
    Origin,
}

impl Provenance {
    pub fn tier(self) -> Tier {
        match self {
            Provenance::Memory => Tier::Memory,
            Provenance::Disk => Tier::Disk,
            Provenance::Origin => Tier::Origin,
        }
    }
}

impl From<Tier> for Provenance {
    fn from(tier: Tier) -> Self {
        match tier {
            Tier::Memory => Provenance::Memory,
            Tier::Disk => Provenance::Disk,
            Tier::Origin => Provenance::Origin,
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tier())
    }
}

/// A successful fetch: the value and where it came from.
///
/// `value` is `None` only when the origin completed successfully but
/// reported no data; absence is not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched<T> {
    pub provenance: Provenance,
    pub value: Option<T>,
}

impl<T> Fetched<T> {
    pub fn from_memory(value: T) -> Self {
        Self {
            provenance: Provenance::Memory,
            value: Some(value),
        }
    }

    pub fn from_disk(value: T) -> Self {
        Self {
            provenance: Provenance::Disk,
            value: Some(value),
        }
    }

    pub fn from_origin(value: Option<T>) -> Self {
        Self {
            provenance: Provenance::Origin,
            value,
        }
    }

    /// Returns true if a cache tier served this value.
    pub fn is_cached(&self) -> bool {
        !matches!(self.provenance, Provenance::Origin)
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<T> {
        self.value
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fetched<U> {
        Fetched {
            provenance: self.provenance,
            value: self.value.map(f),
        }
    }
}

/// The single terminal result of a fetch.
pub type FetchOutcome<T> = Result<Fetched<T>, ClassifiedError>;

/// Signal from one cache tier attempt.
///
/// There is no error variant: cache tier failures are reported as `Miss`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierResult<T> {
    Hit(T),
    Miss,
}

impl<T> TierResult<T> {
    pub fn is_hit(&self) -> bool {
        matches!(self, TierResult::Hit(_))
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            TierResult::Hit(value) => Some(value),
            TierResult::Miss => None,
        }
    }
}

impl<T> From<Option<T>> for TierResult<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => TierResult::Hit(value),
            None => TierResult::Miss,
        }
    }
}
