//! Cache tier lookups.
//!
//! Memory and disk lookups are bounded by a per-tier timeout. A timeout or a
//! store error is logged and reported as a miss, so a broken cache tier can
//! slow a fetch down by at most its budget and never fail it.

use std::future::Future;
use std::time::Duration;

use strata_core::{StoreError, StrataConfig, Tier, TierResult};
use tracing::{debug, warn};

/// Per-tier lookup budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierTimeouts {
    pub memory: Duration,
    pub disk: Duration,
}

impl Default for TierTimeouts {
    fn default() -> Self {
        Self {
            memory: Duration::from_millis(50),
            disk: Duration::from_millis(500),
        }
    }
}

impl TierTimeouts {
    pub fn from_config(config: &StrataConfig) -> Self {
        Self {
            memory: config.memory_timeout(),
            disk: config.disk_timeout(),
        }
    }

    pub fn with_memory(mut self, timeout: Duration) -> Self {
        self.memory = timeout;
        self
    }

    pub fn with_disk(mut self, timeout: Duration) -> Self {
        self.disk = timeout;
        self
    }

    /// Budget for `tier`. The origin has none.
    pub fn for_tier(&self, tier: Tier) -> Option<Duration> {
        match tier {
            Tier::Memory => Some(self.memory),
            Tier::Disk => Some(self.disk),
            Tier::Origin => None,
        }
    }
}

/// Run one cache tier lookup, failing open to [`TierResult::Miss`].
pub(crate) async fn fail_open<T, F>(tier: Tier, key: &str, budget: Duration, lookup: F) -> TierResult<T>
where
    F: Future<Output = Result<Option<T>, StoreError>>,
{
    match tokio::time::timeout(budget, lookup).await {
        Ok(Ok(Some(value))) => TierResult::Hit(value),
        Ok(Ok(None)) => {
            debug!(tier = %tier, key = %key, "Tier miss");
            TierResult::Miss
        }
        Ok(Err(error)) => {
            warn!(tier = %tier, key = %key, error = %error, "Tier lookup failed, treating as miss");
            TierResult::Miss
        }
        Err(_) => {
            warn!(
                tier = %tier,
                key = %key,
                timeout_ms = budget.as_millis() as u64,
                "Tier lookup timed out, treating as miss"
            );
            TierResult::Miss
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hit_and_miss_pass_through() {
        let hit = fail_open(Tier::Memory, "k", Duration::from_secs(1), async {
            Ok(Some(5u8))
        })
        .await;
        assert_eq!(hit, TierResult::Hit(5));

        let miss = fail_open::<u8, _>(Tier::Disk, "k", Duration::from_secs(1), async { Ok(None) })
            .await;
        assert_eq!(miss, TierResult::Miss);
    }

    #[tokio::test]
    async fn test_error_becomes_miss() {
        let result = fail_open::<u8, _>(Tier::Disk, "k", Duration::from_secs(1), async {
            Err(StoreError::Backend {
                tier: Tier::Disk,
                reason: "MDB_CORRUPTED".to_string(),
            })
        })
        .await;
        assert_eq!(result, TierResult::Miss);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_becomes_miss() {
        let result = fail_open(Tier::Memory, "k", Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Some(1u8))
        })
        .await;
        assert_eq!(result, TierResult::Miss);
    }

    #[test]
    fn test_timeouts_from_config() {
        let config = StrataConfig {
            memory_timeout_ms: 5,
            disk_timeout_ms: 7,
            ..Default::default()
        };
        let timeouts = TierTimeouts::from_config(&config);
        assert_eq!(timeouts.for_tier(Tier::Memory), Some(Duration::from_millis(5)));
        assert_eq!(timeouts.for_tier(Tier::Disk), Some(Duration::from_millis(7)));
        assert_eq!(timeouts.for_tier(Tier::Origin), None);
    }
}
