//! Write-back of origin results into the cache tiers.
//!
//! Each write-back runs as its own detached task holding `Arc`s to the
//! stores, so it outlives the fetch that scheduled it and is never cancelled
//! with it. Failures are logged and recorded in the [`WriteBackReport`];
//! they never reach the caller of the fetch.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use strata_core::{CacheDescriptor, StoreError, Tier};
use strata_storage::{CacheValue, DiskStore, MemoryStore};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// What happened to one tier during a write-back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierWrite {
    /// The mode does not designate this tier.
    Skipped,
    Written,
    Failed(StoreError),
}

impl TierWrite {
    pub fn is_failed(&self) -> bool {
        matches!(self, TierWrite::Failed(_))
    }
}

/// Result of one write-back task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteBackReport {
    pub key: String,
    pub memory: TierWrite,
    pub disk: TierWrite,
}

impl WriteBackReport {
    /// Returns true if no designated tier failed.
    pub fn is_complete(&self) -> bool {
        !self.memory.is_failed() && !self.disk.is_failed()
    }
}

#[derive(Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

/// Decrements the pending count when a write-back task ends, even by panic.
struct PendingGuard(Arc<Pending>);

impl PendingGuard {
    fn acquire(pending: &Arc<Pending>) -> Self {
        pending.count.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(pending))
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Schedules write-backs and tracks how many are in flight.
pub struct WriteBackScheduler<M, D> {
    memory: Arc<M>,
    disk: Arc<D>,
    pending: Arc<Pending>,
}

impl<M, D> Clone for WriteBackScheduler<M, D> {
    fn clone(&self) -> Self {
        Self {
            memory: Arc::clone(&self.memory),
            disk: Arc::clone(&self.disk),
            pending: Arc::clone(&self.pending),
        }
    }
}

impl<M, D> WriteBackScheduler<M, D>
where
    M: MemoryStore + 'static,
    D: DiskStore + 'static,
{
    pub fn new(memory: Arc<M>, disk: Arc<D>) -> Self {
        Self {
            memory,
            disk,
            pending: Arc::new(Pending::default()),
        }
    }

    /// Write `value` into every tier `descriptor` designates.
    ///
    /// Returns `None` without spawning anything when the mode caches nothing.
    /// Must be called from within a tokio runtime.
    pub fn schedule<T: CacheValue>(
        &self,
        descriptor: &CacheDescriptor,
        value: T,
    ) -> Option<JoinHandle<WriteBackReport>> {
        let mode = descriptor.mode();
        if !mode.is_cached() {
            return None;
        }

        let guard = PendingGuard::acquire(&self.pending);
        let memory = Arc::clone(&self.memory);
        let disk = Arc::clone(&self.disk);
        let key = descriptor.key().to_string();
        let ttl = descriptor.ttl();
        let shape = descriptor.shape();

        Some(tokio::spawn(async move {
            let _guard = guard;

            let memory_write = if mode.uses_memory() {
                outcome(
                    Tier::Memory,
                    &key,
                    MemoryStore::put(memory.as_ref(), &key, &value, ttl).await,
                )
            } else {
                TierWrite::Skipped
            };

            let disk_write = if mode.uses_disk() {
                outcome(
                    Tier::Disk,
                    &key,
                    DiskStore::put(disk.as_ref(), &key, &value, ttl, shape).await,
                )
            } else {
                TierWrite::Skipped
            };

            WriteBackReport {
                key,
                memory: memory_write,
                disk: disk_write,
            }
        }))
    }

    /// Number of write-backs scheduled but not yet finished.
    pub fn pending(&self) -> usize {
        self.pending.count.load(Ordering::Acquire)
    }

    /// Wait until no write-back is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.pending.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

fn outcome(tier: Tier, key: &str, result: Result<(), StoreError>) -> TierWrite {
    match result {
        Ok(()) => {
            debug!(tier = %tier, key = %key, "Write-back stored");
            TierWrite::Written
        }
        Err(error) => {
            warn!(tier = %tier, key = %key, error = %error, "Write-back failed");
            TierWrite::Failed(error)
        }
    }
}
