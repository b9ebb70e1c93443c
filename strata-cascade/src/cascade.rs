//! The memory -> disk -> origin cascade.

use std::sync::Arc;

use strata_core::{
    new_fetch_id, CacheDescriptor, DispatchError, ErrorClassifier, FetchId, FetchOutcome, Fetched,
    StrataConfig, StrataError, Tier, TierResult,
};
use strata_storage::{CacheValue, DiskStore, InMemoryStore, LmdbDiskStore, MemoryStore};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn, Instrument};

use crate::dispatch::{ChannelContinuation, Continuation, Dispatcher, FetchHandle};
use crate::origin::OriginFetcher;
use crate::tier::{fail_open, TierTimeouts};
use crate::writeback::WriteBackScheduler;

/// Resolves fetches against a memory store, a disk store, and a per-call
/// origin.
///
/// Cheap to clone; clones share stores, classifier and write-back tracking.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use strata_cascade::Cascade;
/// use strata_core::{CacheDescriptor, CacheMode, Ttl};
/// use strata_storage::{InMemoryStore, LmdbDiskStore};
///
/// let cascade = Cascade::new(
///     Arc::new(InMemoryStore::new(1024)),
///     Arc::new(LmdbDiskStore::open("/tmp/strata", 100)?),
/// );
///
/// let descriptor = CacheDescriptor::builder()
///     .key("user:42")
///     .mode(CacheMode::MemoryAndDisk)
///     .ttl(Ttl::secs(60))
///     .build()?;
///
/// let fetched = cascade
///     .fetch(&descriptor, || async { load_user(42).await })
///     .await?;
/// ```
pub struct Cascade<M, D> {
    memory: Arc<M>,
    disk: Arc<D>,
    timeouts: TierTimeouts,
    classifier: Arc<ErrorClassifier>,
    write_back: WriteBackScheduler<M, D>,
}

impl<M, D> Clone for Cascade<M, D> {
    fn clone(&self) -> Self {
        Self {
            memory: Arc::clone(&self.memory),
            disk: Arc::clone(&self.disk),
            timeouts: self.timeouts,
            classifier: Arc::clone(&self.classifier),
            write_back: self.write_back.clone(),
        }
    }
}

impl Cascade<InMemoryStore, LmdbDiskStore> {
    /// Build the stock cascade: LRU memory store, LMDB disk store, and
    /// timeouts and messages from `config`.
    pub fn from_config(config: &StrataConfig) -> Result<Self, StrataError> {
        config.validate()?;
        let memory = Arc::new(InMemoryStore::from_config(config));
        let disk = Arc::new(LmdbDiskStore::from_config(config)?);

        info!(
            memory_capacity = config.memory_capacity,
            disk_path = %config.disk_path.display(),
            "Cascade initialized"
        );

        Ok(Self::new(memory, disk)
            .with_timeouts(TierTimeouts::from_config(config))
            .with_classifier(config.classifier()?))
    }
}

impl<M, D> Cascade<M, D>
where
    M: MemoryStore + 'static,
    D: DiskStore + 'static,
{
    pub fn new(memory: Arc<M>, disk: Arc<D>) -> Self {
        let write_back = WriteBackScheduler::new(Arc::clone(&memory), Arc::clone(&disk));
        Self {
            memory,
            disk,
            timeouts: TierTimeouts::default(),
            classifier: Arc::new(ErrorClassifier::default()),
            write_back,
        }
    }

    pub fn with_timeouts(mut self, timeouts: TierTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn memory(&self) -> &Arc<M> {
        &self.memory
    }

    pub fn disk(&self) -> &Arc<D> {
        &self.disk
    }

    pub fn timeouts(&self) -> TierTimeouts {
        self.timeouts
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    pub fn write_back(&self) -> &WriteBackScheduler<M, D> {
        &self.write_back
    }

    /// Wait until every scheduled write-back has finished.
    pub async fn wait_idle(&self) {
        self.write_back.wait_idle().await
    }

    /// Resolve one fetch.
    ///
    /// Dropping the returned future cancels the in-flight tier attempt.
    /// Write-backs already scheduled still complete.
    pub async fn fetch<T, O>(&self, descriptor: &CacheDescriptor, origin: O) -> FetchOutcome<T>
    where
        T: CacheValue,
        O: OriginFetcher<T>,
    {
        self.run(new_fetch_id(), descriptor, origin).await
    }

    /// Resolve one fetch on a new task, delivering into `continuation`.
    ///
    /// The continuation is invoked exactly once, or never if the returned
    /// handle is cancelled first. Must be called from within a tokio runtime.
    pub fn spawn<T, O, C>(
        &self,
        descriptor: CacheDescriptor,
        origin: O,
        continuation: C,
    ) -> FetchHandle
    where
        T: CacheValue,
        O: OriginFetcher<T> + 'static,
        C: Continuation<T>,
    {
        let fetch_id = new_fetch_id();
        let token = CancellationToken::new();
        let dispatcher = Dispatcher::with_token(fetch_id, continuation, token.clone());
        let cascade = self.clone();

        let task = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = dispatcher.cancelled() => {
                    debug!(fetch_id = %fetch_id, "Fetch cancelled before completion");
                    dispatcher.cancel();
                    Err(DispatchError::Cancelled { fetch_id })
                }
                outcome = cascade.run(fetch_id, &descriptor, origin) => dispatcher.deliver(outcome),
            }
        }.in_current_span());

        FetchHandle::new(fetch_id, token, task)
    }

    /// Like [`spawn`](Self::spawn), delivering into a oneshot channel.
    ///
    /// The receiver errors if the fetch is cancelled.
    pub fn spawn_channel<T, O>(
        &self,
        descriptor: CacheDescriptor,
        origin: O,
    ) -> (FetchHandle, oneshot::Receiver<FetchOutcome<T>>)
    where
        T: CacheValue,
        O: OriginFetcher<T> + 'static,
    {
        let (continuation, receiver) = ChannelContinuation::channel();
        (self.spawn(descriptor, origin, continuation), receiver)
    }

    #[instrument(
        name = "cascade_fetch",
        skip_all,
        fields(fetch_id = %fetch_id, key = descriptor.key(), mode = %descriptor.mode())
    )]
    async fn run<T, O>(
        &self,
        fetch_id: FetchId,
        descriptor: &CacheDescriptor,
        origin: O,
    ) -> FetchOutcome<T>
    where
        T: CacheValue,
        O: OriginFetcher<T>,
    {
        for &tier in descriptor.mode().cache_tiers() {
            debug!(tier = %tier, "Querying cache tier");
            if let TierResult::Hit(value) = self.lookup::<T>(tier, descriptor).await {
                info!(tier = %tier, "Cache hit");
                return Ok(Fetched {
                    provenance: tier.into(),
                    value: Some(value),
                });
            }
        }

        debug!("Querying origin");
        match origin.fetch().await {
            Ok(value) => {
                info!(present = value.is_some(), "Origin fetch succeeded");
                if let Some(value) = &value {
                    self.write_back.schedule(descriptor, value.clone());
                }
                Ok(Fetched::from_origin(value))
            }
            Err(error) => {
                let classified = self.classifier.classify(error);
                warn!(
                    code = %classified.code(),
                    message = classified.message(),
                    "Origin fetch failed"
                );
                Err(classified)
            }
        }
    }

    async fn lookup<T: CacheValue>(&self, tier: Tier, descriptor: &CacheDescriptor) -> TierResult<T> {
        let key = descriptor.key();
        match tier {
            Tier::Memory => {
                fail_open(
                    tier,
                    key,
                    self.timeouts.memory,
                    MemoryStore::get::<T>(self.memory.as_ref(), key),
                )
                .await
            }
            Tier::Disk => {
                fail_open(
                    tier,
                    key,
                    self.timeouts.disk,
                    DiskStore::get::<T>(self.disk.as_ref(), key, descriptor.shape()),
                )
                .await
            }
            Tier::Origin => TierResult::Miss,
        }
    }
}
