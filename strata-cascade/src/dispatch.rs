//! Exactly-once delivery of a fetch outcome.
//!
//! A [`Dispatcher`] owns the caller's [`Continuation`] until the first
//! delivery takes it. Later attempts find the slot empty and are rejected.
//! Cancelling empties the slot without invoking the continuation.

use std::sync::Mutex;

use strata_core::{DispatchError, FetchId, FetchOutcome};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, warn};

/// Sink for the single outcome of a fetch.
pub trait Continuation<T>: Send + 'static {
    fn deliver(self: Box<Self>, outcome: FetchOutcome<T>);
}

impl<T, F> Continuation<T> for F
where
    F: FnOnce(FetchOutcome<T>) + Send + 'static,
{
    fn deliver(self: Box<Self>, outcome: FetchOutcome<T>) {
        (*self)(outcome)
    }
}

/// Delivers into a `tokio::sync::oneshot` channel.
pub struct ChannelContinuation<T> {
    sender: oneshot::Sender<FetchOutcome<T>>,
}

impl<T> ChannelContinuation<T> {
    pub fn new(sender: oneshot::Sender<FetchOutcome<T>>) -> Self {
        Self { sender }
    }

    pub fn channel() -> (Self, oneshot::Receiver<FetchOutcome<T>>) {
        let (sender, receiver) = oneshot::channel();
        (Self::new(sender), receiver)
    }
}

impl<T: Send + 'static> Continuation<T> for ChannelContinuation<T> {
    fn deliver(self: Box<Self>, outcome: FetchOutcome<T>) {
        if self.sender.send(outcome).is_err() {
            debug!("Outcome receiver dropped before delivery");
        }
    }
}

/// Guards a continuation so it runs at most once.
pub struct Dispatcher<T> {
    fetch_id: FetchId,
    slot: Mutex<Option<Box<dyn Continuation<T>>>>,
    token: CancellationToken,
}

impl<T: Send + 'static> Dispatcher<T> {
    pub fn new(fetch_id: FetchId, continuation: impl Continuation<T>) -> Self {
        Self::with_token(fetch_id, continuation, CancellationToken::new())
    }

    /// Share cancellation with `token`.
    pub fn with_token(
        fetch_id: FetchId,
        continuation: impl Continuation<T>,
        token: CancellationToken,
    ) -> Self {
        Self {
            fetch_id,
            slot: Mutex::new(Some(Box::new(continuation))),
            token,
        }
    }

    pub fn fetch_id(&self) -> FetchId {
        self.fetch_id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the dispatcher is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Cancel and drop the continuation without invoking it.
    pub fn cancel(&self) {
        self.token.cancel();
        self.take();
    }

    /// Returns true once the continuation has been taken by a delivery or
    /// dropped by cancellation.
    pub fn is_settled(&self) -> bool {
        self.lock().is_none()
    }

    /// Hand `outcome` to the continuation.
    ///
    /// # Errors
    ///
    /// [`DispatchError::Cancelled`] if the dispatcher was cancelled first;
    /// [`DispatchError::AlreadyDelivered`] on any attempt after the first
    /// delivery. The outcome is dropped in both cases.
    pub fn deliver(&self, outcome: FetchOutcome<T>) -> Result<(), DispatchError> {
        let continuation = {
            let mut slot = self.lock();
            if self.token.is_cancelled() {
                slot.take();
                None
            } else {
                slot.take()
            }
        };

        match continuation {
            Some(continuation) => {
                continuation.deliver(outcome);
                Ok(())
            }
            None if self.token.is_cancelled() => {
                debug!(fetch_id = %self.fetch_id, "Fetch cancelled, outcome dropped");
                Err(DispatchError::Cancelled {
                    fetch_id: self.fetch_id,
                })
            }
            None => {
                warn!(fetch_id = %self.fetch_id, "Rejected second delivery");
                Err(DispatchError::AlreadyDelivered {
                    fetch_id: self.fetch_id,
                })
            }
        }
    }

    fn take(&self) -> Option<Box<dyn Continuation<T>>> {
        self.lock().take()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Box<dyn Continuation<T>>>> {
        // A continuation that panicked leaves the slot empty; the state is
        // still consistent.
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Handle to a fetch running on its own task.
///
/// Dropping the handle detaches the fetch; it still delivers.
pub struct FetchHandle {
    fetch_id: FetchId,
    token: CancellationToken,
    task: JoinHandle<Result<(), DispatchError>>,
}

impl FetchHandle {
    pub(crate) fn new(
        fetch_id: FetchId,
        token: CancellationToken,
        task: JoinHandle<Result<(), DispatchError>>,
    ) -> Self {
        Self {
            fetch_id,
            token,
            task,
        }
    }

    pub fn fetch_id(&self) -> FetchId {
        self.fetch_id
    }

    /// Stop the fetch. If no outcome has been delivered yet, none will be,
    /// and the in-flight tier attempt is dropped. Scheduled write-backs
    /// continue.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the fetch task to end.
    ///
    /// `Ok(())` means the continuation was invoked.
    pub async fn join(self) -> Result<(), DispatchError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(DispatchError::Aborted {
                fetch_id: self.fetch_id,
                reason: e.to_string(),
            }),
        }
    }
}
