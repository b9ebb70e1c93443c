//! The authoritative source behind the cache tiers.

mod http;

pub use http::{from_reqwest, HttpOrigin, JsonRequest};

use std::future::Future;

use strata_core::OriginError;

/// A one-shot fetch from the origin.
///
/// Consumed by value, so a cascade can invoke it at most once. `Ok(None)`
/// means the origin completed and reported no data.
///
/// Any `FnOnce() -> impl Future<Output = Result<Option<T>, OriginError>>`
/// closure is an origin:
///
/// ```
/// use strata_cascade::OriginFetcher;
/// use strata_core::OriginError;
///
/// fn assert_origin<T, O: OriginFetcher<T>>(_: O) {}
///
/// assert_origin::<u32, _>(|| async { Ok::<_, OriginError>(Some(42u32)) });
/// ```
pub trait OriginFetcher<T>: Send {
    fn fetch(self) -> impl Future<Output = Result<Option<T>, OriginError>> + Send;
}

impl<T, F, Fut> OriginFetcher<T> for F
where
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = Result<Option<T>, OriginError>> + Send,
{
    fn fetch(self) -> impl Future<Output = Result<Option<T>, OriginError>> + Send {
        self()
    }
}
