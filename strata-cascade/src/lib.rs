//! STRATA Cascade - Tiered Fetch and Write-Back
//!
//! Resolves a fetch by consulting the memory tier, then the disk tier, then
//! the origin, stopping at the first hit. Values fetched from the origin are
//! written back into the designated cache tiers on a detached task. Every
//! fetch produces exactly one [`FetchOutcome`](strata_core::FetchOutcome),
//! delivered as a future's output, into a continuation, or into a channel.

pub mod cascade;
pub mod dispatch;
pub mod origin;
pub mod telemetry;
pub mod tier;
pub mod writeback;

pub use cascade::Cascade;
pub use dispatch::{ChannelContinuation, Continuation, Dispatcher, FetchHandle};
pub use origin::{HttpOrigin, JsonRequest, OriginFetcher};
pub use telemetry::{init_tracing, TelemetryError};
pub use tier::TierTimeouts;
pub use writeback::{TierWrite, WriteBackReport, WriteBackScheduler};
