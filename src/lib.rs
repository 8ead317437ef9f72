//! # keyed-coalesce
//!
//! Per-key event coalescing for async Rust.
//!
//! Producers report state changes for keys (a session, a job, a document) at
//! any rate. A [`Coalescer`] keeps only the latest payload per key and hands
//! it to your [`Sender`] according to a [`TriggerMode`], so a burst of
//! thousands of updates turns into a handful of sends. Keys are independent:
//! each has its own timer, its own pending value and its own cooldown.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use keyed_coalesce::{Coalescer, SendError, SendFn, ShutdownMode, TriggerMode};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let sender = SendFn::new(|job: u64, progress: u8| async move {
//!     println!("job {job}: {progress}%");
//!     Ok::<(), SendError>(())
//! });
//!
//! let coalescer = Coalescer::builder(sender)
//!     .with_mode(TriggerMode::TrailingOnly)
//!     .with_interval(Duration::from_millis(250))
//!     .with_idle_threshold(Duration::from_secs(60))
//!     .build()
//!     .unwrap();
//!
//! for progress in 0..=100 {
//!     coalescer.update(42, progress);
//! }
//!
//! // Deliver whatever is still pending, then stop.
//! let report = coalescer
//!     .shutdown(&CancellationToken::new(), ShutdownMode::SendLatest)
//!     .await;
//! println!("flushed {} keys", report.flushed);
//! # }
//! ```
//!
//! ## Trigger Modes
//!
//! - **`TrailingOnly`** (default): the first update opens a window of one
//!   interval; when it closes, the latest payload is sent.
//! - **`LeadingAndTrailing`**: the first update is sent immediately and starts
//!   a cooldown. If more updates arrive during the cooldown, the latest one is
//!   sent when it ends.
//! - **`LeadingOnly`**: the first update is sent immediately; updates during
//!   the cooldown are dropped.
//!
//! A minimum gap after a send can be configured with
//! [`CoalescerBuilder::with_min_gap_after_send`]: a leading edge arriving too
//! soon after the previous send is deferred into a cooldown instead.
//!
//! ## Rate Limiting
//!
//! Any [`RateLimit`] implementation can be shared between coalescers. It is
//! consulted before every send and the wait is abandoned on cancellation.
//! [`TokenBucket`] is provided:
//!
//! ```rust,no_run
//! use keyed_coalesce::{Coalescer, SendError, SendFn, TokenBucket};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() {
//! // Bursts of up to 20 sends, then 5 per second across every key
//! let limiter = Arc::new(TokenBucket::new(20, 5.0).unwrap());
//!
//! let coalescer = Coalescer::builder(SendFn::new(|key: String, value: u32| async move {
//!     println!("{key} = {value}");
//!     Ok::<(), SendError>(())
//! }))
//! .with_interval(Duration::from_millis(100))
//! .with_rate_limiter(limiter)
//! .build()
//! .unwrap();
//! # let _ = coalescer;
//! # }
//! ```
//!
//! ## Shutdown
//!
//! [`Coalescer::shutdown`] stops scheduling and closes every key. With
//! [`ShutdownMode::SendLatest`] the pending payload of each key is sent once
//! before it returns; [`ShutdownMode::Noop`] discards them. A
//! [`LifecycleHook`] runs the same sequence automatically when the
//! application stops.
//!
//! ## Memory Management
//!
//! Keys are created on first update and live until [`Coalescer::stop_key`]
//! or idle reclamation. With an idle threshold set, a background task
//! periodically evicts keys that have been quiet at least that long and hold
//! no timer, cooldown or pending payload. Without one, every key ever seen
//! stays tracked, so high-cardinality keys should either be stopped
//! explicitly or reclaimed.
//!
//! ## Observability
//!
//! [`Coalescer::metrics`] exposes counters for updates, sends, failures and
//! evictions. Internal events are logged through `tracing` at `debug` and
//! `trace` level; payloads are never logged.

// Domain layer - pure business logic
pub mod domain;

// Application layer - orchestration
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use domain::{
    mode::{ShutdownMode, TriggerMode},
    trigger::TriggerPolicy,
};

pub use application::{
    coalescer::{Coalescer, CoalescerBuilder, ShutdownReport},
    config::{BuildError, CoalescerConfig},
    metrics::{Metrics, MetricsSnapshot},
    ports::{Clock, RateLimit, SendError, Sender, Storage},
    registry::EntryRegistry,
};

pub use infrastructure::{
    clock::SystemClock,
    lifecycle::LifecycleHook,
    send_fn::SendFn,
    storage::ShardedStorage,
    token_bucket::{TokenBucket, TokenBucketError},
};
