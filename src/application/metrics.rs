//! Observability metrics for coalescing.
//!
//! Provides counters about update and send activity for monitoring and debugging.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics tracking coalescing statistics.
///
/// All metrics use atomic operations for thread-safe updates and reads.
/// Clones share the same counters.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    /// Total number of updates received
    updates_received: AtomicU64,
    /// Sends that reached the sender and succeeded
    sends_dispatched: AtomicU64,
    /// Sends that reached the sender and returned an error
    sends_failed: AtomicU64,
    /// Sends abandoned while waiting for a rate-limit permit
    sends_abandoned: AtomicU64,
    /// Timer fires ignored because their generation was superseded
    stale_timer_fires: AtomicU64,
    /// Entries removed by the idle reclaimer
    entries_evicted: AtomicU64,
    /// Entries removed by an explicit stop
    keys_stopped: AtomicU64,
}

impl Metrics {
    /// Create a new metrics tracker.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::default()),
        }
    }

    pub(crate) fn record_update(&self) {
        self.inner.updates_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatched(&self) {
        self.inner.sends_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.inner.sends_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abandoned(&self) {
        self.inner.sends_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stale_fire(&self) {
        self.inner.stale_timer_fires.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evictions(&self, count: usize) {
        self.inner
            .entries_evicted
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_stopped(&self) {
        self.inner.keys_stopped.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the total number of updates received.
    pub fn updates_received(&self) -> u64 {
        self.inner.updates_received.load(Ordering::Relaxed)
    }

    /// Get the number of successful sends.
    pub fn sends_dispatched(&self) -> u64 {
        self.inner.sends_dispatched.load(Ordering::Relaxed)
    }

    /// Get the number of sends the sender reported as failed.
    pub fn sends_failed(&self) -> u64 {
        self.inner.sends_failed.load(Ordering::Relaxed)
    }

    /// Get the number of sends abandoned before reaching the sender.
    pub fn sends_abandoned(&self) -> u64 {
        self.inner.sends_abandoned.load(Ordering::Relaxed)
    }

    /// Get the number of stale timer fires.
    pub fn stale_timer_fires(&self) -> u64 {
        self.inner.stale_timer_fires.load(Ordering::Relaxed)
    }

    /// Get the number of entries evicted for idleness.
    pub fn entries_evicted(&self) -> u64 {
        self.inner.entries_evicted.load(Ordering::Relaxed)
    }

    /// Get the number of keys explicitly stopped.
    pub fn keys_stopped(&self) -> u64 {
        self.inner.keys_stopped.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            updates_received: self.updates_received(),
            sends_dispatched: self.sends_dispatched(),
            sends_failed: self.sends_failed(),
            sends_abandoned: self.sends_abandoned(),
            stale_timer_fires: self.stale_timer_fires(),
            entries_evicted: self.entries_evicted(),
            keys_stopped: self.keys_stopped(),
        }
    }

    /// Reset all metrics to zero.
    ///
    /// Useful for testing or when starting a new monitoring period.
    pub fn reset(&self) {
        self.inner.updates_received.store(0, Ordering::Relaxed);
        self.inner.sends_dispatched.store(0, Ordering::Relaxed);
        self.inner.sends_failed.store(0, Ordering::Relaxed);
        self.inner.sends_abandoned.store(0, Ordering::Relaxed);
        self.inner.stale_timer_fires.store(0, Ordering::Relaxed);
        self.inner.entries_evicted.store(0, Ordering::Relaxed);
        self.inner.keys_stopped.store(0, Ordering::Relaxed);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub updates_received: u64,
    pub sends_dispatched: u64,
    pub sends_failed: u64,
    pub sends_abandoned: u64,
    pub stale_timer_fires: u64,
    pub entries_evicted: u64,
    pub keys_stopped: u64,
}

impl MetricsSnapshot {
    /// Calculate the coalescing ratio (0.0 to 1.0).
    ///
    /// The share of updates that did not turn into a send attempt of their
    /// own. Returns 0.0 if no updates have been received.
    pub fn coalescing_ratio(&self) -> f64 {
        if self.updates_received == 0 {
            return 0.0;
        }
        let attempted = self.sends_dispatched.saturating_add(self.sends_failed);
        let coalesced = self.updates_received.saturating_sub(attempted);
        coalesced as f64 / self.updates_received as f64
    }

    /// Total sends that reached the sender.
    pub fn sends_attempted(&self) -> u64 {
        self.sends_dispatched.saturating_add(self.sends_failed)
    }
}
