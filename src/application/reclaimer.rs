//! Background eviction of idle entries.
//!
//! The reclaimer wakes up periodically and asks the registry to drop every
//! entry that has been quiet for longer than the idle threshold and has no
//! timer, cooldown or pending data.

use crate::application::metrics::Metrics;
use crate::application::registry::EntryRegistry;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Handle to a running idle reclaimer.
///
/// Stopping is idempotent. The reclaimer also stops on its own when the base
/// token it was started from is cancelled.
#[derive(Debug, Clone)]
pub struct ReclaimerHandle {
    stop: CancellationToken,
}

impl ReclaimerHandle {
    /// Start the reclaimer on `runtime`.
    ///
    /// # Arguments
    /// * `registry` - Entries to sweep
    /// * `metrics` - Receives eviction counts
    /// * `threshold` - Minimum quiet time before an entry is evicted
    /// * `period` - Time between sweeps
    /// * `base` - Cancelling this token stops the reclaimer
    pub(crate) fn spawn<K, P>(
        runtime: &Handle,
        registry: Arc<EntryRegistry<K, P>>,
        metrics: Metrics,
        threshold: Duration,
        period: Duration,
        base: &CancellationToken,
    ) -> Self
    where
        K: Hash + Eq + Clone + Send + Sync + Debug + 'static,
        P: Send + 'static,
    {
        let stop = base.child_token();
        let token = stop.clone();

        runtime.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; nothing can be idle yet
            ticker.tick().await;

            debug!(?threshold, ?period, "idle reclaimer started");
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = registry.sweep_idle(threshold);
                        if evicted > 0 {
                            metrics.record_evictions(evicted);
                            debug!(evicted, remaining = registry.len(), "evicted idle entries");
                        } else {
                            trace!(remaining = registry.len(), "idle sweep found nothing");
                        }
                    }
                }
            }
            debug!("idle reclaimer stopped");
        });

        Self { stop }
    }

    /// Stop the reclaimer loop.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Whether the reclaimer has been told to stop.
    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }
}
