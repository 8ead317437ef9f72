//! The coalescer: per-key triggering, timers, dispatch and shutdown.
//!
//! Producers call [`Coalescer::update`] as often as they like. Each key keeps
//! only its latest payload; the [`TriggerPolicy`] decides when that payload is
//! handed to the [`Sender`]. Sends run on spawned tasks and never block the
//! producer.

use crate::application::config::{BuildError, CoalescerConfig};
use crate::application::entry::{lock_entry, Entry, SharedEntry};
use crate::application::metrics::Metrics;
use crate::application::ports::{Clock, RateLimit, Sender};
use crate::application::reclaimer::ReclaimerHandle;
use crate::application::registry::EntryRegistry;
use crate::domain::mode::{ShutdownMode, TriggerMode};
use crate::domain::trigger::{ExpiryAction, TriggerPolicy, UpdateAction};
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::lifecycle::LifecycleHook;
use crate::infrastructure::storage::ShardedStorage;

use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Outcome of the shutdown sequence.
///
/// Purely informational: shutdown never fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShutdownReport {
    /// Pending payloads delivered during the flush
    pub flushed: usize,
    /// Flushed payloads the sender rejected
    pub failed: usize,
    /// Pending payloads skipped because the shutdown token was cancelled
    pub abandoned: usize,
    /// Pending payloads dropped because the mode was `Noop`
    pub discarded: usize,
}

/// Result of one dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dispatch {
    Sent,
    Failed,
    Abandoned,
}

/// Builder for constructing a [`Coalescer`].
pub struct CoalescerBuilder<K, P, S> {
    sender: S,
    config: CoalescerConfig,
    rate_limiter: Option<Arc<dyn RateLimit>>,
    base: Option<CancellationToken>,
    clock: Option<Arc<dyn Clock>>,
    lifecycle: Option<LifecycleHook>,
    runtime: Option<Handle>,
    _marker: PhantomData<fn() -> (K, P)>,
}

impl<K, P, S> CoalescerBuilder<K, P, S>
where
    K: Hash + Eq + Clone + Send + Sync + Debug + 'static,
    P: Send + 'static,
    S: Sender<K, P>,
{
    /// Replace all plain configuration values at once.
    pub fn with_config(mut self, config: CoalescerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the triggering policy.
    pub fn with_mode(mut self, mode: TriggerMode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Set the window (trailing) or cooldown (leading) length.
    ///
    /// The interval will be validated when `build()` is called.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    /// Reclaim entries quiet for at least `threshold`. Zero disables.
    pub fn with_idle_threshold(mut self, threshold: Duration) -> Self {
        self.config.idle_threshold = threshold;
        self
    }

    /// Defer a leading send that comes sooner than `gap` after the previous send.
    pub fn with_min_gap_after_send(mut self, gap: Duration) -> Self {
        self.config.min_gap_after_send = gap;
        self
    }

    /// Mode used when the lifecycle hook triggers shutdown.
    pub fn with_shutdown_mode(mut self, mode: ShutdownMode) -> Self {
        self.config.shutdown_mode = mode;
        self
    }

    /// Acquire a permit from `limiter` before every send.
    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimit>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Token scoping background work: cancelling it stops the reclaimer,
    /// the lifecycle watcher and any rate-limit wait.
    pub fn with_base_token(mut self, token: CancellationToken) -> Self {
        self.base = Some(token);
        self
    }

    /// Set a custom clock (mainly for testing).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Run shutdown automatically when `hook` fires.
    pub fn with_lifecycle_hook(mut self, hook: LifecycleHook) -> Self {
        self.lifecycle = Some(hook);
        self
    }

    /// Schedule timers and sends on `runtime` instead of the current one.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Build the coalescer.
    ///
    /// # Errors
    /// Returns `BuildError::ZeroInterval` if the interval is zero, and
    /// `BuildError::NoRuntime` if no runtime was given and none is current.
    pub fn build(self) -> Result<Coalescer<K, P, S>, BuildError> {
        self.config.validate()?;

        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| BuildError::NoRuntime)?,
        };
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()) as Arc<dyn Clock>);
        let base = self.base.unwrap_or_default();
        let registry = Arc::new(EntryRegistry::new(Arc::new(ShardedStorage::new()), clock));
        let metrics = Metrics::new();

        let reclaimer = self.config.reclaims_idle().then(|| {
            ReclaimerHandle::spawn(
                &runtime,
                Arc::clone(&registry),
                metrics.clone(),
                self.config.idle_threshold,
                self.config.sweep_period(),
                &base,
            )
        });

        let inner = Arc::new(Inner {
            registry,
            sender: self.sender,
            policy: TriggerPolicy::new(self.config.mode, self.config.min_gap_after_send),
            config: self.config,
            rate_limiter: self.rate_limiter,
            lifecycle: base.child_token(),
            base,
            stopping: AtomicBool::new(false),
            reclaimer,
            metrics,
            runtime,
        });

        if let Some(hook) = self.lifecycle {
            inner.watch_lifecycle(hook);
        }

        debug!(
            mode = %inner.config.mode,
            interval = ?inner.config.interval,
            idle_threshold = ?inner.config.idle_threshold,
            "coalescer built"
        );

        Ok(Coalescer { inner })
    }
}

/// Per-key event coalescer.
///
/// Cheap to clone; clones share the same keys, timers and metrics.
///
/// # Example
/// ```no_run
/// use keyed_coalesce::{Coalescer, SendError, SendFn, ShutdownMode, TriggerMode};
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() {
/// let sender = SendFn::new(|key: String, value: u64| async move {
///     println!("{key} = {value}");
///     Ok::<(), SendError>(())
/// });
///
/// let coalescer = Coalescer::builder(sender)
///     .with_mode(TriggerMode::LeadingAndTrailing)
///     .with_interval(Duration::from_millis(100))
///     .build()
///     .unwrap();
///
/// for value in 0..1000 {
///     coalescer.update("progress".to_string(), value);
/// }
///
/// coalescer
///     .shutdown(&CancellationToken::new(), ShutdownMode::SendLatest)
///     .await;
/// # }
/// ```
pub struct Coalescer<K, P, S>
where
    K: Hash + Eq + Clone + Send + Sync + Debug + 'static,
    P: Send + 'static,
    S: Sender<K, P>,
{
    inner: Arc<Inner<K, P, S>>,
}

impl<K, P, S> Coalescer<K, P, S>
where
    K: Hash + Eq + Clone + Send + Sync + Debug + 'static,
    P: Send + 'static,
    S: Sender<K, P>,
{
    /// Create a builder around `sender`.
    ///
    /// Defaults:
    /// - Mode: trailing only
    /// - Interval: 1 second
    /// - Idle reclamation: disabled
    /// - Min gap after send: disabled
    /// - Shutdown mode for the lifecycle hook: noop
    pub fn builder(sender: S) -> CoalescerBuilder<K, P, S> {
        CoalescerBuilder {
            sender,
            config: CoalescerConfig::default(),
            rate_limiter: None,
            base: None,
            clock: None,
            lifecycle: None,
            runtime: None,
            _marker: PhantomData,
        }
    }

    /// Build a coalescer from plain configuration, with default collaborators.
    pub fn from_config(sender: S, config: CoalescerConfig) -> Result<Self, BuildError> {
        Self::builder(sender).with_config(config).build()
    }

    /// Record `payload` as the latest value for `key` and apply the trigger policy.
    ///
    /// Never blocks and never fails. Once shutdown has begun, updates are
    /// ignored: no key is created and nothing is recorded or counted.
    pub fn update(&self, key: K, payload: P) {
        self.inner.update(key, payload);
    }

    /// Forget `key`: cancel its timer, drop its pending payload and close it.
    ///
    /// A later update for the same key starts from a fresh entry. Unknown keys
    /// are ignored.
    pub fn stop_key(&self, key: &K) {
        self.inner.stop_key(key);
    }

    /// Stop scheduling, close every key and optionally flush pending payloads.
    ///
    /// With [`ShutdownMode::SendLatest`] each key's pending payload is sent
    /// once, one key after the other, until `ctx` is cancelled. Sends already
    /// in flight from leading edges are not awaited. Only the first call does
    /// any work; later calls return an empty report.
    pub async fn shutdown(&self, ctx: &CancellationToken, mode: ShutdownMode) -> ShutdownReport {
        self.inner.shutdown(ctx, mode).await
    }

    /// Stop the idle reclaimer. Entries and pending data are left alone.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Get a reference to the metrics.
    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    /// Number of keys currently tracked.
    pub fn key_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Whether shutdown has begun.
    pub fn is_stopping(&self) -> bool {
        self.inner.is_stopping()
    }

    /// The configured trigger mode.
    pub fn mode(&self) -> TriggerMode {
        self.inner.config.mode
    }

    /// The window or cooldown length.
    pub fn interval(&self) -> Duration {
        self.inner.config.interval
    }

    /// The configuration this coalescer was built with.
    pub fn config(&self) -> &CoalescerConfig {
        &self.inner.config
    }
}

impl<K, P, S> Clone for Coalescer<K, P, S>
where
    K: Hash + Eq + Clone + Send + Sync + Debug + 'static,
    P: Send + 'static,
    S: Sender<K, P>,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, P, S> Debug for Coalescer<K, P, S>
where
    K: Hash + Eq + Clone + Send + Sync + Debug + 'static,
    P: Send + 'static,
    S: Sender<K, P>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coalescer")
            .field("config", &self.inner.config)
            .field("keys", &self.inner.registry.len())
            .field("stopping", &self.inner.is_stopping())
            .field(
                "reclaiming",
                &self.inner.reclaimer.as_ref().is_some_and(|r| !r.is_stopped()),
            )
            .finish()
    }
}

struct Inner<K, P, S>
where
    K: Hash + Eq + Clone + Send + Sync + Debug + 'static,
    P: Send + 'static,
    S: Sender<K, P>,
{
    registry: Arc<EntryRegistry<K, P>>,
    sender: S,
    policy: TriggerPolicy,
    config: CoalescerConfig,
    rate_limiter: Option<Arc<dyn RateLimit>>,
    base: CancellationToken,
    /// Ends the lifecycle watcher when the coalescer is dropped
    lifecycle: CancellationToken,
    /// Once set, no timer is armed and no update is acted on
    stopping: AtomicBool,
    reclaimer: Option<ReclaimerHandle>,
    metrics: Metrics,
    runtime: Handle,
}

impl<K, P, S> Inner<K, P, S>
where
    K: Hash + Eq + Clone + Send + Sync + Debug + 'static,
    P: Send + 'static,
    S: Sender<K, P>,
{
    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    fn update(self: &Arc<Self>, key: K, payload: P) {
        if self.is_stopping() {
            trace!(?key, "update after shutdown ignored");
            return;
        }
        self.metrics.record_update();

        loop {
            let entry = self.registry.get_or_create(key.clone());
            let mut state = lock_entry(&entry);

            if state.is_closed() {
                if self.is_stopping() {
                    return;
                }
                // Evicted or stopped between lookup and lock; the map no
                // longer holds this entry, so the next lookup creates a fresh one.
                continue;
            }

            // Shutdown may have begun after the check above; it closes this
            // entry once it gets the lock, so recording is harmless.
            let now = self.registry.now();
            state.record(payload, now);
            if self.is_stopping() {
                return;
            }

            self.apply(&key, &entry, &mut state, now);
            return;
        }
    }

    /// Run the trigger policy for a freshly recorded update.
    fn apply(self: &Arc<Self>, key: &K, entry: &SharedEntry<P>, state: &mut Entry<P>, now: Instant) {
        let action = self
            .policy
            .on_update(state.key_state(), state.since_last_send(now));
        trace!(?key, ?action, "update applied");

        let leading = match action {
            UpdateAction::SendLeading => state.take_pending(),
            UpdateAction::DeferLeading => {
                debug!(?key, "leading send deferred by min gap");
                None
            }
            UpdateAction::Record | UpdateAction::ArmWindow => None,
        };

        if action.arms_timer() {
            self.arm_timer(key, entry, state, action.enters_cooldown());
        }
        if let Some(payload) = leading {
            self.spawn_dispatch(key.clone(), Arc::clone(entry), payload);
        }
    }

    /// Arm (or re-arm) the key's timer for one interval.
    fn arm_timer(self: &Arc<Self>, key: &K, entry: &SharedEntry<P>, state: &mut Entry<P>, cooldown: bool) {
        if self.is_stopping() {
            return;
        }

        let generation = state.arm(cooldown);
        let inner = Arc::clone(self);
        let timer_key = key.clone();
        let timer_entry = Arc::clone(entry);
        let delay = self.config.interval;

        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            inner.on_timer(timer_key, &timer_entry, generation).await;
        });
        state.attach_timer(generation, task.abort_handle());
    }

    /// Timer body: act on expiry if `generation` is still current.
    async fn on_timer(&self, key: K, entry: &SharedEntry<P>, generation: u64) {
        let payload = {
            let mut state = lock_entry(entry);
            if !state.is_current(generation) {
                self.metrics.record_stale_fire();
                trace!(?key, generation, "stale timer fire ignored");
                return;
            }

            state.expire();
            match self.policy.on_expiry(state.has_pending()) {
                ExpiryAction::Send => state.take_pending(),
                ExpiryAction::Drop => {
                    state.take_pending();
                    None
                }
                ExpiryAction::Release => None,
            }
        };

        if let Some(payload) = payload {
            self.dispatch(&key, entry, payload, None).await;
        }
    }

    fn spawn_dispatch(self: &Arc<Self>, key: K, entry: SharedEntry<P>, payload: P) {
        let inner = Arc::clone(self);
        self.runtime.spawn(async move {
            inner.dispatch(&key, &entry, payload, None).await;
        });
    }

    /// Wait for a rate-limit permit, then hand `payload` to the sender.
    ///
    /// `shutdown` is the shutdown token during the final flush; it both
    /// cancels the permit wait and is passed to the sender.
    async fn dispatch(
        &self,
        key: &K,
        entry: &SharedEntry<P>,
        payload: P,
        shutdown: Option<&CancellationToken>,
    ) -> Dispatch {
        if !self.acquire_permit(shutdown).await {
            self.metrics.record_abandoned();
            debug!(?key, "send abandoned while waiting for a rate-limit permit");
            return Dispatch::Abandoned;
        }

        let ctx = shutdown.unwrap_or(&self.base);
        match self.sender.send(ctx, key, payload).await {
            Ok(()) => {
                let now = self.registry.now();
                lock_entry(entry).mark_sent(now);
                self.metrics.record_dispatched();
                trace!(?key, "sent");
                Dispatch::Sent
            }
            Err(error) => {
                self.metrics.record_failed();
                debug!(?key, %error, "send failed; payload dropped");
                Dispatch::Failed
            }
        }
    }

    /// Race the rate limiter against cancellation. `true` means go ahead.
    async fn acquire_permit(&self, shutdown: Option<&CancellationToken>) -> bool {
        let Some(limiter) = &self.rate_limiter else {
            return true;
        };

        let shutdown_cancelled = async {
            match shutdown {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.base.cancelled() => false,
            _ = shutdown_cancelled => false,
            _ = limiter.acquire() => true,
        }
    }

    fn stop_key(&self, key: &K) {
        let Some(entry) = self.registry.remove(key) else {
            return;
        };

        let mut state = lock_entry(&entry);
        state.close();
        state.take_pending();
        self.metrics.record_stopped();
        debug!(?key, "key stopped");
    }

    async fn shutdown(&self, ctx: &CancellationToken, mode: ShutdownMode) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        if self.stopping.swap(true, Ordering::AcqRel) {
            return report;
        }

        let entries = self.registry.snapshot();
        debug!(%mode, keys = entries.len(), "shutdown started");
        self.close();

        let mut pending = Vec::new();
        for (key, entry) in entries {
            let payload = {
                let mut state = lock_entry(&entry);
                let payload = state.take_pending();
                state.close();
                payload
            };

            match payload {
                Some(payload) if mode.flushes() => pending.push((key, entry, payload)),
                Some(_) => report.discarded += 1,
                None => {}
            }
        }

        let total = pending.len();
        for (index, (key, entry, payload)) in pending.into_iter().enumerate() {
            if ctx.is_cancelled() {
                report.abandoned += total - index;
                break;
            }
            match self.dispatch(&key, &entry, payload, Some(ctx)).await {
                Dispatch::Sent => report.flushed += 1,
                Dispatch::Failed => report.failed += 1,
                Dispatch::Abandoned => report.abandoned += 1,
            }
        }

        debug!(
            flushed = report.flushed,
            failed = report.failed,
            abandoned = report.abandoned,
            discarded = report.discarded,
            "shutdown finished"
        );
        report
    }

    fn close(&self) {
        if let Some(reclaimer) = &self.reclaimer {
            reclaimer.stop();
        }
    }

    /// Run shutdown with the configured mode once `hook` fires.
    ///
    /// Holds only a weak reference, so an unused coalescer can still be
    /// dropped; dropping it (or cancelling the base token) ends the watcher.
    fn watch_lifecycle(self: &Arc<Self>, hook: LifecycleHook) {
        let weak = Arc::downgrade(self);
        let detached = self.lifecycle.clone();
        let runtime = self.runtime.clone();
        let mode = self.config.shutdown_mode;

        self.runtime.spawn(async move {
            tokio::select! {
                _ = hook.stopped() => {}
                _ = detached.cancelled() => {
                    trace!("lifecycle watcher detached");
                    return;
                }
            }
            let Some(inner) = weak.upgrade() else {
                return;
            };

            debug!(%mode, "lifecycle stop received");
            let (ctx, _timeout) = hook.shutdown_context(&runtime);
            inner.shutdown(&ctx, mode).await;
        });
    }
}

impl<K, P, S> Drop for Inner<K, P, S>
where
    K: Hash + Eq + Clone + Send + Sync + Debug + 'static,
    P: Send + 'static,
    S: Sender<K, P>,
{
    fn drop(&mut self) {
        self.close();
        self.lifecycle.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mocks::RecordingSender;

    type TestCoalescer = Coalescer<String, u32, RecordingSender<String, u32>>;

    fn build(mode: TriggerMode, sender: &RecordingSender<String, u32>) -> TestCoalescer {
        Coalescer::builder(sender.clone())
            .with_mode(mode)
            .with_interval(Duration::from_millis(100))
            .build()
            .unwrap()
    }

    fn key(name: &str) -> String {
        name.to_string()
    }

    #[test]
    fn test_build_without_runtime_fails() {
        let result = Coalescer::<String, u32, _>::builder(RecordingSender::<String, u32>::new())
            .with_interval(Duration::from_millis(100))
            .build();
        assert!(matches!(result, Err(BuildError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_build_rejects_zero_interval() {
        let result = Coalescer::<String, u32, _>::builder(RecordingSender::<String, u32>::new())
            .with_interval(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(BuildError::ZeroInterval)));
    }

    #[test]
    fn test_build_with_explicit_runtime() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();

        let coalescer = Coalescer::<String, u32, _>::builder(RecordingSender::<String, u32>::new())
            .with_runtime(runtime.handle().clone())
            .build()
            .unwrap();
        assert_eq!(coalescer.interval(), Duration::from_secs(1));
        assert_eq!(coalescer.mode(), TriggerMode::TrailingOnly);
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_timer_fire_is_noop() {
        let sender = RecordingSender::new();
        let coalescer = build(TriggerMode::TrailingOnly, &sender);
        coalescer.update(key("k"), 1);

        let inner = &coalescer.inner;
        let entry = inner.registry.get_or_create(key("k"));
        let stale = lock_entry(&entry).generation();
        {
            let mut state = lock_entry(&entry);
            inner.arm_timer(&key("k"), &entry, &mut state, false);
        }

        inner.on_timer(key("k"), &entry, stale).await;
        assert_eq!(sender.count(), 0);
        assert_eq!(coalescer.metrics().stale_timer_fires(), 1);

        // The re-armed timer is still authoritative
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(sender.sent(), vec![(key("k"), 1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_on_closed_entry_is_noop() {
        let sender = RecordingSender::new();
        let coalescer = build(TriggerMode::TrailingOnly, &sender);
        coalescer.update(key("k"), 1);

        let inner = &coalescer.inner;
        let entry = inner.registry.get_or_create(key("k"));
        let generation = lock_entry(&entry).generation();

        coalescer.stop_key(&key("k"));
        inner.on_timer(key("k"), &entry, generation).await;

        assert_eq!(sender.count(), 0);
        assert_eq!(coalescer.metrics().keys_stopped(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_after_eviction_uses_fresh_entry() {
        let sender = RecordingSender::new();
        let coalescer = build(TriggerMode::LeadingOnly, &sender);

        // Simulate an eviction that raced with a lookup: the stale entry is
        // closed and gone from the map.
        let stale = coalescer.inner.registry.get_or_create(key("k"));
        coalescer.inner.registry.remove(&key("k"));
        lock_entry(&stale).close();

        coalescer.update(key("k"), 9);
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(sender.sent(), vec![(key("k"), 9)]);
        assert_eq!(coalescer.key_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_shutdown_returns_immediately() {
        let sender = RecordingSender::new();
        let coalescer = build(TriggerMode::TrailingOnly, &sender);
        coalescer.update(key("a"), 1);

        let ctx = CancellationToken::new();
        let first = coalescer.shutdown(&ctx, ShutdownMode::SendLatest).await;
        let second = coalescer.shutdown(&ctx, ShutdownMode::SendLatest).await;

        assert_eq!(first.flushed, 1);
        assert_eq!(second, ShutdownReport::default());
        assert!(coalescer.is_stopping());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_is_swallowed_and_counted() {
        let sender = RecordingSender::new();
        sender.set_failing(true);
        let coalescer = build(TriggerMode::LeadingAndTrailing, &sender);

        coalescer.update(key("k"), 1);
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(sender.count(), 1);
        assert_eq!(coalescer.metrics().sends_failed(), 1);
        assert_eq!(coalescer.metrics().sends_dispatched(), 0);

        // A failed send does not count toward the min-gap bookkeeping
        let entry = coalescer.inner.registry.get_or_create(key("k"));
        assert!(lock_entry(&entry).last_sent_at().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_idempotent_and_keeps_entries() {
        let sender = RecordingSender::new();
        let coalescer: TestCoalescer = Coalescer::builder(sender.clone())
            .with_interval(Duration::from_millis(100))
            .with_idle_threshold(Duration::from_millis(200))
            .build()
            .unwrap();

        coalescer.update(key("k"), 1);
        coalescer.close();
        coalescer.close();

        tokio::time::sleep(Duration::from_secs(2)).await;
        // Trailing send still happened; the quiet entry was not reclaimed
        assert_eq!(sender.count(), 1);
        assert_eq!(coalescer.key_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_updates_after_shutdown_create_no_keys() {
        let sender = RecordingSender::new();
        let coalescer = build(TriggerMode::TrailingOnly, &sender);
        coalescer.update(key("before"), 1);

        coalescer
            .shutdown(&CancellationToken::new(), ShutdownMode::Noop)
            .await;
        for i in 0..1000 {
            coalescer.update(format!("after_{}", i), i);
        }

        assert_eq!(coalescer.key_count(), 1);
        assert_eq!(coalescer.metrics().updates_received(), 1);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sender.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_coalescer_ends_lifecycle_watcher() {
        let runtime_metrics = Handle::current().metrics();
        let app_stop = CancellationToken::new();

        let coalescer: TestCoalescer = Coalescer::builder(RecordingSender::new())
            .with_interval(Duration::from_millis(100))
            .with_lifecycle_hook(LifecycleHook::new(app_stop.clone()))
            .build()
            .unwrap();
        tokio::task::yield_now().await;
        assert_eq!(runtime_metrics.num_alive_tasks(), 1);

        drop(coalescer);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(runtime_metrics.num_alive_tasks(), 0);
        assert!(!app_stop.is_cancelled());
    }
}
