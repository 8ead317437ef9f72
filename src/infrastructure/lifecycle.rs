//! Application lifecycle integration.
//!
//! A [`LifecycleHook`] tells a coalescer when the application is stopping so
//! it can run its shutdown sequence on its own, with the configured
//! [`ShutdownMode`](crate::ShutdownMode).

use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Stop signal that triggers an automatic coalescer shutdown.
///
/// # Example
/// ```no_run
/// use keyed_coalesce::LifecycleHook;
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
///
/// let app_stop = CancellationToken::new();
/// let hook = LifecycleHook::new(app_stop.clone())
///     .with_shutdown_timeout(Duration::from_secs(5));
///
/// // ... later, when the application stops:
/// app_stop.cancel();
/// # let _ = hook;
/// ```
#[derive(Debug, Clone)]
pub struct LifecycleHook {
    stop: CancellationToken,
    listen_ctrl_c: bool,
    shutdown_timeout: Option<Duration>,
}

impl LifecycleHook {
    /// Trigger shutdown when `stop` is cancelled.
    pub fn new(stop: CancellationToken) -> Self {
        Self {
            stop,
            listen_ctrl_c: false,
            shutdown_timeout: None,
        }
    }

    /// Trigger shutdown on Ctrl-C (SIGINT), or when [`LifecycleHook::trigger`] is called.
    pub fn ctrl_c() -> Self {
        Self {
            stop: CancellationToken::new(),
            listen_ctrl_c: true,
            shutdown_timeout: None,
        }
    }

    /// Cancel the shutdown flush if it takes longer than `timeout`.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    /// Request the stop programmatically.
    pub fn trigger(&self) {
        self.stop.cancel();
    }

    pub fn shutdown_timeout(&self) -> Option<Duration> {
        self.shutdown_timeout
    }

    /// Resolve once a stop has been requested.
    pub(crate) async fn stopped(&self) {
        if !self.listen_ctrl_c {
            self.stop.cancelled().await;
            return;
        }

        tokio::select! {
            _ = self.stop.cancelled() => {}
            result = tokio::signal::ctrl_c() => {
                if let Err(error) = result {
                    warn!(%error, "failed to listen for ctrl-c; waiting for explicit trigger");
                    self.stop.cancelled().await;
                }
            }
        }
    }

    /// Token for the shutdown sequence, cancelled once the timeout elapses.
    ///
    /// The timeout task runs on `runtime`; the returned guard cancels it when
    /// dropped.
    pub(crate) fn shutdown_context(
        &self,
        runtime: &Handle,
    ) -> (CancellationToken, Option<TimeoutGuard>) {
        let ctx = CancellationToken::new();
        let guard = self.shutdown_timeout.map(|timeout| {
            let token = ctx.clone();
            let task = runtime.spawn(async move {
                tokio::time::sleep(timeout).await;
                token.cancel();
            });
            TimeoutGuard { task }
        });
        (ctx, guard)
    }
}

/// Aborts the shutdown timeout task when dropped.
#[derive(Debug)]
pub(crate) struct TimeoutGuard {
    task: tokio::task::JoinHandle<()>,
}

impl Drop for TimeoutGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}
