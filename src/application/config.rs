//! Coalescer configuration and its validation errors.

use crate::domain::mode::{ShutdownMode, TriggerMode};
use std::time::Duration;

/// Error returned when building a coalescer fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// Window interval must be greater than zero
    ZeroInterval,
    /// No tokio runtime was available to schedule timers on
    NoRuntime,
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::ZeroInterval => write!(f, "interval must be greater than 0"),
            BuildError::NoRuntime => write!(
                f,
                "no tokio runtime available; build inside a runtime or pass one with with_runtime"
            ),
        }
    }
}

impl std::error::Error for BuildError {}

/// Smallest sweep period of the idle reclaimer.
pub const MIN_SWEEP_PERIOD: Duration = Duration::from_millis(10);

/// Plain configuration values for a coalescer.
///
/// Collaborators (sender, rate limiter, tokens, clock) are supplied through
/// the builder; this struct only carries data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoalescerConfig {
    /// Triggering policy
    pub mode: TriggerMode,
    /// Window length (trailing) or cooldown length (leading modes)
    pub interval: Duration,
    /// Quiet time after which an entry is reclaimed; zero disables
    pub idle_threshold: Duration,
    /// Suppress a leading send this soon after the previous send; zero disables
    pub min_gap_after_send: Duration,
    /// Mode used when a lifecycle hook triggers shutdown
    pub shutdown_mode: ShutdownMode,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            mode: TriggerMode::TrailingOnly,
            interval: Duration::from_secs(1),
            idle_threshold: Duration::ZERO,
            min_gap_after_send: Duration::ZERO,
            shutdown_mode: ShutdownMode::Noop,
        }
    }
}

impl CoalescerConfig {
    /// Create a config with the given interval and defaults for the rest.
    ///
    /// # Errors
    /// Returns `BuildError::ZeroInterval` if `interval` is zero.
    pub fn new(interval: Duration) -> Result<Self, BuildError> {
        let config = Self {
            interval,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the values that would make the coalescer unusable.
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.interval.is_zero() {
            return Err(BuildError::ZeroInterval);
        }
        Ok(())
    }

    pub fn with_mode(mut self, mode: TriggerMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_idle_threshold(mut self, threshold: Duration) -> Self {
        self.idle_threshold = threshold;
        self
    }

    pub fn with_min_gap_after_send(mut self, gap: Duration) -> Self {
        self.min_gap_after_send = gap;
        self
    }

    pub fn with_shutdown_mode(mut self, mode: ShutdownMode) -> Self {
        self.shutdown_mode = mode;
        self
    }

    /// Whether the idle reclaimer should run.
    pub fn reclaims_idle(&self) -> bool {
        !self.idle_threshold.is_zero()
    }

    /// Period of the idle sweep: half the threshold, at least [`MIN_SWEEP_PERIOD`].
    pub fn sweep_period(&self) -> Duration {
        (self.idle_threshold / 2).max(MIN_SWEEP_PERIOD)
    }
}
