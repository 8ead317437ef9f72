//! Trigger policy: the per-key state machine behind every update and timer fire.
//!
//! The policy is pure. It looks at a snapshot of the key's scheduling state and
//! returns what the coalescer should do; the coalescer owns timers and sends.
//!
//! ```text
//!            update                      fire (valid generation)
//!   Idle ─────────────▶ TimerArmed ──────────────────────────────▶ Idle
//!     │   (trailing)                      send latest if pending
//!     │
//!     │ update (leading modes)           expiry (valid generation)
//!     └─────────────────▶ Cooldown ──────────────────────────────▶ Idle
//!        send now, or defer             leading+trailing: send pending
//!        when inside min gap            leading-only: drop pending
//! ```

use super::mode::TriggerMode;
use std::time::Duration;

/// Scheduling state of a key as seen by the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyState {
    /// A window or cooldown timer is pending
    pub timer_armed: bool,
    /// Inside a post-leading-send cooldown
    pub cooldown: bool,
}

impl KeyState {
    /// A key with no timer and no cooldown.
    pub fn is_idle(&self) -> bool {
        !self.timer_armed && !self.cooldown
    }
}

/// What an update should cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateAction {
    /// Only record the payload; a timer or cooldown is already pending.
    Record,
    /// Arm the trailing window timer.
    ArmWindow,
    /// Send the payload now and enter cooldown.
    SendLeading,
    /// Too soon after the previous send: enter a full cooldown without sending.
    DeferLeading,
}

impl UpdateAction {
    /// Whether this action arms a timer.
    pub fn arms_timer(&self) -> bool {
        !matches!(self, UpdateAction::Record)
    }

    /// Whether this action enters the cooldown state.
    pub fn enters_cooldown(&self) -> bool {
        matches!(self, UpdateAction::SendLeading | UpdateAction::DeferLeading)
    }
}

/// What a valid timer fire should cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryAction {
    /// Send the pending payload.
    Send,
    /// Discard the pending payload.
    Drop,
    /// Nothing pending; just go idle.
    Release,
}

/// Decision logic for one coalescer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerPolicy {
    mode: TriggerMode,
    min_gap: Option<Duration>,
}

impl TriggerPolicy {
    /// Create a policy. A zero `min_gap` disables the minimum-gap rule.
    pub fn new(mode: TriggerMode, min_gap: Duration) -> Self {
        Self {
            mode,
            min_gap: (!min_gap.is_zero()).then_some(min_gap),
        }
    }

    /// Decide what an update does.
    ///
    /// # Arguments
    /// * `state` - Scheduling state before the update
    /// * `since_last_send` - Time since the key's last successful send, if any
    pub fn on_update(&self, state: KeyState, since_last_send: Option<Duration>) -> UpdateAction {
        if !self.mode.is_leading() {
            return if state.timer_armed {
                UpdateAction::Record
            } else {
                UpdateAction::ArmWindow
            };
        }

        if state.cooldown {
            UpdateAction::Record
        } else if self.within_min_gap(since_last_send) {
            // Deferred into a full-length cooldown, not the remaining gap.
            UpdateAction::DeferLeading
        } else {
            UpdateAction::SendLeading
        }
    }

    /// Decide what a valid (non-stale) timer fire does.
    pub fn on_expiry(&self, has_pending: bool) -> ExpiryAction {
        match (has_pending, self.mode.sends_trailing()) {
            (false, _) => ExpiryAction::Release,
            (true, true) => ExpiryAction::Send,
            (true, false) => ExpiryAction::Drop,
        }
    }

    fn within_min_gap(&self, since_last_send: Option<Duration>) -> bool {
        match (self.min_gap, since_last_send) {
            (Some(gap), Some(elapsed)) => elapsed < gap,
            _ => false,
        }
    }
}
