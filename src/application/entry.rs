//! Per-key coalescing state.
//!
//! An [`Entry`] holds the latest unsent payload of one key together with its
//! scheduling flags. Every field is guarded by the entry's own mutex; the map
//! that owns the entries has its own, coarser locks.
//!
//! # Generation guard
//!
//! Aborting a tokio task does not race cleanly with a task that has already
//! woken up. Each time a timer is armed the entry's `generation` is bumped and
//! the timer task carries the value it was armed with. When the task gets the
//! lock it only acts if [`Entry::is_current`] still holds; a superseded or
//! closed timer is a no-op.

use crate::domain::trigger::KeyState;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::AbortHandle;

/// Shared handle to an entry, as stored in the registry.
pub type SharedEntry<P> = Arc<Mutex<Entry<P>>>;

/// Lock an entry, recovering the guard if a previous holder panicked.
///
/// No user code runs while an entry is locked, so a poisoned entry is still
/// internally consistent.
pub(crate) fn lock_entry<P>(entry: &Mutex<Entry<P>>) -> MutexGuard<'_, Entry<P>> {
    entry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State tracked for each key.
pub struct Entry<P> {
    /// Latest payload not yet sent; `Some` means data is pending
    latest: Option<P>,
    timer_armed: bool,
    cooldown: bool,
    closed: bool,
    /// Bumped every time a timer is armed
    generation: u64,
    timer: Option<AbortHandle>,
    /// Time of the most recent update, for idle reclamation
    last_used: Instant,
    /// Time of the most recent successful send, for the min-gap rule
    last_sent_at: Option<Instant>,
}

impl<P> Entry<P> {
    /// Create an empty, open entry.
    pub fn new(now: Instant) -> Self {
        Self {
            latest: None,
            timer_armed: false,
            cooldown: false,
            closed: false,
            generation: 0,
            timer: None,
            last_used: now,
            last_sent_at: None,
        }
    }

    /// Record a new payload, replacing any pending one.
    pub fn record(&mut self, payload: P, now: Instant) {
        self.latest = Some(payload);
        self.last_used = now;
    }

    /// Take the pending payload, clearing it.
    pub fn take_pending(&mut self) -> Option<P> {
        self.latest.take()
    }

    pub fn has_pending(&self) -> bool {
        self.latest.is_some()
    }

    /// Scheduling state as the trigger policy sees it.
    pub fn key_state(&self) -> KeyState {
        KeyState {
            timer_armed: self.timer_armed,
            cooldown: self.cooldown,
        }
    }

    /// Mark a new timer as armed and return its generation.
    ///
    /// Any previous timer is aborted; its generation is superseded either way.
    pub fn arm(&mut self, cooldown: bool) -> u64 {
        if let Some(previous) = self.timer.take() {
            previous.abort();
        }
        self.generation = self.generation.wrapping_add(1);
        self.timer_armed = true;
        self.cooldown = cooldown;
        self.generation
    }

    /// Attach the task handle of the timer armed with `generation`.
    ///
    /// A handle for a superseded generation is aborted instead.
    pub fn attach_timer(&mut self, generation: u64, handle: AbortHandle) {
        if self.is_current(generation) && self.timer_armed {
            self.timer = Some(handle);
        } else {
            handle.abort();
        }
    }

    /// Whether a timer armed with `generation` may still act.
    pub fn is_current(&self, generation: u64) -> bool {
        !self.closed && self.generation == generation
    }

    /// Leave the armed/cooldown state after a valid fire.
    ///
    /// The timer task is the caller, so its handle is released, not aborted.
    pub fn expire(&mut self) {
        self.timer = None;
        self.timer_armed = false;
        self.cooldown = false;
    }

    /// Abort the armed timer, if any.
    pub fn stop_timer(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }
        self.timer_armed = false;
        self.cooldown = false;
    }

    /// Close the entry for good. Pending data is left for the caller to take.
    pub fn close(&mut self) {
        self.stop_timer();
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether the entry still has work in flight: a timer, a cooldown or data.
    pub fn is_draining(&self) -> bool {
        self.cooldown || self.timer_armed || self.latest.is_some()
    }

    /// Whether the entry may be reclaimed at `now`.
    pub fn is_reclaimable(&self, now: Instant, threshold: Duration) -> bool {
        !self.closed
            && !self.is_draining()
            && now.saturating_duration_since(self.last_used) >= threshold
    }

    /// Record a successful send.
    pub fn mark_sent(&mut self, at: Instant) {
        self.last_sent_at = Some(at);
    }

    /// Time elapsed since the last successful send.
    pub fn since_last_send(&self, now: Instant) -> Option<Duration> {
        self.last_sent_at
            .map(|sent| now.saturating_duration_since(sent))
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn last_sent_at(&self) -> Option<Instant> {
        self.last_sent_at
    }
}

impl<P> fmt::Debug for Entry<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("has_data", &self.latest.is_some())
            .field("timer_armed", &self.timer_armed)
            .field("cooldown", &self.cooldown)
            .field("closed", &self.closed)
            .field("generation", &self.generation)
            .field("last_used", &self.last_used)
            .field("last_sent_at", &self.last_sent_at)
            .finish()
    }
}
