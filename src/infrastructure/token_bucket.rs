//! Token bucket rate limiter.
//!
//! A ready-made [`RateLimit`] adapter for pacing sends across all keys (and
//! across several coalescers sharing one `Arc<TokenBucket>`).

use crate::application::ports::{Clock, RateLimit};
use crate::infrastructure::clock::SystemClock;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Shortest sleep between two acquisition attempts.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Error returned when token bucket parameters are invalid.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenBucketError {
    /// Bucket capacity must be at least one token
    ZeroCapacity,
    /// Refill rate must be a positive, finite number of tokens per second
    InvalidRefillRate(f64),
}

impl std::fmt::Display for TokenBucketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenBucketError::ZeroCapacity => write!(f, "capacity must be greater than 0"),
            TokenBucketError::InvalidRefillRate(rate) => {
                write!(f, "refill rate must be positive and finite, got {}", rate)
            }
        }
    }
}

impl std::error::Error for TokenBucketError {}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket: bursts up to `capacity`, then one permit every
/// `1 / refill_per_sec` seconds.
///
/// # Example
/// ```
/// use keyed_coalesce::TokenBucket;
///
/// let bucket = TokenBucket::new(2, 10.0).unwrap();
/// assert!(bucket.try_acquire().is_ok());
/// assert!(bucket.try_acquire().is_ok());
/// // Burst exhausted: the error carries the wait until the next token
/// assert!(bucket.try_acquire().is_err());
/// ```
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
    clock: Arc<dyn Clock>,
}

impl TokenBucket {
    /// Create a full bucket using the system clock.
    ///
    /// # Errors
    /// Returns an error if `capacity` is zero or `refill_per_sec` is not a
    /// positive finite number.
    pub fn new(capacity: u32, refill_per_sec: f64) -> Result<Self, TokenBucketError> {
        Self::with_clock(capacity, refill_per_sec, Arc::new(SystemClock::new()))
    }

    /// Create a full bucket reading time from `clock`.
    pub fn with_clock(
        capacity: u32,
        refill_per_sec: f64,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TokenBucketError> {
        if capacity == 0 {
            return Err(TokenBucketError::ZeroCapacity);
        }
        if !refill_per_sec.is_finite() || refill_per_sec <= 0.0 {
            return Err(TokenBucketError::InvalidRefillRate(refill_per_sec));
        }

        let capacity = f64::from(capacity);
        Ok(Self {
            capacity,
            refill_per_sec,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: clock.now(),
            }),
            clock,
        })
    }

    /// Take a token if one is available.
    ///
    /// # Errors
    /// Returns the time until the next token when the bucket is empty.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut state, now);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - state.tokens;
            Err(Duration::from_secs_f64(missing / self.refill_per_sec).max(MIN_WAIT))
        }
    }

    /// Tokens currently available (fractional).
    pub fn available(&self) -> f64 {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut state, now);
        state.tokens
    }

    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }

    pub fn refill_per_sec(&self) -> f64 {
        self.refill_per_sec
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        state.tokens = (state.tokens + elapsed.as_secs_f64() * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
    }
}

#[async_trait]
impl RateLimit for TokenBucket {
    async fn acquire(&self) {
        while let Err(wait) = self.try_acquire() {
            tokio::time::sleep(wait).await;
        }
    }
}
