//! Shared helpers for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use keyed_coalesce::{SendError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

static TRACING: Once = Once::new();

/// Install a test subscriber honoring `RUST_LOG`, once per test binary.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// A send observed by [`Recorder`], with its offset from the recorder's start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observed {
    pub key: String,
    pub payload: u32,
    pub at: Duration,
}

#[derive(Debug)]
struct RecorderState {
    start: Instant,
    sent: Mutex<Vec<Observed>>,
    failing: AtomicBool,
    latency: Mutex<Duration>,
}

/// Sender capturing every call, with optional latency and failure injection.
///
/// Latency is cut short when the send's token is cancelled; such sends are
/// not recorded.
#[derive(Debug, Clone)]
pub struct Recorder {
    state: Arc<RecorderState>,
}

impl Recorder {
    /// Create a recorder whose clock starts now (tokio time).
    pub fn new() -> Self {
        Self {
            state: Arc::new(RecorderState {
                start: Instant::now(),
                sent: Mutex::new(Vec::new()),
                failing: AtomicBool::new(false),
                latency: Mutex::new(Duration::ZERO),
            }),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.state.latency.lock().unwrap() = latency;
    }

    pub fn observed(&self) -> Vec<Observed> {
        self.state.sent.lock().unwrap().clone()
    }

    /// `(key, payload)` pairs in send order.
    pub fn sent(&self) -> Vec<(String, u32)> {
        self.observed()
            .into_iter()
            .map(|o| (o.key, o.payload))
            .collect()
    }

    pub fn payloads_for(&self, key: &str) -> Vec<u32> {
        self.observed()
            .into_iter()
            .filter(|o| o.key == key)
            .map(|o| o.payload)
            .collect()
    }

    pub fn count(&self) -> usize {
        self.state.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Sender<String, u32> for Recorder {
    async fn send(&self, ctx: &CancellationToken, key: &String, payload: u32) -> Result<(), SendError> {
        let latency = *self.state.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::select! {
                _ = ctx.cancelled() => return Err("send cancelled".into()),
                _ = tokio::time::sleep(latency) => {}
            }
        }

        self.state.sent.lock().unwrap().push(Observed {
            key: key.clone(),
            payload,
            at: self.state.start.elapsed(),
        });

        if self.state.failing.load(Ordering::SeqCst) {
            Err("downstream unavailable".into())
        } else {
            Ok(())
        }
    }
}

pub fn key(name: &str) -> String {
    name.to_string()
}
