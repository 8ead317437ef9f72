//! Recording sender for testing.

use crate::application::ports::{SendError, Sender};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// One captured send.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct SentRecord<K, P> {
    pub key: K,
    pub payload: P,
    /// Tokio time of the send, so paused-clock tests can check timing
    pub at: Instant,
}

/// Sender that records every call for later inspection.
///
/// Clones share the same record. It can be switched to fail every send,
/// in which case the call is still recorded before the error is returned.
#[derive(Debug, Clone)]
pub struct RecordingSender<K, P> {
    sent: Arc<Mutex<Vec<SentRecord<K, P>>>>,
    failing: Arc<AtomicBool>,
}

impl<K, P> RecordingSender<K, P>
where
    K: Clone + PartialEq,
    P: Clone,
{
    /// Create a recorder that accepts every send.
    pub fn new() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make subsequent sends fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// All captured sends, in call order.
    pub fn records(&self) -> Vec<SentRecord<K, P>> {
        self.lock().clone()
    }

    /// Captured `(key, payload)` pairs, in call order.
    pub fn sent(&self) -> Vec<(K, P)> {
        self.lock()
            .iter()
            .map(|r| (r.key.clone(), r.payload.clone()))
            .collect()
    }

    /// Payloads sent for one key, in call order.
    pub fn payloads_for(&self, key: &K) -> Vec<P> {
        self.lock()
            .iter()
            .filter(|r| &r.key == key)
            .map(|r| r.payload.clone())
            .collect()
    }

    /// Number of captured sends.
    pub fn count(&self) -> usize {
        self.lock().len()
    }

    /// Forget everything captured so far.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<SentRecord<K, P>>> {
        self.sent
            .lock()
            .expect("RecordingSender mutex poisoned - a test thread panicked while holding the lock")
    }
}

impl<K, P> Default for RecordingSender<K, P>
where
    K: Clone + PartialEq,
    P: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K, P> Sender<K, P> for RecordingSender<K, P>
where
    K: Clone + PartialEq + Send + Sync + 'static,
    P: Clone + Send + 'static,
{
    async fn send(&self, _ctx: &CancellationToken, key: &K, payload: P) -> Result<(), SendError> {
        self.lock().push(SentRecord {
            key: key.clone(),
            payload,
            at: Instant::now(),
        });

        if self.failing.load(Ordering::SeqCst) {
            Err("recording sender configured to fail".into())
        } else {
            Ok(())
        }
    }
}
