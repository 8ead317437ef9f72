//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the application
//! layer needs. Infrastructure adapters implement these ports, and the owner of
//! the coalescer implements [`Sender`].

use async_trait::async_trait;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Error type returned by a [`Sender`].
///
/// The coalescer never inspects it beyond logging; it is boxed so senders can
/// return whatever their transport produces.
pub type SendError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Port for the downstream emission of a coalesced payload.
///
/// Implemented by the owner of the coalescer. Failures are swallowed: the
/// coalescer neither retries nor reports them to producers.
#[async_trait]
pub trait Sender<K, P>: Send + Sync + 'static
where
    K: Send + Sync + 'static,
    P: Send + 'static,
{
    /// Emit `payload` for `key`.
    ///
    /// `ctx` is the base token for ordinary sends and the shutdown token for
    /// flushes; long-running senders should give up once it is cancelled.
    async fn send(&self, ctx: &CancellationToken, key: &K, payload: P) -> Result<(), SendError>;
}

/// Port for a shared pacing capability consulted before every send.
///
/// Implementations must be safe to share between all keys and all coalescers
/// using them. The coalescer races [`RateLimit::acquire`] against cancellation,
/// so implementations may simply wait until a permit is available.
#[async_trait]
pub trait RateLimit: Send + Sync + Debug {
    /// Wait until a permit is granted.
    async fn acquire(&self);
}

/// Port for obtaining current time.
///
/// This abstraction allows the application layer to work with time
/// without depending on system clock implementation details.
/// Infrastructure provides concrete implementations (SystemClock, MockClock).
pub trait Clock: Send + Sync + Debug {
    /// Get the current instant.
    fn now(&self) -> Instant;
}

/// Port for the concurrent key -> entry map.
///
/// Values are cheap handles (`Arc`s) so they can be cloned out and locked
/// without holding any map lock.
pub trait Storage<K, V>: Send + Sync + Debug
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    /// Return the value for `key`, inserting the result of `factory` first if
    /// the key is absent.
    fn get_or_insert_with(&self, key: K, factory: impl FnOnce() -> V) -> V;

    /// Remove `key` and return its value.
    fn remove(&self, key: &K) -> Option<V>;

    /// Get the number of entries in the storage.
    fn len(&self) -> usize;

    /// Check if the storage is empty.
    fn is_empty(&self) -> bool;

    /// Clone out every key and value currently stored.
    fn snapshot(&self) -> Vec<(K, V)>;

    /// Remove entries for which the predicate returns false.
    fn retain<F>(&self, f: F)
    where
        F: FnMut(&K, &mut V) -> bool;
}
