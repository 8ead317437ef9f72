//! Central registry of per-key entries.
//!
//! The registry owns the key -> entry map and the clock. It creates entries
//! lazily, removes them on explicit stop, and performs the idle sweep.

use crate::application::entry::{lock_entry, Entry, SharedEntry};
use crate::application::ports::{Clock, Storage};
use crate::infrastructure::storage::ShardedStorage;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Registry managing all per-key entries.
///
/// This type is generic over the storage implementation. In production, use
/// the default `Arc<ShardedStorage>`.
pub struct EntryRegistry<K, P, S = Arc<ShardedStorage<K, SharedEntry<P>>>>
where
    K: Hash + Eq + Clone + Send + Sync,
    P: Send,
    S: Storage<K, SharedEntry<P>>,
{
    storage: S,
    clock: Arc<dyn Clock>,
    _marker: PhantomData<fn() -> (K, P)>,
}

impl<K, P, S> EntryRegistry<K, P, S>
where
    K: Hash + Eq + Clone + Send + Sync,
    P: Send,
    S: Storage<K, SharedEntry<P>>,
{
    /// Create a new registry over `storage`, timestamping with `clock`.
    pub fn new(storage: S, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            clock,
            _marker: PhantomData,
        }
    }

    /// Current time according to the registry's clock.
    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Get the entry for `key`, creating an empty one on first use.
    pub fn get_or_create(&self, key: K) -> SharedEntry<P> {
        let now = self.clock.now();
        self.storage
            .get_or_insert_with(key, || Arc::new(Mutex::new(Entry::new(now))))
    }

    /// Remove the entry for `key` from the map without closing it.
    pub fn remove(&self, key: &K) -> Option<SharedEntry<P>> {
        self.storage.remove(key)
    }

    /// Keys and entry handles currently in the map.
    pub fn snapshot(&self) -> Vec<(K, SharedEntry<P>)> {
        self.storage.snapshot()
    }

    /// Get the number of tracked keys.
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Evict entries that have been quiet for at least `threshold`.
    ///
    /// Entries with a pending timer, a cooldown or unsent data are kept.
    /// Evicted entries are closed so that a timer task still holding them
    /// cannot act. Returns the number of evicted entries.
    pub fn sweep_idle(&self, threshold: Duration) -> usize {
        let now = self.clock.now();
        let mut evicted = 0;

        self.storage.retain(|_key, entry| {
            let mut state = lock_entry(entry);
            if state.is_reclaimable(now, threshold) {
                state.close();
                evicted += 1;
                false
            } else {
                true
            }
        });

        evicted
    }
}

impl<K, P, S> std::fmt::Debug for EntryRegistry<K, P, S>
where
    K: Hash + Eq + Clone + Send + Sync,
    P: Send,
    S: Storage<K, SharedEntry<P>>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryRegistry")
            .field("storage", &self.storage)
            .field("clock", &self.clock)
            .finish()
    }
}
