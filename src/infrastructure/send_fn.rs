//! Closure adapter for the [`Sender`] port.

use crate::application::ports::{SendError, Sender};
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Wraps an async closure `Fn(K, P) -> Future<Output = Result<(), SendError>>`
/// so it can be used as a [`Sender`].
///
/// The closure receives an owned clone of the key. Use a hand-written
/// `Sender` implementation when the cancellation token is needed.
///
/// # Example
/// ```
/// use keyed_coalesce::{SendError, SendFn};
///
/// let sender = SendFn::new(|key: String, payload: u64| async move {
///     println!("{key} -> {payload}");
///     Ok::<(), SendError>(())
/// });
/// # let _ = sender;
/// ```
pub struct SendFn<F> {
    f: F,
}

impl<F> SendFn<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> fmt::Debug for SendFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendFn").field("f", &"<fn>").finish()
    }
}

#[async_trait]
impl<K, P, F, Fut> Sender<K, P> for SendFn<F>
where
    K: Clone + Send + Sync + 'static,
    P: Send + 'static,
    F: Fn(K, P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), SendError>> + Send + 'static,
{
    async fn send(&self, _ctx: &CancellationToken, key: &K, payload: P) -> Result<(), SendError> {
        (self.f)(key.clone(), payload).await
    }
}
