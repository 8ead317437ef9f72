//! Example demonstrating graceful shutdown through a lifecycle hook.
//!
//! Pending values of every key are flushed once when the application stops.
//! The hook listens for Ctrl-C; here it is triggered programmatically after
//! one second so the example terminates on its own.

use keyed_coalesce::{Coalescer, LifecycleHook, SendError, SendFn, ShutdownMode, TokenBucket};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let sender = SendFn::new(|user: u64, unread: u32| async move {
        println!("  notify user {user}: {unread} unread");
        Ok::<(), SendError>(())
    });

    let hook = LifecycleHook::ctrl_c().with_shutdown_timeout(Duration::from_secs(2));

    // Long window: nothing would be sent before the stop without the flush
    let coalescer = Coalescer::builder(sender)
        .with_interval(Duration::from_secs(30))
        .with_shutdown_mode(ShutdownMode::SendLatest)
        .with_rate_limiter(Arc::new(TokenBucket::new(5, 20.0).unwrap()))
        .with_lifecycle_hook(hook.clone())
        .build()
        .unwrap();

    println!("=== Shutdown Example ===\n");
    println!("Queueing unread counts for 10 users (30s window)");
    for user in 0..10u64 {
        for unread in 1..=user as u32 + 1 {
            coalescer.update(user, unread);
        }
    }
    println!("Keys tracked: {}", coalescer.key_count());

    tokio::time::sleep(Duration::from_secs(1)).await;
    println!("\nStopping (press Ctrl-C to stop earlier)...");
    hook.trigger();

    while coalescer.metrics().sends_dispatched() < 10 {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    println!("\nStopping: {}", coalescer.is_stopping());
    println!("Sends flushed: {}", coalescer.metrics().sends_dispatched());
    println!("\n=== Example Complete ===");
}
