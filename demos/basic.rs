//! Basic example demonstrating trailing-edge coalescing.
//!
//! A producer reports progress for one job 50 times in quick succession.
//! With a 200ms window only the latest value of each window reaches the
//! sender.

use keyed_coalesce::{Coalescer, SendError, SendFn, ShutdownMode};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let sender = SendFn::new(|job: String, progress: u32| async move {
        println!("  -> send {job}: {progress}%");
        Ok::<(), SendError>(())
    });

    // Default mode is trailing only
    let coalescer = Coalescer::builder(sender)
        .with_interval(Duration::from_millis(200))
        .build()
        .unwrap();

    println!("=== Basic Coalescing Example ===\n");
    println!("Mode: trailing only, 200ms window\n");

    println!("Reporting progress 0..=49, one update every 10ms:");
    for progress in 0..50 {
        coalescer.update("job-1".to_string(), progress * 2);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Give the last window time to close
    tokio::time::sleep(Duration::from_millis(300)).await;

    let snapshot = coalescer.metrics().snapshot();
    println!("\nUpdates received: {}", snapshot.updates_received);
    println!("Sends dispatched: {}", snapshot.sends_dispatched);
    println!("Coalescing ratio: {:.2}", snapshot.coalescing_ratio());

    coalescer
        .shutdown(&CancellationToken::new(), ShutdownMode::Noop)
        .await;

    println!("\n=== Example Complete ===");
}
