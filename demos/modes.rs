//! Example comparing the three trigger modes.
//!
//! The same burst of updates is fed to one coalescer per mode:
//! - Trailing only: one send at the end of each window
//! - Leading and trailing: an immediate send, then the latest value once the
//!   cooldown ends
//! - Leading only: an immediate send, cooldown updates are dropped

use keyed_coalesce::{Coalescer, SendError, SendFn, ShutdownMode, TriggerMode};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

async fn demonstrate(mode: TriggerMode) {
    println!("\n=== {mode} ===");

    let start = Instant::now();
    let sender = SendFn::new(move |key: &'static str, value: u32| async move {
        println!("  {:>4}ms  send {key} = {value}", start.elapsed().as_millis());
        Ok::<(), SendError>(())
    });

    let coalescer = Coalescer::builder(sender)
        .with_mode(mode)
        .with_interval(Duration::from_millis(100))
        .build()
        .unwrap();

    // Ten updates 20ms apart, then silence
    for value in 1..=10 {
        coalescer.update("sensor", value);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tokio::time::sleep(Duration::from_millis(250)).await;

    coalescer
        .shutdown(&CancellationToken::new(), ShutdownMode::Noop)
        .await;
}

#[tokio::main]
async fn main() {
    println!("Ten updates, 20ms apart, with a 100ms interval");

    demonstrate(TriggerMode::TrailingOnly).await;
    demonstrate(TriggerMode::LeadingAndTrailing).await;
    demonstrate(TriggerMode::LeadingOnly).await;

    println!("\n=== With a 500ms minimum gap after each send ===");
    let sender = SendFn::new(|key: &'static str, value: u32| async move {
        println!("  send {key} = {value}");
        Ok::<(), SendError>(())
    });
    let coalescer = Coalescer::builder(sender)
        .with_mode(TriggerMode::LeadingAndTrailing)
        .with_interval(Duration::from_millis(100))
        .with_min_gap_after_send(Duration::from_millis(500))
        .build()
        .unwrap();

    coalescer.update("sensor", 1);
    tokio::time::sleep(Duration::from_millis(200)).await;
    println!("  update 2 arrives 200ms after the first send: deferred");
    coalescer.update("sensor", 2);
    tokio::time::sleep(Duration::from_millis(200)).await;

    println!("\n=== Example Complete ===");
}
