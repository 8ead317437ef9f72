//! Timing behavior of the three trigger modes, on a paused tokio clock.

mod common;

use common::{init_tracing, key, ms, Recorder};
use keyed_coalesce::{Coalescer, TriggerMode};
use tokio::time::sleep;

fn coalescer(mode: TriggerMode, recorder: &Recorder) -> Coalescer<String, u32, Recorder> {
    init_tracing();
    Coalescer::builder(recorder.clone())
        .with_mode(mode)
        .with_interval(ms(100))
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_trailing_sends_latest_at_window_end() {
    let recorder = Recorder::new();
    let coalescer = coalescer(TriggerMode::TrailingOnly, &recorder);

    coalescer.update(key("k"), 1);
    sleep(ms(30)).await;
    coalescer.update(key("k"), 2);

    sleep(ms(60)).await;
    assert_eq!(recorder.count(), 0, "nothing is sent before the window closes");

    sleep(ms(20)).await;
    let observed = recorder.observed();
    assert_eq!(observed.len(), 1);
    assert_eq!(observed[0].payload, 2);
    assert!(observed[0].at >= ms(100) && observed[0].at < ms(110));

    sleep(ms(500)).await;
    assert_eq!(recorder.count(), 1, "no further sends without updates");
}

#[tokio::test(start_paused = true)]
async fn test_trailing_burst_collapses_to_one_send() {
    let recorder = Recorder::new();
    let coalescer = coalescer(TriggerMode::TrailingOnly, &recorder);

    for value in 0..1000 {
        coalescer.update(key("k"), value);
    }
    sleep(ms(150)).await;

    assert_eq!(recorder.sent(), vec![(key("k"), 999)]);

    let snapshot = coalescer.metrics().snapshot();
    assert_eq!(snapshot.updates_received, 1000);
    assert_eq!(snapshot.sends_dispatched, 1);
    assert!(snapshot.coalescing_ratio() > 0.99);
}

#[tokio::test(start_paused = true)]
async fn test_trailing_window_reopens_after_send() {
    let recorder = Recorder::new();
    let coalescer = coalescer(TriggerMode::TrailingOnly, &recorder);

    coalescer.update(key("k"), 1);
    sleep(ms(150)).await;
    coalescer.update(key("k"), 2);
    sleep(ms(150)).await;

    let observed = recorder.observed();
    assert_eq!(recorder.payloads_for("k"), vec![1, 2]);
    assert!(observed[1].at >= ms(250));
}

#[tokio::test(start_paused = true)]
async fn test_leading_and_trailing_sends_both_edges() {
    let recorder = Recorder::new();
    let coalescer = coalescer(TriggerMode::LeadingAndTrailing, &recorder);

    coalescer.update(key("k"), 1);
    sleep(ms(1)).await;
    assert_eq!(recorder.sent(), vec![(key("k"), 1)], "leading edge is immediate");

    sleep(ms(39)).await;
    coalescer.update(key("k"), 2);
    sleep(ms(50)).await;
    assert_eq!(recorder.count(), 1);

    sleep(ms(20)).await;
    let observed = recorder.observed();
    assert_eq!(recorder.payloads_for("k"), vec![1, 2]);
    assert!(observed[1].at >= ms(100) && observed[1].at < ms(110));

    sleep(ms(500)).await;
    assert_eq!(recorder.count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_leading_and_trailing_without_cooldown_updates() {
    let recorder = Recorder::new();
    let coalescer = coalescer(TriggerMode::LeadingAndTrailing, &recorder);

    coalescer.update(key("k"), 1);
    sleep(ms(500)).await;

    assert_eq!(recorder.sent(), vec![(key("k"), 1)], "no trailing send without new data");
}

#[tokio::test(start_paused = true)]
async fn test_leading_only_drops_cooldown_updates() {
    let recorder = Recorder::new();
    let coalescer = coalescer(TriggerMode::LeadingOnly, &recorder);

    coalescer.update(key("k"), 1);
    sleep(ms(50)).await;
    coalescer.update(key("k"), 2);
    sleep(ms(250)).await;

    assert_eq!(recorder.sent(), vec![(key("k"), 1)]);

    // A fresh update after the cooldown starts a new leading edge
    coalescer.update(key("k"), 3);
    sleep(ms(1)).await;
    assert_eq!(recorder.payloads_for("k"), vec![1, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_min_gap_defers_leading_send_into_full_cooldown() {
    init_tracing();
    let recorder = Recorder::new();
    let coalescer = Coalescer::builder(recorder.clone())
        .with_mode(TriggerMode::LeadingAndTrailing)
        .with_interval(ms(100))
        .with_min_gap_after_send(ms(500))
        .build()
        .unwrap();

    coalescer.update(key("k"), 1);
    sleep(ms(150)).await;
    assert_eq!(recorder.count(), 1);

    // 150ms after the last send: too soon, so no leading send
    coalescer.update(key("k"), 2);
    sleep(ms(1)).await;
    assert_eq!(recorder.count(), 1);

    // The deferred value goes out when the full-length cooldown ends
    sleep(ms(150)).await;
    let observed = recorder.observed();
    assert_eq!(recorder.payloads_for("k"), vec![1, 2]);
    assert!(observed[1].at >= ms(250) && observed[1].at < ms(260));
}

#[tokio::test(start_paused = true)]
async fn test_min_gap_under_leading_only_drops_deferred_value() {
    init_tracing();
    let recorder = Recorder::new();
    let coalescer = Coalescer::builder(recorder.clone())
        .with_mode(TriggerMode::LeadingOnly)
        .with_interval(ms(100))
        .with_min_gap_after_send(ms(500))
        .build()
        .unwrap();

    coalescer.update(key("k"), 1);
    sleep(ms(150)).await;
    coalescer.update(key("k"), 2);
    sleep(ms(300)).await;
    assert_eq!(recorder.payloads_for("k"), vec![1]);

    // Past the gap, leading sends resume
    sleep(ms(100)).await;
    coalescer.update(key("k"), 3);
    sleep(ms(1)).await;
    assert_eq!(recorder.payloads_for("k"), vec![1, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_keys_are_independent() {
    let recorder = Recorder::new();
    let coalescer = coalescer(TriggerMode::TrailingOnly, &recorder);

    coalescer.update(key("a"), 1);
    sleep(ms(50)).await;
    coalescer.update(key("b"), 10);
    coalescer.update(key("a"), 2);

    sleep(ms(60)).await;
    assert_eq!(recorder.sent(), vec![(key("a"), 2)]);

    sleep(ms(50)).await;
    assert_eq!(recorder.payloads_for("b"), vec![10]);
    assert_eq!(coalescer.key_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_stop_key_before_fire_prevents_send() {
    let recorder = Recorder::new();
    let coalescer = coalescer(TriggerMode::TrailingOnly, &recorder);

    coalescer.update(key("k"), 1);
    sleep(ms(50)).await;
    coalescer.stop_key(&key("k"));
    sleep(ms(200)).await;

    assert_eq!(recorder.count(), 0);
    assert_eq!(coalescer.key_count(), 0);
    assert_eq!(coalescer.metrics().keys_stopped(), 1);

    // Stopping is idempotent, and unknown keys are ignored
    coalescer.stop_key(&key("k"));
    coalescer.stop_key(&key("never-seen"));
    assert_eq!(coalescer.metrics().keys_stopped(), 1);

    // A later update starts from a fresh entry
    coalescer.update(key("k"), 2);
    sleep(ms(150)).await;
    assert_eq!(recorder.sent(), vec![(key("k"), 2)]);
}

#[tokio::test(start_paused = true)]
async fn test_stop_key_during_cooldown_drops_trailing_value() {
    let recorder = Recorder::new();
    let coalescer = coalescer(TriggerMode::LeadingAndTrailing, &recorder);

    coalescer.update(key("k"), 1);
    sleep(ms(10)).await;
    coalescer.update(key("k"), 2);
    coalescer.stop_key(&key("k"));
    sleep(ms(200)).await;

    assert_eq!(recorder.sent(), vec![(key("k"), 1)]);
}

#[tokio::test(start_paused = true)]
async fn test_failed_sends_do_not_reach_producers() {
    let recorder = Recorder::new();
    recorder.set_failing(true);
    let coalescer = coalescer(TriggerMode::TrailingOnly, &recorder);

    coalescer.update(key("k"), 1);
    sleep(ms(150)).await;
    coalescer.update(key("k"), 2);
    sleep(ms(150)).await;

    // Each failure is dropped, not retried
    assert_eq!(recorder.payloads_for("k"), vec![1, 2]);
    assert_eq!(coalescer.metrics().sends_failed(), 2);
    assert_eq!(coalescer.metrics().sends_dispatched(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_producers_on_multi_thread_runtime() {
    init_tracing();
    let recorder = Recorder::new();
    let coalescer = Coalescer::builder(recorder.clone())
        .with_interval(ms(1000))
        .build()
        .unwrap();

    let mut handles = Vec::new();
    for producer in 0..8u32 {
        let coalescer = coalescer.clone();
        handles.push(std::thread::spawn(move || {
            for value in 0..500 {
                coalescer.update(format!("key_{}", value % 4), producer * 1000 + value);
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    sleep(ms(1500)).await;

    assert_eq!(coalescer.metrics().updates_received(), 4000);
    assert_eq!(coalescer.key_count(), 4);
    // Every key had one window open; each sends once
    assert_eq!(recorder.count(), 4);
}
