//! Collector loop scheduling and cancellation

use std::sync::Arc;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use netwatch::{
    ProbeKind,
    actors::collector::{Collector, CollectorLoop, LoopExit, LoopState},
    actors::runtime::{RuntimeMode, RuntimeRegistry},
};
use tokio_util::sync::CancellationToken;

use crate::helpers::{RecordingStore, StubExecutor, probe_config, wait_until};

#[tokio::test]
async fn test_stop_while_sleeping_resolves_promptly() {
    let store = RecordingStore::new();
    let collector = CollectorLoop::new(
        ProbeKind::Ping,
        StubExecutor::new(ProbeKind::Ping),
        &probe_config(&["1.1.1.1"], 3_600_000, 1_000),
        store.clone(),
        RuntimeRegistry::new(),
    );

    let handle = collector.start(CancellationToken::new());
    assert!(wait_until(Duration::from_secs(2), || store.appended() == 1).await);

    let started = Instant::now();
    collector.stop();
    let exit = tokio::time::timeout(Duration::from_millis(250), handle.wait())
        .await
        .expect("loop did not stop while sleeping");

    assert_eq!(exit, LoopExit::Stopped);
    assert!(started.elapsed() < Duration::from_millis(250));
    assert_eq!(collector.state(), LoopState::Stopped);
}

#[tokio::test]
async fn test_parent_token_stops_loop() {
    let store = RecordingStore::new();
    let collector = CollectorLoop::new(
        ProbeKind::Dns,
        StubExecutor::new(ProbeKind::Dns),
        &probe_config(&["example.com"], 3_600_000, 1_000),
        store.clone(),
        RuntimeRegistry::new(),
    );

    let shutdown = CancellationToken::new();
    let handle = collector.start(shutdown.clone());
    assert!(wait_until(Duration::from_secs(2), || store.appended() == 1).await);

    shutdown.cancel();
    let exit = tokio::time::timeout(Duration::from_secs(1), handle.wait())
        .await
        .unwrap();

    assert_eq!(exit, LoopExit::Stopped);
}

#[tokio::test]
async fn test_repeated_failures_degrade_target() {
    let store = RecordingStore::new();
    let runtime = RuntimeRegistry::new();
    let collector = CollectorLoop::new(
        ProbeKind::Ping,
        StubExecutor::new(ProbeKind::Ping),
        &probe_config(&["down.example", "1.1.1.1"], 20, 1_000),
        store.clone(),
        runtime.clone(),
    );

    let handle = collector.start(CancellationToken::new());
    assert!(wait_until(Duration::from_secs(3), || store.appended() >= 6).await);
    collector.stop();
    handle.wait().await;

    let down = runtime.get(ProbeKind::Ping, "down.example").await.unwrap();
    assert!(down.consecutive_failures >= 3);
    assert_eq!(down.consecutive_successes, 0);
    assert_eq!(down.mode, RuntimeMode::Degraded);

    let up = runtime.get(ProbeKind::Ping, "1.1.1.1").await.unwrap();
    assert_eq!(up.consecutive_failures, 0);
    assert_eq!(up.mode, RuntimeMode::Normal);

    let samples = store.all_samples(ProbeKind::Ping).await;
    assert!(
        samples
            .iter()
            .filter(|s| s.key == "down.example")
            .all(|s| !s.success && s.latency_ms.is_none())
    );
}

#[tokio::test]
async fn test_hanging_probe_becomes_timeout_sample() {
    let store = RecordingStore::new();
    let collector = CollectorLoop::new(
        ProbeKind::Http,
        StubExecutor::new(ProbeKind::Http),
        &probe_config(&["hang.example", "ok.example"], 3_600_000, 50),
        store.clone(),
        RuntimeRegistry::new(),
    );

    let handle = collector.start(CancellationToken::new());
    assert!(wait_until(Duration::from_secs(2), || store.appended() == 2).await);
    collector.stop();
    handle.wait().await;

    let samples = store.all_samples(ProbeKind::Http).await;
    let hung = samples.iter().find(|s| s.key == "hang.example").unwrap();
    assert!(!hung.success);
    assert_eq!(hung.error.as_deref(), Some("probe timed out"));

    let ok = samples.iter().find(|s| s.key == "ok.example").unwrap();
    assert!(ok.success);
}

#[tokio::test]
async fn test_probe_now_without_running_loop() {
    let store = RecordingStore::new();
    let collector: Arc<dyn Collector> = Arc::new(CollectorLoop::new(
        ProbeKind::Traceroute,
        StubExecutor::new(ProbeKind::Traceroute),
        &probe_config(&[], 60_000, 1_000),
        store.clone(),
        RuntimeRegistry::new(),
    ));

    let report = collector.probe_now("9.9.9.9").await.unwrap();
    assert!(report.success);
    assert_eq!(report.target, "9.9.9.9");
    assert_eq!(collector.state(), LoopState::Idle);

    let samples = store.all_samples(ProbeKind::Traceroute).await;
    assert_matches!(samples.as_slice(), [sample] if sample.id == Some(report.id));
}
