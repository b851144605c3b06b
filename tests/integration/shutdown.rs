//! Supervisor teardown ordering

use std::sync::Arc;
use std::time::{Duration, Instant};

use netwatch::{
    ProbeKind,
    actors::collector::{CollectorLoop, LoopState},
    actors::runtime::RuntimeRegistry,
    supervisor::{Supervisor, SupervisorOptions},
};

use crate::helpers::{RecordingStore, StubExecutor, probe_config, wait_until};

fn options() -> SupervisorOptions {
    SupervisorOptions {
        rollup_interval: None,
        ..SupervisorOptions::default()
    }
}

fn all_loops(store: &Arc<RecordingStore>, runtime: &RuntimeRegistry) -> Vec<CollectorLoop> {
    ProbeKind::ALL
        .iter()
        .map(|kind| {
            CollectorLoop::new(
                *kind,
                StubExecutor::new(*kind),
                &probe_config(&["target.example"], 3_600_000, 1_000),
                store.clone(),
                runtime.clone(),
            )
        })
        .collect()
}

#[tokio::test]
async fn test_loops_stop_before_store_closes() {
    let store = RecordingStore::new();
    let runtime = RuntimeRegistry::new();
    let loops = all_loops(&store, &runtime);
    store.watch(&loops);

    let supervisor = Supervisor::new(store.clone(), runtime, loops, options());
    supervisor.start().await;

    // one sample per loop, after which every loop is asleep
    assert!(wait_until(Duration::from_secs(2), || store.appended() == 4).await);

    let started = Instant::now();
    supervisor.coordinator().trigger("test");
    tokio::time::timeout(Duration::from_secs(2), supervisor.run_until_shutdown())
        .await
        .expect("teardown hung");

    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(store.closes(), 1);
    assert_eq!(store.states_at_close(), Some(vec![LoopState::Stopped; 4]));
}

#[tokio::test]
async fn test_concurrent_shutdown_closes_store_once() {
    let store = RecordingStore::new();
    let runtime = RuntimeRegistry::new();
    let loops = all_loops(&store, &runtime);

    let supervisor = Arc::new(Supervisor::new(store.clone(), runtime, loops, options()));
    supervisor.start().await;

    let first = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.shutdown().await })
    };
    let second = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.shutdown().await })
    };
    let third = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.run_until_shutdown().await })
    };

    first.await.unwrap();
    second.await.unwrap();
    third.await.unwrap();

    assert_eq!(store.closes(), 1);
    assert!(supervisor.coordinator().has_completed());
}

#[tokio::test]
async fn test_fatal_loop_brings_everything_down() {
    let store = RecordingStore::new();
    let runtime = RuntimeRegistry::new();

    let healthy = CollectorLoop::new(
        ProbeKind::Dns,
        StubExecutor::new(ProbeKind::Dns),
        &probe_config(&["example.com"], 3_600_000, 1_000),
        store.clone(),
        runtime.clone(),
    );
    // a ping loop wired to the wrong executor cannot run at all
    let broken = CollectorLoop::new(
        ProbeKind::Ping,
        StubExecutor::new(ProbeKind::Http),
        &probe_config(&["1.1.1.1"], 3_600_000, 1_000),
        store.clone(),
        runtime.clone(),
    );
    store.watch(&[healthy.clone(), broken.clone()]);

    let supervisor = Supervisor::new(store.clone(), runtime, vec![healthy, broken], options());
    supervisor.start().await;

    tokio::time::timeout(Duration::from_secs(2), supervisor.run_until_shutdown())
        .await
        .expect("fatal loop did not trigger shutdown");

    assert!(supervisor.coordinator().is_triggered());
    assert_eq!(store.closes(), 1);
    assert_eq!(
        store.states_at_close(),
        Some(vec![LoopState::Stopped, LoopState::Stopped])
    );
}

#[cfg(feature = "api")]
#[tokio::test]
async fn test_teardown_ends_open_connections_before_store_closes() {
    use std::collections::HashMap;

    use futures::StreamExt;
    use netwatch::{
        actors::collector::Collector,
        api::{ApiConfig, ApiState, spawn_api_server},
        metrics::{SnapshotBuilder, SnapshotConfig, WindowAggregator},
    };
    use tokio_tungstenite::tungstenite::Message;

    let grace = Duration::from_millis(200);
    let store = RecordingStore::new();
    let runtime = RuntimeRegistry::new();
    let executor = StubExecutor::new(ProbeKind::Ping);
    let ping = CollectorLoop::new(
        ProbeKind::Ping,
        executor.clone(),
        &probe_config(&["1.1.1.1"], 3_600_000, 30_000),
        store.clone(),
        runtime.clone(),
    );

    let supervisor = Supervisor::new(
        store.clone(),
        runtime.clone(),
        vec![ping.clone()],
        SupervisorOptions {
            shutdown_grace: grace,
            ..options()
        },
    );
    supervisor.start().await;

    let aggregator = WindowAggregator::new(store.clone(), false);
    let snapshots = SnapshotBuilder::new(
        aggregator.clone(),
        runtime,
        SnapshotConfig {
            ping_targets: vec!["1.1.1.1".to_string()],
            ..Default::default()
        },
    );
    let collectors: HashMap<ProbeKind, Arc<dyn Collector>> =
        HashMap::from([(ProbeKind::Ping, Arc::new(ping) as Arc<dyn Collector>)]);
    let state = ApiState::new(aggregator, snapshots, Duration::from_millis(50), collectors);
    let config = ApiConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        enable_cors: false,
    };
    let (addr, listener) = spawn_api_server(config, state, supervisor.coordinator().token())
        .await
        .unwrap();
    supervisor.attach_listener(listener).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/api/v1/live"))
        .await
        .unwrap();
    let first = tokio::time::timeout(Duration::from_secs(2), socket.next())
        .await
        .expect("no frame")
        .unwrap()
        .unwrap();
    assert!(matches!(first, Message::Text(_)));

    // a request whose executor never answers within the grace period
    let in_flight = tokio::spawn(async move {
        reqwest::Client::new()
            .post(format!("http://{addr}/api/v1/ping/run"))
            .json(&serde_json::json!({ "target": "hang.example" }))
            .send()
            .await
    });
    assert!(wait_until(Duration::from_secs(2), || executor.hanging() == 1).await);

    let started = Instant::now();
    tokio::time::timeout(Duration::from_secs(3), supervisor.shutdown())
        .await
        .expect("teardown hung");
    let took = started.elapsed();
    assert!(took >= grace, "teardown skipped the grace period: {took:?}");
    assert!(took < Duration::from_secs(1), "teardown took {took:?}");

    let answered = tokio::time::timeout(Duration::from_secs(1), in_flight)
        .await
        .expect("request still open after teardown")
        .unwrap();
    if let Ok(response) = answered {
        assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    }
    assert!(wait_until(Duration::from_secs(1), || executor.hanging() == 0).await);

    let closed = tokio::time::timeout(Duration::from_secs(1), async {
        while let Some(message) = socket.next().await {
            match message {
                Ok(Message::Close(_)) | Err(_) => return,
                Ok(_) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "live client was not closed");

    assert_eq!(store.closes(), 1);
    let closed_at = store.closed_at().unwrap();
    assert!(closed_at.duration_since(started) >= grace);
}
