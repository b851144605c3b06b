//! Append and range queries against each backend

use std::sync::Arc;

use netwatch::{
    ProbeKind,
    storage::{MemoryBackend, Sample, SampleQuery, SampleStore},
};
use pretty_assertions::assert_eq;

use crate::helpers::NOW;

const COUNT: i64 = 100;

/// `COUNT` samples for two targets, appended out of timestamp order
fn shuffled_samples() -> Vec<Sample> {
    (0..COUNT)
        .map(|i| (i * 37) % COUNT)
        .map(|i| {
            let key = if i % 2 == 0 { "a.example" } else { "b.example" };
            let ts = NOW + i * 1_000;
            if i % 10 == 0 {
                Sample::failure(ProbeKind::Http, key, ts, "connection refused").with_status_code(503)
            } else {
                Sample::success(ProbeKind::Http, key, ts, i as f64)
                    .with_ttfb(i as f64 / 2.0)
                    .with_status_code(200)
            }
        })
        .collect()
}

async fn assert_round_trip(store: Arc<dyn SampleStore>) {
    let ids = store.append_samples(shuffled_samples()).await.unwrap();
    assert_eq!(ids.len(), COUNT as usize);

    let all = store
        .query_samples(SampleQuery {
            probe: ProbeKind::Http,
            key: None,
            from_ts: NOW,
            to_ts: NOW + (COUNT - 1) * 1_000,
            limit: None,
        })
        .await
        .unwrap();

    assert_eq!(all.len(), COUNT as usize);
    assert!(all.windows(2).all(|w| w[0].ts <= w[1].ts));
    assert!(all.iter().all(|s| s.id.is_some()));

    let first = &all[0];
    assert!(!first.success);
    assert_eq!(first.latency_ms, None);
    assert_eq!(first.status_code, Some(503));
    assert_eq!(first.error.as_deref(), Some("connection refused"));

    let second = &all[1];
    assert!(second.success);
    assert_eq!(second.latency_ms, Some(1.0));
    assert_eq!(second.ttfb_ms, Some(0.5));

    let only_a = store
        .query_samples(SampleQuery {
            probe: ProbeKind::Http,
            key: Some("a.example".to_string()),
            from_ts: NOW,
            to_ts: NOW + 9_000,
            limit: None,
        })
        .await
        .unwrap();
    let ts: Vec<i64> = only_a.iter().map(|s| s.ts - NOW).collect();
    assert_eq!(ts, vec![0, 2_000, 4_000, 6_000, 8_000]);

    let other_probe = store
        .query_samples(SampleQuery {
            probe: ProbeKind::Ping,
            key: None,
            from_ts: 0,
            to_ts: i64::MAX,
            limit: None,
        })
        .await
        .unwrap();
    assert!(other_probe.is_empty());

    let latest = store
        .latest_sample(ProbeKind::Http, Some("b.example"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.ts, NOW + (COUNT - 1) * 1_000);

    store.close().await.unwrap();
}

#[tokio::test]
async fn test_memory_round_trip() {
    assert_round_trip(Arc::new(MemoryBackend::new())).await;
}

#[cfg(feature = "storage-sqlite")]
#[tokio::test]
async fn test_sqlite_round_trip() {
    use netwatch::storage::sqlite::SqliteBackend;

    let dir = tempfile::tempdir().unwrap();
    let store = SqliteBackend::new(dir.path().join("netwatch.db")).await.unwrap();

    assert_round_trip(Arc::new(store)).await;
}

#[cfg(feature = "storage-sqlite")]
#[tokio::test]
async fn test_sqlite_survives_reopen() {
    use netwatch::storage::sqlite::SqliteBackend;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("netwatch.db");

    let store = SqliteBackend::new(&path).await.unwrap();
    store
        .append_samples(vec![Sample::success(ProbeKind::Dns, "example.com", NOW, 3.25)])
        .await
        .unwrap();
    store.close().await.unwrap();

    let reopened = SqliteBackend::new(&path).await.unwrap();
    let latest = reopened
        .latest_sample(ProbeKind::Dns, Some("example.com"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(latest.latency_ms, Some(3.25));
    assert_eq!(latest.ts, NOW);
}
