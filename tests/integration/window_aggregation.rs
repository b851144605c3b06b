//! Window statistics over stored samples

use std::sync::Arc;
use std::time::Duration;

use netwatch::{
    ProbeKind,
    actors::rollup::RollupJob,
    metrics::{LatencyField, WindowAggregator, window::WINDOW_1M, window::WINDOW_5M},
    storage::{MemoryBackend, Sample, SampleStore},
    util::{align_to_minute, now_ms},
};
use pretty_assertions::assert_eq;

use crate::helpers::NOW;

const TARGET: &str = "8.8.8.8";
const FAILED: [i64; 3] = [5, 25, 45];

fn latency(i: i64) -> f64 {
    10.0 + (i * 7 % 23) as f64
}

/// 60 samples one second apart ending at `NOW`, three of them failures
fn one_minute_of_pings() -> Vec<Sample> {
    (0..60)
        .map(|i| {
            let ts = NOW - 59_000 + i * 1_000;
            if FAILED.contains(&i) {
                Sample::failure(ProbeKind::Ping, TARGET, ts, "timeout")
            } else {
                Sample::success(ProbeKind::Ping, TARGET, ts, latency(i))
            }
        })
        .collect()
}

/// Linear-interpolated percentile, computed by hand
fn expected_percentile(mut values: Vec<f64>, p: f64) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let rank = p * (values.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    values[lo] + (values[hi] - values[lo]) * (rank - lo as f64)
}

fn successful_latencies() -> Vec<f64> {
    (0..60)
        .filter(|i| !FAILED.contains(i))
        .map(latency)
        .collect()
}

#[tokio::test]
async fn test_one_minute_window_with_three_failures() {
    let store = Arc::new(MemoryBackend::new());
    store.append_samples(one_minute_of_pings()).await.unwrap();

    let aggregator = WindowAggregator::new(store, false);
    let stats = aggregator
        .window_stats(ProbeKind::Ping, Some(TARGET), LatencyField::Latency, WINDOW_1M, NOW)
        .await
        .unwrap();

    let ok = successful_latencies();
    assert_eq!(ok.len(), 57);

    assert_eq!(stats.samples, 60);
    assert!((stats.loss_pct.unwrap() - 5.0).abs() < 1e-9);

    let p95 = stats.p95_ms.unwrap();
    assert!((p95 - expected_percentile(ok.clone(), 0.95)).abs() < 1e-9);

    let p50 = stats.p50_ms.unwrap();
    assert!((p50 - expected_percentile(ok.clone(), 0.50)).abs() < 1e-9);

    let avg = stats.avg_ms.unwrap();
    assert!((avg - ok.iter().sum::<f64>() / 57.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_left_edge_sample_leaves_one_minute_window() {
    let store = Arc::new(MemoryBackend::new());
    store.append_samples(one_minute_of_pings()).await.unwrap();

    let aggregator = WindowAggregator::new(store, false);
    // one second later the oldest sample sits exactly on the excluded edge
    let stats = aggregator
        .window_stats(
            ProbeKind::Ping,
            Some(TARGET),
            LatencyField::Latency,
            WINDOW_1M,
            NOW + 1_000,
        )
        .await
        .unwrap();

    assert_eq!(stats.samples, 59);
}

#[tokio::test]
async fn test_bucket_setting_without_buckets_matches_raw() {
    let store = Arc::new(MemoryBackend::new());
    store.append_samples(one_minute_of_pings()).await.unwrap();

    let raw = WindowAggregator::new(store.clone(), false)
        .window_set(ProbeKind::Ping, Some(TARGET), LatencyField::Latency, NOW)
        .await
        .unwrap();
    let bucketed = WindowAggregator::new(store, true)
        .window_set(ProbeKind::Ping, Some(TARGET), LatencyField::Latency, NOW)
        .await
        .unwrap();

    assert_eq!(raw, bucketed);
}

#[tokio::test]
async fn test_empty_window_reports_nulls() {
    let aggregator = WindowAggregator::new(Arc::new(MemoryBackend::new()), false);

    let stats = aggregator
        .window_stats(ProbeKind::Dns, None, LatencyField::Latency, WINDOW_5M, NOW)
        .await
        .unwrap();

    assert_eq!(stats.samples, 0);
    assert_eq!(stats.loss_pct, None);
    assert_eq!(stats.avg_ms, None);
    assert_eq!(stats.p95_ms, None);
}

#[tokio::test]
async fn test_rolled_up_buckets_agree_with_raw_samples() {
    const MINUTE: i64 = 60_000;

    let store = Arc::new(MemoryBackend::new());
    let current = align_to_minute(now_ms());
    let now = current + 30_000;

    // three closed minutes, ten samples each, one failure per minute
    let samples: Vec<Sample> = (1..=3)
        .flat_map(|m| {
            let minute = current - m * MINUTE;
            (0..10).map(move |k| {
                let ts = minute + k * 5_000;
                if k == 0 {
                    Sample::failure(ProbeKind::Ping, TARGET, ts, "timeout")
                } else {
                    Sample::success(ProbeKind::Ping, TARGET, ts, 20.0)
                }
            })
        })
        .collect();
    store.append_samples(samples).await.unwrap();

    let mut rollup = RollupJob::new(
        store.clone(),
        vec![ProbeKind::Ping],
        Duration::from_secs(30),
        Duration::from_secs(5),
    );
    assert_eq!(rollup.run_once(now).await.unwrap(), 3);

    let raw = WindowAggregator::new(store.clone(), false)
        .window_stats(ProbeKind::Ping, Some(TARGET), LatencyField::Latency, WINDOW_5M, now)
        .await
        .unwrap();
    let bucketed = WindowAggregator::new(store, true)
        .window_stats(ProbeKind::Ping, Some(TARGET), LatencyField::Latency, WINDOW_5M, now)
        .await
        .unwrap();

    assert_eq!(raw.samples, 30);
    assert_eq!(bucketed.samples, raw.samples);
    assert_eq!(bucketed.avg_ms, Some(20.0));
    assert_eq!(bucketed.p95_ms, Some(20.0));
    assert!((bucketed.loss_pct.unwrap() - 10.0).abs() < 1e-9);
    assert!((raw.loss_pct.unwrap() - 10.0).abs() < 1e-9);
}
