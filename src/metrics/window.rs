//! Rolling window statistics
//!
//! Stats for a trailing window are computed at query time from one of two
//! sources:
//!
//! - **Bucket path**: complete per-minute buckets written by the rollup job.
//!   Loss and sample counts are summed, `avg_ms` and `p50_ms` are
//!   `received`-weighted means of the bucket values. p95 cannot be merged
//!   across buckets, so it is always recomputed from raw latencies.
//! - **Raw path**: everything derived directly from the raw samples.
//!
//! The bucket path is only taken for the primary latency field, when bucket
//! use is enabled, and when at least one complete bucket falls in range.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::percentile::{clean_sorted, loss_pct, mean, percentile_sorted, stdev};
use crate::ProbeKind;
use crate::storage::{BucketQuery, Sample, SampleQuery, SampleStore, StorageResult, WindowBucket};
use crate::util::align_to_minute;

pub const WINDOW_1M: Duration = Duration::from_secs(60);
pub const WINDOW_5M: Duration = Duration::from_secs(5 * 60);
pub const WINDOW_1H: Duration = Duration::from_secs(60 * 60);

/// Statistics over one trailing window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowStats {
    pub avg_ms: Option<f64>,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub loss_pct: Option<f64>,
    pub samples: u64,
}

impl WindowStats {
    /// All-null stats with zero samples
    pub fn empty() -> Self {
        Self::default()
    }
}

/// The 1 minute, 5 minute and 1 hour windows together
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowSet {
    pub win1m: WindowStats,
    pub win5m: WindowStats,
    pub win1h: WindowStats,
}

/// Which timing column a window summarizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyField {
    /// The primary timing of the probe
    Latency,

    /// HTTP time to first byte
    Ttfb,
}

impl LatencyField {
    pub fn value(&self, sample: &Sample) -> Option<f64> {
        match self {
            LatencyField::Latency => sample.latency_ms,
            LatencyField::Ttfb => sample.ttfb_ms,
        }
    }
}

/// How recent the newest known sample of a target is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Freshness {
    pub age_ms: Option<i64>,
    pub fresh: bool,
}

/// Freshness from the collector's in-memory view and the store's view
///
/// Whichever of the two timestamps is newer wins.
pub fn freshness(
    runtime_ts: Option<i64>,
    stored_ts: Option<i64>,
    now: i64,
    stale_threshold_ms: i64,
) -> Freshness {
    match runtime_ts.max(stored_ts) {
        Some(last) => {
            let age = now - last;
            Freshness {
                age_ms: Some(age),
                fresh: age <= stale_threshold_ms,
            }
        }
        None => Freshness {
            age_ms: None,
            fresh: false,
        },
    }
}

/// Stats computed directly from raw samples
pub fn raw_stats(samples: &[Sample], field: LatencyField) -> WindowStats {
    if samples.is_empty() {
        return WindowStats::empty();
    }

    let total = samples.len() as u64;
    let ok = samples.iter().filter(|s| s.success).count() as u64;
    let latencies = successful_latencies(samples, field);

    WindowStats {
        avg_ms: mean(&latencies),
        p50_ms: percentile_sorted(&latencies, 0.50),
        p95_ms: percentile_sorted(&latencies, 0.95),
        loss_pct: loss_pct(total, ok),
        samples: total,
    }
}

/// Stats from complete buckets, with p95 taken from the raw samples
pub fn bucket_stats(buckets: &[WindowBucket], raw: &[Sample]) -> WindowStats {
    let sent: u64 = buckets.iter().map(|b| b.sent).sum();
    let received: u64 = buckets.iter().map(|b| b.received).sum();
    let latencies = successful_latencies(raw, LatencyField::Latency);

    WindowStats {
        avg_ms: weighted_mean(buckets, |b| b.avg_ms),
        p50_ms: weighted_mean(buckets, |b| b.p50_ms),
        p95_ms: percentile_sorted(&latencies, 0.95),
        loss_pct: loss_pct(sent, received),
        samples: sent,
    }
}

/// Summarize the samples of one minute into a bucket
pub fn summarize_minute(
    probe: ProbeKind,
    key: &str,
    ts_min: i64,
    samples: &[Sample],
    complete: bool,
) -> WindowBucket {
    let sent = samples.len() as u64;
    let received = samples.iter().filter(|s| s.success).count() as u64;
    let latencies = successful_latencies(samples, LatencyField::Latency);

    WindowBucket {
        probe,
        key: key.to_string(),
        ts_min,
        sent,
        received,
        loss_pct: loss_pct(sent, received),
        avg_ms: mean(&latencies),
        p50_ms: percentile_sorted(&latencies, 0.50),
        p95_ms: percentile_sorted(&latencies, 0.95),
        stdev_ms: stdev(&latencies),
        complete,
    }
}

fn successful_latencies(samples: &[Sample], field: LatencyField) -> Vec<f64> {
    clean_sorted(
        samples
            .iter()
            .filter(|s| s.success)
            .filter_map(|s| field.value(s)),
    )
}

fn weighted_mean(buckets: &[WindowBucket], value: impl Fn(&WindowBucket) -> Option<f64>) -> Option<f64> {
    let (sum, weight) = buckets
        .iter()
        .filter(|b| b.received > 0)
        .filter_map(|b| {
            value(b)
                .filter(|v| v.is_finite() && *v >= 0.0)
                .map(|v| (v * b.received as f64, b.received))
        })
        .fold((0.0, 0u64), |(sum, weight), (v, w)| (sum + v, weight + w));

    (weight > 0).then(|| sum / weight as f64)
}

/// Computes window stats against the shared sample store
#[derive(Clone)]
pub struct WindowAggregator {
    store: Arc<dyn SampleStore>,
    use_buckets: bool,
}

impl WindowAggregator {
    pub fn new(store: Arc<dyn SampleStore>, use_buckets: bool) -> Self {
        Self { store, use_buckets }
    }

    pub fn store(&self) -> &Arc<dyn SampleStore> {
        &self.store
    }

    /// Stats for the window `(now - duration, now]`
    ///
    /// Without a key, all targets of the probe are combined.
    #[instrument(skip(self), level = "trace")]
    pub async fn window_stats(
        &self,
        probe: ProbeKind,
        key: Option<&str>,
        field: LatencyField,
        duration: Duration,
        now: i64,
    ) -> StorageResult<WindowStats> {
        let duration_ms = duration.as_millis() as i64;

        let raw = self
            .store
            .query_samples(SampleQuery {
                probe,
                key: key.map(str::to_string),
                from_ts: now - duration_ms + 1,
                to_ts: now,
                limit: None,
            })
            .await?;

        if self.use_buckets && field == LatencyField::Latency {
            let complete: Vec<WindowBucket> = self
                .store
                .query_buckets(BucketQuery {
                    probe,
                    key: key.map(str::to_string),
                    from_ts_min: align_to_minute(now - duration_ms),
                    to_ts: now,
                })
                .await?
                .into_iter()
                .filter(|b| b.complete)
                .collect();

            if !complete.is_empty() {
                return Ok(bucket_stats(&complete, &raw));
            }
        }

        Ok(raw_stats(&raw, field))
    }

    /// 1 minute, 5 minute and 1 hour stats in one go
    pub async fn window_set(
        &self,
        probe: ProbeKind,
        key: Option<&str>,
        field: LatencyField,
        now: i64,
    ) -> StorageResult<WindowSet> {
        Ok(WindowSet {
            win1m: self.window_stats(probe, key, field, WINDOW_1M, now).await?,
            win5m: self.window_stats(probe, key, field, WINDOW_5M, now).await?,
            win1h: self.window_stats(probe, key, field, WINDOW_1H, now).await?,
        })
    }
}
