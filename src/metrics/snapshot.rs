//! Live snapshot payload
//!
//! One `Snapshot` is built per broadcaster tick and serialized once for all
//! subscribers. The field names are part of the dashboard contract; bump
//! [`SNAPSHOT_VERSION`] when the shape changes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::window::{LatencyField, WindowAggregator, WindowSet, WindowStats, freshness};
use crate::ProbeKind;
use crate::actors::runtime::RuntimeRegistry;
use crate::storage::StorageResult;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub v: u32,
    pub ts: i64,
    pub ping: BTreeMap<String, PingTarget>,
    pub dns: DnsSection,
    pub http: HttpSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingTarget {
    #[serde(rename = "lastSample")]
    pub last_sample: LastSample,
    pub win1m: WindowStats,
    pub win5m: WindowStats,
    pub win1h: WindowStats,
    pub fresh: bool,
    pub age_ms: Option<i64>,
    pub state: TargetState,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LastSample {
    pub rtt_ms: Option<f64>,
    /// 1 if the last probe succeeded, else 0
    pub up: u8,
    pub ts: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetState {
    #[serde(rename = "consecutiveFailures")]
    pub consecutive_failures: u32,
    #[serde(rename = "consecutiveSuccesses")]
    pub consecutive_successes: u32,
}

/// Condensed stats across all targets of a probe type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub last_ms: Option<f64>,
    pub win1m_avg_ms: Option<f64>,
    pub win5m_avg_ms: Option<f64>,
    pub win1h_avg_ms: Option<f64>,
    /// Sample count of the 1 minute window
    pub samples: u64,
}

impl AggregateStats {
    fn from_windows(last_ms: Option<f64>, windows: &WindowSet) -> Self {
        Self {
            last_ms,
            win1m_avg_ms: windows.win1m.avg_ms,
            win5m_avg_ms: windows.win5m.avg_ms,
            win1h_avg_ms: windows.win1h.avg_ms,
            samples: windows.win1m.samples,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DnsSection {
    pub aggregate: AggregateStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpSection {
    pub aggregate: HttpAggregate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpAggregate {
    pub ttfb: AggregateStats,
    pub total: AggregateStats,
}

impl PingTarget {
    fn empty() -> Self {
        Self {
            last_sample: LastSample::default(),
            win1m: WindowStats::empty(),
            win5m: WindowStats::empty(),
            win1h: WindowStats::empty(),
            fresh: false,
            age_ms: None,
            state: TargetState::default(),
        }
    }
}

impl Snapshot {
    /// Same structure as a real snapshot with every value null or zero
    ///
    /// Delivered in place of a snapshot that could not be built, so
    /// subscribers always receive the shape they expect.
    pub fn empty(ts: i64, ping_targets: &[String]) -> Self {
        Self {
            v: SNAPSHOT_VERSION,
            ts,
            ping: ping_targets
                .iter()
                .map(|target| (target.clone(), PingTarget::empty()))
                .collect(),
            dns: DnsSection::default(),
            http: HttpSection::default(),
        }
    }
}

/// What the builder reports on
#[derive(Debug, Clone, Default)]
pub struct SnapshotConfig {
    pub ping_targets: Vec<String>,
    pub dns_enabled: bool,
    pub http_enabled: bool,
    pub stale_threshold_ms: i64,
}

/// Assembles snapshots from the window aggregator and runtime counters
#[derive(Clone)]
pub struct SnapshotBuilder {
    aggregator: WindowAggregator,
    runtime: RuntimeRegistry,
    config: SnapshotConfig,
}

impl SnapshotBuilder {
    pub fn new(aggregator: WindowAggregator, runtime: RuntimeRegistry, config: SnapshotConfig) -> Self {
        Self {
            aggregator,
            runtime,
            config,
        }
    }

    pub fn ping_targets(&self) -> &[String] {
        &self.config.ping_targets
    }

    /// Build the snapshot, or the empty one if the store cannot be read
    pub async fn build_or_empty(&self, now: i64) -> Snapshot {
        match self.build(now).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!("Failed to build snapshot, sending empty one: {}", e);
                Snapshot::empty(now, &self.config.ping_targets)
            }
        }
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn build(&self, now: i64) -> StorageResult<Snapshot> {
        let mut ping = BTreeMap::new();
        for target in &self.config.ping_targets {
            ping.insert(target.clone(), self.ping_target(target, now).await?);
        }

        let dns = if self.config.dns_enabled {
            DnsSection {
                aggregate: self.aggregate(ProbeKind::Dns, LatencyField::Latency, now).await?,
            }
        } else {
            DnsSection::default()
        };

        let http = if self.config.http_enabled {
            HttpSection {
                aggregate: HttpAggregate {
                    ttfb: self.aggregate(ProbeKind::Http, LatencyField::Ttfb, now).await?,
                    total: self.aggregate(ProbeKind::Http, LatencyField::Latency, now).await?,
                },
            }
        } else {
            HttpSection::default()
        };

        Ok(Snapshot {
            v: SNAPSHOT_VERSION,
            ts: now,
            ping,
            dns,
            http,
        })
    }

    async fn ping_target(&self, target: &str, now: i64) -> StorageResult<PingTarget> {
        let windows = self
            .aggregator
            .window_set(ProbeKind::Ping, Some(target), LatencyField::Latency, now)
            .await?;
        let stored = self
            .aggregator
            .store()
            .latest_sample(ProbeKind::Ping, Some(target))
            .await?;
        let runtime = self.runtime.get(ProbeKind::Ping, target).await.unwrap_or_default();

        let fresh = freshness(
            runtime.last_sample_ts,
            stored.as_ref().map(|s| s.ts),
            now,
            self.config.stale_threshold_ms,
        );

        let last_sample = stored
            .map(|s| LastSample {
                rtt_ms: s.latency_ms,
                up: u8::from(s.success),
                ts: Some(s.ts),
            })
            .unwrap_or_default();

        Ok(PingTarget {
            last_sample,
            win1m: windows.win1m,
            win5m: windows.win5m,
            win1h: windows.win1h,
            fresh: fresh.fresh,
            age_ms: fresh.age_ms,
            state: TargetState {
                consecutive_failures: runtime.consecutive_failures,
                consecutive_successes: runtime.consecutive_successes,
            },
        })
    }

    async fn aggregate(&self, probe: ProbeKind, field: LatencyField, now: i64) -> StorageResult<AggregateStats> {
        let windows = self.aggregator.window_set(probe, None, field, now).await?;
        let last = self.aggregator.store().latest_sample(probe, None).await?;
        let last_ms = last.as_ref().and_then(|s| field.value(s));

        Ok(AggregateStats::from_windows(last_ms, &windows))
    }
}
