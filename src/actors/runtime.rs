//! Per-target runtime counters kept by the collector loops
//!
//! Each `(probe, key)` entry is written only by the loop that owns the probe
//! type. The snapshot builder reads it to report consecutive
//! failures/successes and to compute freshness without a store round-trip.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::ProbeKind;

/// Consecutive failures after which a target is reported as degraded
pub const DEGRADED_AFTER_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeMode {
    #[default]
    Normal,
    Degraded,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetRuntime {
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_sample_ts: Option<i64>,
    pub mode: RuntimeMode,
}

impl TargetRuntime {
    pub fn record(&mut self, success: bool, ts: i64) {
        if success {
            self.consecutive_successes += 1;
            self.consecutive_failures = 0;
            self.mode = RuntimeMode::Normal;
        } else {
            self.consecutive_failures += 1;
            self.consecutive_successes = 0;
            if self.consecutive_failures >= DEGRADED_AFTER_FAILURES {
                self.mode = RuntimeMode::Degraded;
            }
        }
        self.last_sample_ts = self.last_sample_ts.max(Some(ts));
    }
}

/// Shared map of runtime counters
#[derive(Clone, Default)]
pub struct RuntimeRegistry {
    inner: Arc<RwLock<HashMap<(ProbeKind, String), TargetRuntime>>>,
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one cycle's results for a probe type
    pub async fn record_all(&self, probe: ProbeKind, results: impl IntoIterator<Item = (String, bool, i64)>) {
        let mut inner = self.inner.write().await;
        for (key, success, ts) in results {
            inner.entry((probe, key)).or_default().record(success, ts);
        }
    }

    pub async fn get(&self, probe: ProbeKind, key: &str) -> Option<TargetRuntime> {
        self.inner.read().await.get(&(probe, key.to_string())).cloned()
    }

    /// All targets of one probe type
    pub async fn for_probe(&self, probe: ProbeKind) -> HashMap<String, TargetRuntime> {
        self.inner
            .read()
            .await
            .iter()
            .filter(|((p, _), _)| *p == probe)
            .map(|((_, key), runtime)| (key.clone(), runtime.clone()))
            .collect()
    }
}
