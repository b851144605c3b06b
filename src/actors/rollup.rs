//! Minute bucket rollup
//!
//! Periodically folds raw samples into per-minute `WindowBucket`s. A minute
//! is written as complete once it has closed and enough time has passed for
//! the collector batches that started in it to land (`settle`). The minute
//! still in progress is written too, marked incomplete, so the aggregator
//! never treats it as authoritative.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::ProbeKind;
use crate::metrics::window::summarize_minute;
use crate::storage::{Sample, SampleQuery, SampleStore, StorageResult};
use crate::util::{align_to_minute, now_ms};

/// How far back the first pass looks
pub const INITIAL_LOOKBACK_MS: i64 = 60 * 60 * 1000;

pub struct RollupJob {
    store: Arc<dyn SampleStore>,
    probes: Vec<ProbeKind>,
    interval: Duration,
    settle: Duration,

    /// First minute that has not been written as complete yet
    cursor: i64,
}

impl RollupJob {
    pub fn new(
        store: Arc<dyn SampleStore>,
        probes: Vec<ProbeKind>,
        interval: Duration,
        settle: Duration,
    ) -> Self {
        Self {
            store,
            probes,
            interval,
            settle,
            cursor: align_to_minute(now_ms() - INITIAL_LOOKBACK_MS),
        }
    }

    /// Run until `token` is cancelled
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(token))
    }

    #[instrument(skip_all, fields(probes = self.probes.len()))]
    async fn run(mut self, token: CancellationToken) {
        debug!("starting rollup job");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once(now_ms()).await {
                        warn!("rollup pass failed: {e}");
                    }
                }
            }
        }

        debug!("rollup job stopped");
    }

    /// One pass over everything since the cursor
    ///
    /// Returns the number of complete buckets written.
    pub async fn run_once(&mut self, now: i64) -> StorageResult<usize> {
        let settle_ms = self.settle.as_millis() as i64;
        let closed_before = align_to_minute(now - settle_ms);
        let mut complete = 0;

        for probe in &self.probes {
            let samples = self
                .store
                .query_samples(SampleQuery {
                    probe: *probe,
                    key: None,
                    from_ts: self.cursor,
                    to_ts: now,
                    limit: None,
                })
                .await?;

            let mut minutes: BTreeMap<(String, i64), Vec<Sample>> = BTreeMap::new();
            for sample in samples {
                minutes
                    .entry((sample.key.clone(), align_to_minute(sample.ts)))
                    .or_default()
                    .push(sample);
            }

            let buckets: Vec<_> = minutes
                .iter()
                .map(|((key, ts_min), samples)| {
                    summarize_minute(*probe, key, *ts_min, samples, *ts_min < closed_before)
                })
                .collect();

            complete += buckets.iter().filter(|b| b.complete).count();
            if !buckets.is_empty() {
                self.store.upsert_buckets(buckets).await?;
            }
        }

        self.cursor = self.cursor.max(closed_before);
        debug!("rollup wrote {complete} complete buckets");
        Ok(complete)
    }
}
