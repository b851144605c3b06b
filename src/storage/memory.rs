//! In-memory sample store (no persistence)
//!
//! Useful for tests and for running the agent without a database file.
//! All data is lost on restart and nothing is ever evicted, so this backend
//! is not meant for long-running deployments.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use super::backend::{BucketQuery, HealthStatus, SampleQuery, SampleStore};
use super::error::{StorageError, StorageResult};
use super::schema::{Sample, WindowBucket};
use crate::ProbeKind;

type BucketKey = (ProbeKind, String, i64);

#[derive(Default)]
struct Inner {
    samples: Vec<Sample>,
    buckets: BTreeMap<BucketKey, WindowBucket>,
    next_id: i64,
}

/// In-memory sample store
#[derive(Default)]
pub struct MemoryBackend {
    inner: RwLock<Inner>,
    closed: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.is_closed() {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl SampleStore for MemoryBackend {
    async fn append_samples(&self, samples: Vec<Sample>) -> StorageResult<Vec<i64>> {
        self.ensure_open()?;

        let mut inner = self.inner.write().await;
        let mut ids = Vec::with_capacity(samples.len());

        for mut sample in samples {
            inner.next_id += 1;
            sample.id = Some(inner.next_id);
            ids.push(inner.next_id);
            inner.samples.push(sample);
        }

        trace!("in-memory backend: appended {} samples", ids.len());
        Ok(ids)
    }

    async fn query_samples(&self, query: SampleQuery) -> StorageResult<Vec<Sample>> {
        self.ensure_open()?;

        let inner = self.inner.read().await;
        let mut samples: Vec<Sample> = inner
            .samples
            .iter()
            .filter(|s| s.probe == query.probe)
            .filter(|s| query.key.as_ref().is_none_or(|k| &s.key == k))
            .filter(|s| s.ts >= query.from_ts && s.ts <= query.to_ts)
            .cloned()
            .collect();

        // stable: samples with equal timestamps keep insertion order
        samples.sort_by_key(|s| s.ts);
        samples.truncate(query.limit.unwrap_or(usize::MAX));

        Ok(samples)
    }

    async fn query_buckets(&self, query: BucketQuery) -> StorageResult<Vec<WindowBucket>> {
        self.ensure_open()?;

        let inner = self.inner.read().await;
        let mut buckets: Vec<WindowBucket> = inner
            .buckets
            .values()
            .filter(|b| b.probe == query.probe)
            .filter(|b| query.key.as_ref().is_none_or(|k| &b.key == k))
            .filter(|b| b.ts_min >= query.from_ts_min && b.ts_min <= query.to_ts)
            .cloned()
            .collect();

        buckets.sort_by_key(|b| b.ts_min);
        Ok(buckets)
    }

    async fn latest_sample(
        &self,
        probe: ProbeKind,
        key: Option<&str>,
    ) -> StorageResult<Option<Sample>> {
        self.ensure_open()?;

        let inner = self.inner.read().await;
        let latest = inner
            .samples
            .iter()
            .filter(|s| s.probe == probe)
            .filter(|s| key.is_none_or(|k| s.key == k))
            .max_by_key(|s| (s.ts, s.id))
            .cloned();

        Ok(latest)
    }

    async fn upsert_buckets(&self, buckets: Vec<WindowBucket>) -> StorageResult<()> {
        self.ensure_open()?;

        let mut inner = self.inner.write().await;
        for bucket in buckets {
            inner
                .buckets
                .insert((bucket.probe, bucket.key.clone(), bucket.ts_min), bucket);
        }

        Ok(())
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let inner = self.inner.read().await;

        Ok(HealthStatus {
            healthy: !self.is_closed(),
            message: if self.is_closed() {
                "In-memory storage closed".to_string()
            } else {
                "In-memory storage operational".to_string()
            },
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("samples".to_string(), inner.samples.len().to_string()),
                ("buckets".to_string(), inner.buckets.len().to_string()),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend");
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
