//! Sample store trait definition
//!
//! This module defines the `SampleStore` trait that all storage
//! implementations must implement.

use async_trait::async_trait;

use super::error::StorageResult;
use super::schema::{Sample, WindowBucket};
use crate::ProbeKind;

/// Query parameters for raw samples
///
/// Both bounds are inclusive. Omitting the key returns all keys of the probe.
#[derive(Debug, Clone)]
pub struct SampleQuery {
    pub probe: ProbeKind,
    pub key: Option<String>,

    /// Start of the range (epoch ms, inclusive)
    pub from_ts: i64,

    /// End of the range (epoch ms, inclusive)
    pub to_ts: i64,

    /// Maximum number of results to return
    pub limit: Option<usize>,
}

/// Query parameters for window buckets
#[derive(Debug, Clone)]
pub struct BucketQuery {
    pub probe: ProbeKind,
    pub key: Option<String>,

    /// First minute to include (epoch ms, minute aligned, inclusive)
    pub from_ts_min: i64,

    /// Last timestamp to include (epoch ms, inclusive)
    pub to_ts: i64,
}

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: std::collections::HashMap<String, String>,
}

/// Trait for sample stores
///
/// The store is shared between the collector loops (writes), the window
/// aggregator and the query endpoints (reads). Writes are append-only, so
/// implementations only have to make each batch atomic.
#[async_trait]
pub trait SampleStore: Send + Sync {
    /// Append one collector cycle's samples atomically
    ///
    /// Returns the ids assigned to the samples, in input order.
    async fn append_samples(&self, samples: Vec<Sample>) -> StorageResult<Vec<i64>>;

    /// Raw samples in `[from_ts, to_ts]`, ordered by timestamp (oldest first)
    async fn query_samples(&self, query: SampleQuery) -> StorageResult<Vec<Sample>>;

    /// Window buckets in `[from_ts_min, to_ts]`, ordered by minute
    async fn query_buckets(&self, query: BucketQuery) -> StorageResult<Vec<WindowBucket>>;

    /// The most recent sample for a probe (and key, if given)
    async fn latest_sample(
        &self,
        probe: ProbeKind,
        key: Option<&str>,
    ) -> StorageResult<Option<Sample>>;

    /// Insert or replace buckets, keyed by `(probe, key, ts_min)`
    async fn upsert_buckets(&self, buckets: Vec<WindowBucket>) -> StorageResult<()>;

    /// Check backend health
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
