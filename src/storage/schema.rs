//! Sample and bucket row definitions
//!
//! ## Samples
//!
//! One row per probe execution. All probe types share the same row shape:
//! `latency_ms` carries the primary timing of the probe (ping RTT, DNS
//! resolution time, HTTP total time, traceroute duration) and the remaining
//! columns are filled only by the probe types that produce them.
//!
//! ## Window buckets
//!
//! Pre-aggregated per-minute summaries of `latency_ms`, written by the rollup
//! job and only ever read by the window aggregator. A bucket is unique per
//! `(probe, key, ts_min)`.

use serde::{Deserialize, Serialize};

use crate::ProbeKind;

/// A single probe result
///
/// Samples are immutable once written. A failure sample has
/// `success == false` and no timing fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Row id assigned by the store on append
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// When the probe was started (epoch milliseconds)
    pub ts: i64,

    pub probe: ProbeKind,

    /// Target identifier (host, domain or URL)
    pub key: String,

    pub success: bool,

    /// Primary timing of the probe
    pub latency_ms: Option<f64>,

    /// Time to first byte (HTTP only)
    pub ttfb_ms: Option<f64>,

    /// Response status code (HTTP only)
    pub status_code: Option<u16>,

    /// Number of hops (traceroute only)
    pub hops: Option<u32>,

    /// Short description of why the probe failed
    pub error: Option<String>,
}

impl Sample {
    pub fn success(probe: ProbeKind, key: impl Into<String>, ts: i64, latency_ms: f64) -> Self {
        Self {
            id: None,
            ts,
            probe,
            key: key.into(),
            success: true,
            latency_ms: Some(latency_ms),
            ttfb_ms: None,
            status_code: None,
            hops: None,
            error: None,
        }
    }

    pub fn failure(
        probe: ProbeKind,
        key: impl Into<String>,
        ts: i64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            ts,
            probe,
            key: key.into(),
            success: false,
            latency_ms: None,
            ttfb_ms: None,
            status_code: None,
            hops: None,
            error: Some(error.into()),
        }
    }

    pub fn with_ttfb(mut self, ttfb_ms: f64) -> Self {
        self.ttfb_ms = Some(ttfb_ms);
        self
    }

    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_hops(mut self, hops: u32) -> Self {
        self.hops = Some(hops);
        self
    }
}

/// Pre-aggregated minute summary for one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowBucket {
    pub probe: ProbeKind,
    pub key: String,

    /// Start of the minute (epoch milliseconds, minute aligned)
    pub ts_min: i64,

    /// Probes executed in this minute
    pub sent: u64,

    /// Successful probes in this minute
    pub received: u64,

    pub loss_pct: Option<f64>,
    pub avg_ms: Option<f64>,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub stdev_ms: Option<f64>,

    /// Set once the minute has closed and every sample of it was folded in
    ///
    /// The aggregator only takes the bucket path for complete buckets, so a
    /// lagging rollup is never mistaken for a minute without traffic.
    pub complete: bool,
}
