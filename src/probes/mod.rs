//! Probe executors
//!
//! A probe executor performs exactly one network operation against one
//! target and reports how it went. Executors know nothing about scheduling,
//! timeouts racing or persistence; the collector loop owns all of that.
//!
//! | Probe | Executor | Mechanism |
//! |---|---|---|
//! | ping | [`ping::PingExecutor`] | `ping` subprocess |
//! | dns | [`dns::DnsExecutor`] | system resolver |
//! | http | [`http::HttpExecutor`] | `reqwest` GET |
//! | traceroute | [`traceroute::TracerouteExecutor`] | `traceroute` subprocess |

pub mod dns;
pub mod http;
pub mod ping;
pub mod traceroute;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::ProbeKind;
use crate::storage::Sample;

/// Errors a single probe can end with
///
/// None of these ever leave a collector cycle: they are recorded as failure
/// samples.
#[derive(Debug)]
pub enum ProbeError {
    /// The probe did not settle before its deadline
    Timeout,

    /// The operation ran but failed (unreachable, bad output, ...)
    Execution(String),

    /// The probe could not be started at all
    Spawn(std::io::Error),
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::Timeout => write!(f, "probe timed out"),
            ProbeError::Execution(msg) => write!(f, "probe failed: {}", msg),
            ProbeError::Spawn(err) => write!(f, "failed to start probe: {}", err),
        }
    }
}

impl std::error::Error for ProbeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProbeError::Spawn(err) => Some(err),
            _ => None,
        }
    }
}

/// What one completed probe operation observed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeOutcome {
    pub success: bool,
    pub latency_ms: Option<f64>,
    pub ttfb_ms: Option<f64>,
    pub status_code: Option<u16>,
    pub hops: Option<u32>,
    pub error: Option<String>,
}

impl ProbeOutcome {
    pub fn ok(latency_ms: f64) -> Self {
        Self {
            success: true,
            latency_ms: Some(latency_ms),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Turn the outcome into a sample
    ///
    /// Unsuccessful outcomes never carry timing fields.
    pub fn into_sample(self, probe: ProbeKind, key: &str, ts: i64) -> Sample {
        if !self.success {
            let mut sample = Sample::failure(
                probe,
                key,
                ts,
                self.error.unwrap_or_else(|| "probe failed".to_string()),
            );
            sample.status_code = self.status_code;
            sample.hops = self.hops;
            return sample;
        }

        Sample {
            id: None,
            ts,
            probe,
            key: key.to_string(),
            success: true,
            latency_ms: self.latency_ms,
            ttfb_ms: self.ttfb_ms,
            status_code: self.status_code,
            hops: self.hops,
            error: None,
        }
    }
}

/// Performs one network operation of a given kind
#[async_trait]
pub trait ProbeExecutor: Send + Sync + 'static {
    fn kind(&self) -> ProbeKind;

    /// Probe `target` once
    ///
    /// `timeout` is advisory: executors may pass it to the underlying tool,
    /// but the caller enforces the deadline independently and aborts the
    /// operation when it is exceeded.
    async fn execute(&self, target: &str, timeout: Duration) -> Result<ProbeOutcome, ProbeError>;
}

/// The default executor for a probe kind
pub fn executor_for(kind: ProbeKind) -> Result<Arc<dyn ProbeExecutor>, ProbeError> {
    Ok(match kind {
        ProbeKind::Ping => Arc::new(ping::PingExecutor::default()),
        ProbeKind::Dns => Arc::new(dns::DnsExecutor),
        ProbeKind::Http => Arc::new(http::HttpExecutor::new()?),
        ProbeKind::Traceroute => Arc::new(traceroute::TracerouteExecutor::default()),
    })
}

/// Whole seconds for tools that only accept integer timeouts (at least 1)
pub(crate) fn timeout_secs(timeout: Duration) -> u64 {
    timeout.as_secs_f64().ceil().max(1.0) as u64
}

pub(crate) fn elapsed_ms(start: std::time::Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
