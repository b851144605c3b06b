//! Path discovery via the system `traceroute` binary

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::trace;

use super::{ProbeError, ProbeExecutor, ProbeOutcome, elapsed_ms, timeout_secs};
use crate::ProbeKind;

const DEFAULT_MAX_HOPS: u32 = 30;

static HOP_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(\d+)\s+(.*)$").expect("valid regex"));

/// Hop summary extracted from traceroute output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HopSummary {
    /// Highest hop number printed
    pub hops: u32,

    /// Whether the last hop answered (not just `*`)
    pub last_hop_answered: bool,
}

/// Count the hops in traceroute output
pub fn parse_hops(output: &str) -> Option<HopSummary> {
    HOP_LINE
        .captures_iter(output)
        .filter_map(|caps| {
            let hop = caps.get(1)?.as_str().parse::<u32>().ok()?;
            let rest = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            Some((hop, rest.split_whitespace().any(|t| t != "*")))
        })
        .last()
        .map(|(hops, last_hop_answered)| HopSummary {
            hops,
            last_hop_answered,
        })
}

pub struct TracerouteExecutor {
    program: String,
    max_hops: u32,
}

impl TracerouteExecutor {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            max_hops: DEFAULT_MAX_HOPS,
        }
    }
}

impl Default for TracerouteExecutor {
    fn default() -> Self {
        Self::with_program("traceroute")
    }
}

#[async_trait]
impl ProbeExecutor for TracerouteExecutor {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Traceroute
    }

    async fn execute(&self, target: &str, timeout: Duration) -> Result<ProbeOutcome, ProbeError> {
        let start = Instant::now();

        // per-hop wait; the whole run is bounded by the caller's deadline
        let output = Command::new(&self.program)
            .arg("-n")
            .args(["-q", "1"])
            .args(["-w", &timeout_secs(timeout / 4).to_string()])
            .args(["-m", &self.max_hops.to_string()])
            .arg(target)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(ProbeError::Spawn)?;

        let duration = elapsed_ms(start);

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::Execution(format!(
                "traceroute exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let summary = parse_hops(&stdout)
            .ok_or_else(|| ProbeError::Execution("no hops in traceroute output".to_string()))?;

        trace!("traceroute {target}: {summary:?} in {duration:.0}ms");

        Ok(ProbeOutcome {
            success: summary.last_hop_answered,
            latency_ms: Some(duration),
            ttfb_ms: None,
            status_code: None,
            hops: Some(summary.hops),
            error: (!summary.last_hop_answered).then(|| "destination not reached".to_string()),
        })
    }
}
