//! ICMP echo via the system `ping` binary

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::trace;

use super::{ProbeError, ProbeExecutor, ProbeOutcome, timeout_secs};
use crate::ProbeKind;

static RTT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"time[=<]\s*([0-9]+(?:\.[0-9]+)?)\s*ms").expect("valid regex"));

/// Extract the round-trip time of the first reply from `ping` output
pub fn parse_rtt(output: &str) -> Option<f64> {
    RTT_PATTERN
        .captures(output)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Sends a single echo request per probe
///
/// The subprocess is killed if the probe is aborted (timeout or shutdown).
pub struct PingExecutor {
    program: String,
}

impl PingExecutor {
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for PingExecutor {
    fn default() -> Self {
        Self::with_program("ping")
    }
}

#[async_trait]
impl ProbeExecutor for PingExecutor {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Ping
    }

    async fn execute(&self, target: &str, timeout: Duration) -> Result<ProbeOutcome, ProbeError> {
        let start = Instant::now();

        let output = Command::new(&self.program)
            .arg("-n")
            .args(["-c", "1"])
            .args(["-W", &timeout_secs(timeout).to_string()])
            .arg(target)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(ProbeError::Spawn)?;

        trace!("ping {target} exited with {} after {:?}", output.status, start.elapsed());

        if !output.status.success() {
            return Ok(ProbeOutcome::failed(format!("no reply ({})", output.status)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_rtt(&stdout) {
            Some(rtt) => Ok(ProbeOutcome::ok(rtt)),
            None => Err(ProbeError::Execution(
                "no round-trip time in ping output".to_string(),
            )),
        }
    }
}
