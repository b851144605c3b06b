//! Name resolution timing through the system resolver

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::trace;

use super::{ProbeError, ProbeExecutor, ProbeOutcome, elapsed_ms};
use crate::ProbeKind;

/// Resolves the target host name and reports how long it took
pub struct DnsExecutor;

#[async_trait]
impl ProbeExecutor for DnsExecutor {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Dns
    }

    async fn execute(&self, target: &str, _timeout: Duration) -> Result<ProbeOutcome, ProbeError> {
        let start = Instant::now();

        let addrs = tokio::net::lookup_host((target, 0))
            .await
            .map_err(|e| ProbeError::Execution(format!("resolution failed: {e}")))?;

        let count = addrs.count();
        let latency = elapsed_ms(start);
        trace!("resolved {target} to {count} addresses in {latency:.2}ms");

        if count == 0 {
            return Ok(ProbeOutcome::failed("no addresses returned"));
        }

        Ok(ProbeOutcome::ok(latency))
    }
}
