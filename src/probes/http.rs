//! HTTP fetch timing (time to first byte and total)

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::trace;

use super::{ProbeError, ProbeExecutor, ProbeOutcome, elapsed_ms};
use crate::ProbeKind;

/// Fetches the target URL and measures time to headers and to full body
pub struct HttpExecutor {
    /// HTTP client (reused across requests for efficiency)
    client: reqwest::Client,
}

impl HttpExecutor {
    pub fn new() -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("netwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProbeError::Execution(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl ProbeExecutor for HttpExecutor {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Http
    }

    async fn execute(&self, target: &str, timeout: Duration) -> Result<ProbeOutcome, ProbeError> {
        let start = Instant::now();

        let response = self
            .client
            .get(target)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| ProbeError::Execution(format!("HTTP request failed: {e}")))?;

        let ttfb = elapsed_ms(start);
        let status = response.status();

        let body = response
            .bytes()
            .await
            .map_err(|e| ProbeError::Execution(format!("failed to read response body: {e}")))?;

        let total = elapsed_ms(start);
        trace!(
            "{target}: {status} ({} bytes) ttfb={ttfb:.2}ms total={total:.2}ms",
            body.len()
        );

        // redirects are followed by the client, so anything below 400 is a
        // usable answer
        let success = !status.is_client_error() && !status.is_server_error();

        Ok(ProbeOutcome {
            success,
            latency_ms: Some(total),
            ttfb_ms: Some(ttfb),
            status_code: Some(status.as_u16()),
            hops: None,
            error: (!success).then(|| format!("HTTP {}", status.as_u16())),
        })
    }
}
