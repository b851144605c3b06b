//! Collector loops
//!
//! One `CollectorLoop` runs per probe type. Each cycle probes every
//! configured target concurrently, writes the cycle's samples as one batch
//! and sleeps until the next interval.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle ──start──▶ Running ──stop / shutdown──▶ Stopping ──▶ Stopped
//! ```
//!
//! `start` is idempotent: a loop is started at most once and every call
//! returns the same [`CompletionHandle`]. Stopped is terminal.
//!
//! ## Failure semantics
//!
//! Probe failures (errors, timeouts, panics inside a probe) are recorded as
//! failure samples and never leave the cycle. A store write failure drops
//! that cycle's batch. Anything escaping the loop's own logic resolves the
//! completion handle with [`LoopExit::Fatal`] and cancels the process-wide
//! shutdown token.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::join_all;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, error, info, instrument, trace, warn};

use super::messages::ProbeReport;
use super::runtime::RuntimeRegistry;
use crate::ProbeKind;
use crate::config::ProbeConfig;
use crate::probes::{ProbeError, ProbeExecutor};
use crate::storage::{Sample, SampleStore};
use crate::util::now_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// How a loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    /// Cancelled and wound down normally
    Stopped,

    /// The loop's own logic failed
    Fatal(String),
}

/// Resolves once the loop task has finished
///
/// Cloneable; every clone observes the same exit.
#[derive(Debug, Clone)]
pub struct CompletionHandle {
    rx: watch::Receiver<Option<LoopExit>>,
}

impl CompletionHandle {
    /// Wait for the loop to finish
    pub async fn wait(&self) -> LoopExit {
        let mut rx = self.rx.clone();
        let exit = match rx.wait_for(Option::is_some).await {
            Ok(exit) => exit.clone().unwrap_or(LoopExit::Stopped),
            Err(_) => LoopExit::Fatal("collector task dropped without reporting".to_string()),
        };
        exit
    }

    /// The exit, if the loop has already finished
    pub fn exit(&self) -> Option<LoopExit> {
        self.rx.borrow().clone()
    }
}

/// A cancellable, periodically scheduled prober for one probe type
#[async_trait]
pub trait Collector: Send + Sync {
    fn kind(&self) -> ProbeKind;

    /// Start the loop under `shutdown`
    ///
    /// The loop stops when `shutdown` is cancelled. A fatal loop error
    /// cancels `shutdown` itself.
    fn start(&self, shutdown: CancellationToken) -> CompletionHandle;

    /// Ask the loop to stop (returns immediately)
    fn stop(&self);

    fn state(&self) -> LoopState;

    /// Probe one target right away, outside the schedule
    async fn probe_now(&self, target: &str) -> Result<ProbeReport>;
}

struct Started {
    token: CancellationToken,
    handle: CompletionHandle,
}

struct LoopInner {
    kind: ProbeKind,
    executor: Arc<dyn ProbeExecutor>,
    targets: Vec<String>,
    interval: Duration,
    timeout: Duration,
    store: Arc<dyn SampleStore>,
    runtime: RuntimeRegistry,
    state: watch::Sender<LoopState>,
}

/// The collector loop shared by every probe type
#[derive(Clone)]
pub struct CollectorLoop {
    inner: Arc<LoopInner>,
    started: Arc<OnceLock<Started>>,
}

impl CollectorLoop {
    pub fn new(
        kind: ProbeKind,
        executor: Arc<dyn ProbeExecutor>,
        config: &ProbeConfig,
        store: Arc<dyn SampleStore>,
        runtime: RuntimeRegistry,
    ) -> Self {
        let (state, _) = watch::channel(LoopState::Idle);

        Self {
            inner: Arc::new(LoopInner {
                kind,
                executor,
                targets: config.targets.clone(),
                interval: config.interval(),
                timeout: config.timeout(),
                store,
                runtime,
                state,
            }),
            started: Arc::new(OnceLock::new()),
        }
    }

    pub fn targets(&self) -> &[String] {
        &self.inner.targets
    }

    /// Subscribe to state changes
    pub fn watch_state(&self) -> watch::Receiver<LoopState> {
        self.inner.state.subscribe()
    }
}

#[async_trait]
impl Collector for CollectorLoop {
    fn kind(&self) -> ProbeKind {
        self.inner.kind
    }

    fn start(&self, shutdown: CancellationToken) -> CompletionHandle {
        let started = self.started.get_or_init(|| {
            let token = shutdown.child_token();
            let (exit_tx, exit_rx) = watch::channel(None);

            self.inner.state.send_replace(LoopState::Running);
            info!("{} collector started ({} targets)", self.inner.kind, self.inner.targets.len());

            let inner = self.inner.clone();
            let loop_token = token.clone();
            tokio::spawn(async move {
                let exit = match std::panic::AssertUnwindSafe(inner.clone().run(loop_token))
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(())) => LoopExit::Stopped,
                    Ok(Err(e)) => LoopExit::Fatal(format!("{e:#}")),
                    Err(panic) => LoopExit::Fatal(panic_message(panic.as_ref())),
                };

                if let LoopExit::Fatal(reason) = &exit {
                    error!("{} collector failed: {reason}; triggering shutdown", inner.kind);
                    shutdown.cancel();
                }

                inner.state.send_replace(LoopState::Stopped);
                let _ = exit_tx.send(Some(exit));
            });

            Started {
                token,
                handle: CompletionHandle { rx: exit_rx },
            }
        });

        started.handle.clone()
    }

    fn stop(&self) {
        if let Some(started) = self.started.get() {
            self.inner.mark_stopping();
            started.token.cancel();
        }
    }

    fn state(&self) -> LoopState {
        *self.inner.state.borrow()
    }

    async fn probe_now(&self, target: &str) -> Result<ProbeReport> {
        let sample = self
            .inner
            .probe(target.to_string(), &CancellationToken::new())
            .await
            .context("probe was cancelled")?;

        let ids = self
            .inner
            .store
            .append_samples(vec![sample.clone()])
            .await
            .context("failed to store probe result")?;
        let id = ids.first().copied().context("store returned no id")?;

        Ok(ProbeReport {
            id,
            ts: sample.ts,
            target: target.to_string(),
            success: sample.success,
        })
    }
}

impl LoopInner {
    fn mark_stopping(&self) {
        self.state.send_if_modified(|state| {
            if *state == LoopState::Running {
                *state = LoopState::Stopping;
                true
            } else {
                false
            }
        });
    }

    #[instrument(skip(self, token), fields(probe = %self.kind))]
    async fn run(self: Arc<Self>, token: CancellationToken) -> Result<()> {
        if self.executor.kind() != self.kind {
            bail!(
                "{} executor wired into the {} collector",
                self.executor.kind(),
                self.kind
            );
        }

        loop {
            if token.is_cancelled() {
                break;
            }

            let cycle_start = Instant::now();
            let completed = self.run_cycle(&token).await;
            if !completed {
                debug!("cancelled mid-cycle");
                break;
            }

            let wait = self.interval.saturating_sub(cycle_start.elapsed());
            trace!("sleeping {wait:?} until next cycle");

            tokio::select! {
                biased;

                _ = token.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        self.mark_stopping();
        debug!("collector loop stopped");
        Ok(())
    }

    /// Probe all targets once and store the results
    ///
    /// Returns `false` if the cycle was cut short by cancellation. Samples
    /// that settled before that are still written.
    async fn run_cycle(&self, token: &CancellationToken) -> bool {
        let settled = join_all(
            self.targets
                .iter()
                .map(|target| self.probe(target.clone(), token)),
        )
        .await;

        let completed = settled.iter().all(Option::is_some);
        let samples: Vec<Sample> = settled.into_iter().flatten().collect();

        if samples.is_empty() {
            return completed;
        }

        self.runtime
            .record_all(
                self.kind,
                samples.iter().map(|s| (s.key.clone(), s.success, s.ts)),
            )
            .await;

        let failures = samples.iter().filter(|s| !s.success).count();
        match self.store.append_samples(samples).await {
            Ok(ids) => debug!("stored {} samples ({failures} failures)", ids.len()),
            Err(e) => warn!("failed to store cycle samples, dropping batch: {e}"),
        }

        completed
    }

    /// Run one probe raced against the timeout and cancellation
    ///
    /// Returns `None` only when cancelled before the probe settled.
    async fn probe(&self, target: String, token: &CancellationToken) -> Option<Sample> {
        let ts = now_ms();
        let executor = self.executor.clone();
        let timeout = self.timeout;

        let probe_target = target.clone();
        // also aborted when this future is dropped
        let mut task =
            AbortOnDropHandle::new(tokio::spawn(async move { executor.execute(&probe_target, timeout).await }));

        let result = tokio::select! {
            joined = &mut task => match joined {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(ProbeError::Execution("probe panicked".to_string())),
                Err(e) => Err(ProbeError::Execution(e.to_string())),
            },
            _ = tokio::time::sleep(timeout) => {
                task.abort();
                Err(ProbeError::Timeout)
            }
            _ = token.cancelled() => {
                task.abort();
                return None;
            }
        };

        Some(match result {
            Ok(outcome) => outcome.into_sample(self.kind, &target, ts),
            Err(e) => {
                trace!("{target}: {e}");
                Sample::failure(self.kind, &target, ts, e.to_string())
            }
        })
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("panicked: {msg}")
    } else {
        "panicked".to_string()
    }
}
