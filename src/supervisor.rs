//! Startup and shutdown sequencing
//!
//! The [`Supervisor`] owns one collector loop per enabled probe type, the
//! rollup job and (once attached) the request listener. Every shutdown
//! trigger (signal, fatal loop error, listener failure) cancels the same
//! token; [`Supervisor::shutdown`] then runs the teardown exactly once, no
//! matter how many callers ask for it.
//!
//! Teardown order:
//!
//! 1. ask every collector loop to stop
//! 2. wait for all loops concurrently, each bounded by `loop_stop_timeout`
//! 3. stop accepting connections and close the broadcaster. Open
//!    connections get `shutdown_grace`, then their handlers are cancelled
//!    and the server task is awaited once more before it is aborted
//! 4. close the store

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::ProbeKind;
use crate::actors::broadcaster::BroadcasterHandle;
use crate::actors::collector::{Collector, CollectorLoop, CompletionHandle, LoopExit};
use crate::actors::rollup::RollupJob;
use crate::actors::runtime::RuntimeRegistry;
use crate::config::Config;
use crate::probes::{ProbeError, executor_for};
use crate::storage::{SampleStore, StorageError};

/// How long a single loop gets to reach Stopped during teardown
pub const DEFAULT_LOOP_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// How long the server gets to wind down after its handlers were cancelled
const CONNECTION_DRAIN: Duration = Duration::from_secs(1);

/// Rollup pass interval
pub const ROLLUP_INTERVAL: Duration = Duration::from_secs(30);

/// Errors that abort startup
#[derive(Debug)]
pub enum StartupError {
    /// Invalid configuration
    Config(String),

    /// The store could not be opened or migrated
    Store(StorageError),

    /// A probe executor could not be created
    Probe(ProbeKind, ProbeError),

    /// The listener could not bind its address
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartupError::Config(msg) => write!(f, "Invalid configuration: {}", msg),
            StartupError::Store(err) => write!(f, "Failed to prepare store: {}", err),
            StartupError::Probe(kind, err) => write!(f, "Failed to set up {} probe: {}", kind, err),
            StartupError::Bind { addr, source } => write!(f, "Failed to bind {}: {}", addr, source),
        }
    }
}

impl std::error::Error for StartupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StartupError::Store(err) => Some(err),
            StartupError::Probe(_, err) => Some(err),
            StartupError::Bind { source, .. } => Some(source),
            StartupError::Config(_) => None,
        }
    }
}

impl From<StorageError> for StartupError {
    fn from(err: StorageError) -> Self {
        StartupError::Store(err)
    }
}

/// A running request listener as seen by the supervisor
pub struct ListenerHandle {
    /// Cancelling stops accepting new connections
    pub graceful: CancellationToken,

    /// Cancelling ends every handler still running on an open connection
    pub terminate: CancellationToken,

    /// The server task; resolves once every connection is closed
    pub task: JoinHandle<()>,

    /// The broadcaster owned by the listener
    pub broadcaster: Option<BroadcasterHandle>,
}

/// Shared shutdown trigger with single-run teardown
#[derive(Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    done: Arc<OnceCell<()>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide shutdown token
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn trigger(&self, reason: &str) {
        if !self.token.is_cancelled() {
            info!("Shutdown requested: {}", reason);
        }
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn triggered(&self) {
        self.token.cancelled().await
    }

    pub fn has_completed(&self) -> bool {
        self.done.initialized()
    }

    /// Run `teardown` unless another caller already did
    ///
    /// Concurrent callers all return once the single teardown has finished.
    pub async fn run_once<F, Fut>(&self, teardown: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        self.done.get_or_init(teardown).await;
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub loop_stop_timeout: Duration,
    pub shutdown_grace: Duration,

    /// `None` disables the rollup job
    pub rollup_interval: Option<Duration>,

    /// How long after a minute closes its samples are considered complete
    pub rollup_settle: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            loop_stop_timeout: DEFAULT_LOOP_STOP_TIMEOUT,
            shutdown_grace: Duration::from_secs(5),
            rollup_interval: Some(ROLLUP_INTERVAL),
            rollup_settle: Duration::from_secs(5),
        }
    }
}

impl SupervisorOptions {
    pub fn from_config(config: &Config) -> Self {
        let slowest = config
            .enabled_probes()
            .into_iter()
            .map(|kind| config.probe(kind).timeout())
            .max()
            .unwrap_or_default();

        Self {
            shutdown_grace: config.shutdown_grace(),
            rollup_interval: config.use_window_buckets.then_some(ROLLUP_INTERVAL),
            rollup_settle: slowest + Duration::from_secs(1),
            ..Self::default()
        }
    }
}

pub struct Supervisor {
    store: Arc<dyn SampleStore>,
    runtime: RuntimeRegistry,
    collectors: HashMap<ProbeKind, CollectorLoop>,
    coordinator: ShutdownCoordinator,
    options: SupervisorOptions,
    handles: Mutex<Vec<(ProbeKind, CompletionHandle)>>,
    rollup: Mutex<Option<JoinHandle<()>>>,
    listener: Mutex<Option<ListenerHandle>>,
}

impl Supervisor {
    pub fn new(
        store: Arc<dyn SampleStore>,
        runtime: RuntimeRegistry,
        collectors: Vec<CollectorLoop>,
        options: SupervisorOptions,
    ) -> Self {
        Self {
            store,
            runtime,
            collectors: collectors.into_iter().map(|c| (c.kind(), c)).collect(),
            coordinator: ShutdownCoordinator::new(),
            options,
            handles: Mutex::new(Vec::new()),
            rollup: Mutex::new(None),
            listener: Mutex::new(None),
        }
    }

    /// One collector loop per enabled probe type, with the default executors
    pub fn from_config(config: &Config, store: Arc<dyn SampleStore>) -> Result<Self, StartupError> {
        let runtime = RuntimeRegistry::new();

        let collectors = config
            .enabled_probes()
            .into_iter()
            .map(|kind| {
                let executor = executor_for(kind).map_err(|e| StartupError::Probe(kind, e))?;
                Ok(CollectorLoop::new(
                    kind,
                    executor,
                    config.probe(kind),
                    store.clone(),
                    runtime.clone(),
                ))
            })
            .collect::<Result<Vec<_>, StartupError>>()?;

        Ok(Self::new(
            store,
            runtime,
            collectors,
            SupervisorOptions::from_config(config),
        ))
    }

    pub fn coordinator(&self) -> &ShutdownCoordinator {
        &self.coordinator
    }

    pub fn store(&self) -> Arc<dyn SampleStore> {
        self.store.clone()
    }

    pub fn runtime(&self) -> RuntimeRegistry {
        self.runtime.clone()
    }

    pub fn collector(&self, kind: ProbeKind) -> Option<&CollectorLoop> {
        self.collectors.get(&kind)
    }

    /// All collectors, keyed by probe type
    pub fn collectors(&self) -> HashMap<ProbeKind, CollectorLoop> {
        self.collectors.clone()
    }

    /// Start every collector loop and the rollup job
    pub async fn start(&self) {
        let token = self.coordinator.token();
        let mut handles = self.handles.lock().await;

        for kind in ProbeKind::ALL {
            if let Some(collector) = self.collectors.get(&kind) {
                handles.push((kind, collector.start(token.clone())));
            }
        }

        if let Some(interval) = self.options.rollup_interval {
            let mut rollup = self.rollup.lock().await;
            if rollup.is_none() {
                let job = RollupJob::new(
                    self.store.clone(),
                    self.collectors.keys().copied().collect(),
                    interval,
                    self.options.rollup_settle,
                );
                *rollup = Some(job.spawn(token.child_token()));
            }
        }

        info!("Started {} collector loops", handles.len());
    }

    /// Hand the running listener over for teardown
    pub async fn attach_listener(&self, listener: ListenerHandle) {
        *self.listener.lock().await = Some(listener);
    }

    /// Wait for any shutdown trigger, then tear everything down
    pub async fn run_until_shutdown(&self) {
        self.coordinator.triggered().await;
        self.shutdown().await;
    }

    /// Trigger shutdown and wait for the (single) teardown to finish
    pub async fn shutdown(&self) {
        self.coordinator.trigger("shutdown called");
        self.coordinator.run_once(|| self.teardown()).await;
    }

    async fn teardown(&self) {
        info!("Starting graceful shutdown...");

        for collector in self.collectors.values() {
            collector.stop();
        }

        let handles = self.handles.lock().await.clone();
        let timeout = self.options.loop_stop_timeout;
        join_all(handles.iter().map(|(kind, handle)| async move {
            match tokio::time::timeout(timeout, handle.wait()).await {
                Ok(LoopExit::Stopped) => debug!("{} collector stopped", kind),
                Ok(LoopExit::Fatal(reason)) => warn!("{} collector ended with error: {}", kind, reason),
                Err(_) => warn!("{} collector did not stop within {:?}", kind, timeout),
            }
        }))
        .await;

        if let Some(mut rollup) = self.rollup.lock().await.take()
            && tokio::time::timeout(timeout, &mut rollup).await.is_err()
        {
            warn!("Rollup job did not stop in time, aborting");
            rollup.abort();
        }

        if let Some(listener) = self.listener.lock().await.take() {
            listener.graceful.cancel();
            if let Some(broadcaster) = &listener.broadcaster
                && let Err(e) = broadcaster.close().await
            {
                warn!("Failed to close broadcaster: {}", e);
            }

            let mut task = listener.task;
            if tokio::time::timeout(self.options.shutdown_grace, &mut task)
                .await
                .is_err()
            {
                warn!(
                    "Listener still had open connections after {:?}, terminating them",
                    self.options.shutdown_grace
                );
                listener.terminate.cancel();
                if tokio::time::timeout(CONNECTION_DRAIN, &mut task).await.is_err() {
                    warn!("Listener did not finish after terminating connections, aborting");
                    task.abort();
                }
            }
        }

        if let Err(e) = self.store.close().await {
            error!("Failed to close store: {}", e);
        }

        info!("Graceful shutdown complete");
    }
}

/// Resolves on SIGINT (Ctrl+C) or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C)"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
