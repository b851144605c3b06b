use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::trace;

use crate::ProbeKind;

/// Storage backend configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    Memory,

    /// SQLite database (default)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./netwatch.db")
}

/// Settings for one probe type
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub targets: Vec<String>,

    /// Time between the starts of two consecutive cycles
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Upper bound for a single probe operation
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl ProbeConfig {
    pub fn new(targets: Vec<String>, interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            enabled: true,
            targets,
            interval_ms,
            timeout_ms,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            targets: Vec::new(),
            interval_ms: default_interval_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_interval_ms() -> u64 {
    5_000
}

fn default_timeout_ms() -> u64 {
    2_000
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    /// Address of the HTTP / websocket listener
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Period of the live broadcaster
    #[serde(default = "default_push_interval_ms")]
    pub push_interval_ms: u64,

    /// Maximum sample age for a target to be reported as fresh
    #[serde(default = "default_stale_threshold_ms")]
    pub stale_threshold_ms: u64,

    /// Use pre-aggregated minute buckets where available
    #[serde(default = "default_use_window_buckets")]
    pub use_window_buckets: bool,

    /// How long open listener connections may linger during shutdown
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    #[serde(default = "ProbeConfig::disabled")]
    pub ping: ProbeConfig,

    #[serde(default = "ProbeConfig::disabled")]
    pub dns: ProbeConfig,

    #[serde(default = "ProbeConfig::disabled")]
    pub http: ProbeConfig,

    #[serde(default = "ProbeConfig::disabled")]
    pub traceroute: ProbeConfig,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_push_interval_ms() -> u64 {
    2_000
}

fn default_stale_threshold_ms() -> u64 {
    10_000
}

fn default_use_window_buckets() -> bool {
    true
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            storage: StorageConfig::default(),
            push_interval_ms: default_push_interval_ms(),
            stale_threshold_ms: default_stale_threshold_ms(),
            use_window_buckets: default_use_window_buckets(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            ping: ProbeConfig::disabled(),
            dns: ProbeConfig::disabled(),
            http: ProbeConfig::disabled(),
            traceroute: ProbeConfig::disabled(),
        }
    }
}

impl Config {
    pub fn probe(&self, kind: ProbeKind) -> &ProbeConfig {
        match kind {
            ProbeKind::Ping => &self.ping,
            ProbeKind::Dns => &self.dns,
            ProbeKind::Http => &self.http,
            ProbeKind::Traceroute => &self.traceroute,
        }
    }

    /// Probe kinds that are enabled, in startup order
    pub fn enabled_probes(&self) -> Vec<ProbeKind> {
        ProbeKind::ALL
            .into_iter()
            .filter(|kind| self.probe(*kind).enabled)
            .collect()
    }

    pub fn push_interval(&self) -> Duration {
        Duration::from_millis(self.push_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Apply `NETWATCH_*` environment overrides
    pub fn apply_env_overrides(&mut self) {
        if let Some(addr) = crate::util::get_listen_addr() {
            self.listen = addr;
        }
        if let Some(path) = crate::util::get_db_path() {
            self.storage = StorageConfig::Sqlite { path };
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.push_interval_ms == 0 {
            anyhow::bail!("push_interval_ms must be greater than zero");
        }

        for kind in self.enabled_probes() {
            let probe = self.probe(kind);
            if probe.interval_ms == 0 {
                anyhow::bail!("{kind}: interval_ms must be greater than zero");
            }
            if probe.timeout_ms == 0 {
                anyhow::bail!("{kind}: timeout_ms must be greater than zero");
            }
            if probe.targets.is_empty() {
                anyhow::bail!("{kind}: enabled but no targets configured");
            }
            if probe.targets.iter().any(|t| t.trim().is_empty()) {
                anyhow::bail!("{kind}: empty target name");
            }
        }

        Ok(())
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    parse_config(&file_content)
}

pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    serde_json::from_str(content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
