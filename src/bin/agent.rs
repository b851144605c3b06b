use std::collections::HashMap;
use std::sync::Arc;

use clap::Parser;
use netwatch::{
    ProbeKind,
    actors::collector::Collector,
    api::{ApiConfig, ApiState, spawn_api_server},
    config::read_config_file,
    metrics::{SnapshotBuilder, SnapshotConfig, WindowAggregator},
    storage::open_store,
    supervisor::{StartupError, Supervisor, shutdown_signal},
};
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(name = "netwatch-agent")]
#[command(about = "Network telemetry agent", long_about = None)]
struct Args {
    /// Config file (JSON)
    #[arg(short = 'f', long = "config", value_name = "FILE")]
    config: String,

    /// Log level for the agent's own targets
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

fn init(level: LevelFilter) {
    dotenv::dotenv().ok();

    let filter = filter::Targets::new().with_targets(vec![
        ("netwatch", level),
        ("netwatch_agent", level),
        ("tower_http", LevelFilter::INFO.min(level)),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init(args.log_level);
    trace!("started with args: {args:?}");

    let mut config = read_config_file(&args.config)?;
    config.apply_env_overrides();
    config
        .validate()
        .map_err(|e| StartupError::Config(e.to_string()))?;

    let store = open_store(&config.storage)
        .await
        .map_err(StartupError::from)?;

    let supervisor = match Supervisor::from_config(&config, store.clone()) {
        Ok(supervisor) => Arc::new(supervisor),
        Err(e) => {
            let _ = store.close().await;
            return Err(e.into());
        }
    };

    let coordinator = supervisor.coordinator().clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        coordinator.trigger("signal received");
    });

    supervisor.start().await;

    let aggregator = WindowAggregator::new(store.clone(), config.use_window_buckets);
    let snapshots = SnapshotBuilder::new(
        aggregator.clone(),
        supervisor.runtime(),
        SnapshotConfig {
            ping_targets: if config.ping.enabled {
                config.ping.targets.clone()
            } else {
                Vec::new()
            },
            dns_enabled: config.dns.enabled,
            http_enabled: config.http.enabled,
            stale_threshold_ms: config.stale_threshold_ms as i64,
        },
    );
    let collectors: HashMap<ProbeKind, Arc<dyn Collector>> = supervisor
        .collectors()
        .into_iter()
        .map(|(kind, collector)| (kind, Arc::new(collector) as Arc<dyn Collector>))
        .collect();
    let state = ApiState::new(aggregator, snapshots, config.push_interval(), collectors);

    let api_config = ApiConfig {
        bind_addr: config.listen,
        ..ApiConfig::default()
    };
    match spawn_api_server(api_config, state, supervisor.coordinator().token()).await {
        Ok((addr, listener)) => {
            info!("netwatch agent ready on {}", addr);
            supervisor.attach_listener(listener).await;
        }
        Err(e) => {
            error!("{e}");
            supervisor.shutdown().await;
            return Err(e.into());
        }
    }

    supervisor.run_until_shutdown().await;
    Ok(())
}
