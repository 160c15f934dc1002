//! capscaled — the capscale daemon.
//!
//! Single binary that assembles every capscale subsystem:
//! - State store (redb)
//! - Store-backed metric source + sample pruner
//! - Capacity client (HTTP, or an in-memory simulator when no endpoint
//!   is configured)
//! - Reconciler + dispatcher
//! - REST API + Prometheus metrics
//!
//! # Usage
//!
//! ```text
//! capscaled run --config /etc/capscale/capscale.toml --port 8080
//! capscaled check-config --config /etc/capscale/capscale.toml
//! capscaled init-config > capscale.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use capscale_capacity::{HttpCapacityClient, InMemoryCapacity};
use capscale_core::config::{ApiSection, CapacitySection, StoreSection};
use capscale_core::{CapacityMutator, CapscaleConfig, DesiredStateStore};
use capscale_metrics::{EngineMetrics, SamplePruner, StoreMetricSource};
use capscale_reconciler::{Dispatcher, Reconciler, TracingEventSink};
use capscale_state::StateStore;

const DEFAULT_LOG_FILTER: &str = "info,capscaled=debug,capscale=debug";
const DB_FILE: &str = "capscale.redb";

#[derive(Parser)]
#[command(name = "capscaled", about = "capscale autoscaling daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the API server and reconciliation engine.
    Run {
        #[command(flatten)]
        overrides: Overrides,

        /// Emit logs as JSON lines.
        #[arg(long)]
        log_json: bool,
    },
    /// Validate the configuration and print the effective settings.
    CheckConfig {
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Print a configuration file with every default spelled out.
    InitConfig,
}

/// Command-line settings that take precedence over the config file.
#[derive(Args, Debug, Default)]
struct Overrides {
    /// Path to capscale.toml.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory for persistent state.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Port the REST API listens on.
    #[arg(long)]
    port: Option<u16>,

    /// Base URL of the capacity admin API.
    #[arg(long)]
    capacity_endpoint: Option<String>,
}

impl Overrides {
    fn load(&self) -> anyhow::Result<CapscaleConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => CapscaleConfig::default(),
        };
        self.apply(&mut config);
        Ok(config)
    }

    fn apply(&self, config: &mut CapscaleConfig) {
        if let Some(dir) = &self.data_dir {
            config.store.get_or_insert_with(StoreSection::default).data_dir = Some(dir.clone());
        }
        if let Some(port) = self.port {
            config.api.get_or_insert_with(ApiSection::default).port = Some(port);
        }
        if let Some(endpoint) = &self.capacity_endpoint {
            config
                .capacity
                .get_or_insert_with(CapacitySection::default)
                .endpoint = Some(endpoint.clone());
        }
    }
}

fn load_config(path: &Path) -> anyhow::Result<CapscaleConfig> {
    CapscaleConfig::from_file(path).with_context(|| format!("loading {}", path.display()))
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            overrides,
            log_json,
        } => {
            init_tracing(log_json);
            let config = overrides.load()?;
            run_daemon(config).await
        }
        Command::CheckConfig { overrides } => {
            let effective = overrides.load()?.effective()?;
            print!("{}", effective.to_toml_string()?);
            Ok(())
        }
        Command::InitConfig => {
            print!("{}", CapscaleConfig::scaffold().to_toml_string()?);
            Ok(())
        }
    }
}

async fn run_daemon(config: CapscaleConfig) -> anyhow::Result<()> {
    info!("capscale daemon starting");

    let engine = config.resolve_engine()?;
    let capacity_settings = config.resolve_capacity();
    let retention = config.resolve_retention();

    // Ensure data directory exists.
    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    let db_path = data_dir.join(DB_FILE);

    // ── Initialize subsystems ──────────────────────────────────

    // State store.
    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");
    let desired: Arc<dyn DesiredStateStore> = Arc::new(state.clone());

    // Metric source.
    let metric_source = Arc::new(StoreMetricSource::new(state.clone()));

    // Capacity mutator.
    let capacity: Arc<dyn CapacityMutator> = match &capacity_settings.endpoint {
        Some(endpoint) => {
            let client = HttpCapacityClient::new(endpoint, capacity_settings.timeout)?;
            info!(address = client.address(), "capacity client initialized");
            Arc::new(client)
        }
        None => {
            warn!("no capacity endpoint configured, scaling an in-memory simulator");
            Arc::new(InMemoryCapacity::new().with_default_nodes(1))
        }
    };

    // Reconciler + dispatcher.
    let metrics = Arc::new(EngineMetrics::new());
    let reconciler = Reconciler::new(
        Arc::clone(&desired),
        metric_source,
        capacity,
        engine.clone(),
    )
    .with_events(Arc::new(TracingEventSink))
    .with_metrics(Arc::clone(&metrics));
    let dispatcher = Dispatcher::new(Arc::new(reconciler), desired, &engine);
    info!(
        workers = engine.workers,
        sync_period_secs = engine.sync_period.as_secs(),
        "reconciliation engine initialized"
    );

    // Sample pruner.
    let pruner = SamplePruner::new(
        state.clone(),
        retention.sample_retention,
        retention.prune_interval,
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher_shutdown = shutdown_rx.clone();
    let pruner_shutdown = shutdown_rx;

    // ── Start background tasks ─────────────────────────────────

    let dispatcher_handle = tokio::spawn(async move {
        dispatcher.run(dispatcher_shutdown).await;
    });

    let pruner_handle = tokio::spawn(async move {
        pruner.run(pruner_shutdown).await;
    });

    // ── Start API server ───────────────────────────────────────

    let router = capscale_api::build_router(state, metrics);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port()));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wait for background tasks.
    let _ = dispatcher_handle.await;
    let _ = pruner_handle.await;

    info!("capscale daemon stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capscale.toml");
        std::fs::write(
            &path,
            "[api]\nport = 9000\n\n[capacity]\nendpoint = \"http://file:1\"\n",
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "capscaled",
            "run",
            "--config",
            path.to_str().unwrap(),
            "--port",
            "9100",
            "--data-dir",
            "/tmp/capscale-test",
        ])
        .unwrap();
        let Command::Run { overrides, log_json } = cli.command else {
            panic!("expected run");
        };
        assert!(!log_json);

        let config = overrides.load().unwrap();
        assert_eq!(config.api_port(), 9100);
        assert_eq!(config.data_dir(), PathBuf::from("/tmp/capscale-test"));
        assert_eq!(
            config.resolve_capacity().endpoint.as_deref(),
            Some("http://file:1")
        );
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let overrides = Overrides {
            config: Some(PathBuf::from("/nonexistent/capscale.toml")),
            ..Overrides::default()
        };
        let err = overrides.load().unwrap_err();
        assert!(err.to_string().contains("/nonexistent/capscale.toml"));
    }

    #[test]
    fn check_config_renders_effective_settings() {
        let overrides = Overrides {
            capacity_endpoint: Some("http://10.0.0.5:9090".into()),
            ..Overrides::default()
        };
        let rendered = overrides
            .load()
            .unwrap()
            .effective()
            .unwrap()
            .to_toml_string()
            .unwrap();
        assert!(rendered.contains("endpoint = \"http://10.0.0.5:9090\""));
        assert!(rendered.contains("sync_period = \"30s\""));
    }
}
