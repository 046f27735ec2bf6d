//! Tugboat - Update Orchestration Daemon
//!
//! The daemon watches the container fleet, runs periodic update checks,
//! sweeps approved updates through the orchestrator, and serves the Unix
//! socket API for the `tug` CLI.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::Parser;
use tokio::net::UnixListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use tug_common::config::{DaemonConfig, WarningSeverity};

use tugd::api::{self, DaemonContext};
use tugd::backends::{
    ContainerEngine, MockContainerEngine, MockRegistry, MockScanner, Registry, SystemClock,
    VulnerabilityScanner,
};
use tugd::events::EventBus;
use tugd::http_api::{self, HttpState};
use tugd::metrics;
use tugd::store::Store;

#[derive(Parser)]
#[command(name = "tugd")]
#[command(author, version, about = "Tugboat daemon - container update orchestration")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the Unix socket path
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = DaemonConfig::load(cli.config.as_deref())?;
    if let Some(socket) = &cli.socket {
        config.general.socket_path = socket.to_string_lossy().to_string();
    }

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_new(&config.general.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("Starting Tugboat daemon...");

    for warning in config.validate() {
        match warning.severity {
            WarningSeverity::Critical => {
                warn!(key = %warning.key, "config: {} (substituted default)", warning.message)
            }
            WarningSeverity::Warning => warn!(key = %warning.key, "config: {}", warning.message),
        }
    }

    if let Err(err) = metrics::register_metrics() {
        warn!(error = %err, "metric registration failed");
    }

    let store = Arc::new(
        Store::open(&config.general.data_dir).with_context(|| {
            format!("opening store at {}", config.general.data_dir.display())
        })?,
    );
    info!(
        containers = store.containers().len(),
        path = %config.general.data_dir.display(),
        "store loaded"
    );

    let (engine, registry, scanner) = build_backends(&config)?;
    let events = EventBus::new(config.events.buffer);
    let config = Arc::new(config);

    let context = DaemonContext {
        store: store.clone(),
        engine,
        registry,
        scanner,
        clock: Arc::new(SystemClock),
        events,
        config: config.clone(),
        started_at: Instant::now(),
    };

    // Observability endpoints.
    if config.http.enabled {
        let _http_handle = http_api::start_server(
            config.http.port,
            HttpState {
                store: store.clone(),
                version: env!("CARGO_PKG_VERSION"),
                started_at: context.started_at,
                pid: std::process::id(),
            },
        )
        .await;
    }

    spawn_scan_scheduler(context.clone());
    spawn_sweep_timer(context.clone());

    // Remove existing socket if present
    let socket_path = PathBuf::from(&config.general.socket_path);
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }
    let listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("binding {}", socket_path.display()))?;
    info!("Listening on {:?}", socket_path);

    // Main accept loop
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let ctx = context.clone();
                tokio::spawn(async move {
                    if let Err(e) = api::handle_connection(stream, ctx).await {
                        warn!("Connection error: {}", e);
                    }
                });
            }
            Err(e) => {
                warn!("Accept error: {}", e);
            }
        }
    }
}

type Backends = (
    Arc<dyn ContainerEngine>,
    Arc<dyn Registry>,
    Arc<dyn VulnerabilityScanner>,
);

/// Resolve the configured backend driver. `mock` ships in-tree; container
/// engine, registry, and scanner integrations are deployment-specific and
/// register their own driver names.
fn build_backends(config: &DaemonConfig) -> Result<Backends> {
    match config.backends.driver.as_str() {
        "mock" => Ok((
            Arc::new(MockContainerEngine::default()),
            Arc::new(MockRegistry::default()),
            Arc::new(MockScanner::default()),
        )),
        other => bail!("unknown backends.driver `{other}` (built-in drivers: mock)"),
    }
}

/// Fire fleet checks on the configured cron schedule.
///
/// The schedule was validated at startup; the ticker polls twice a minute
/// and starts a check when an occurrence has passed. The job singleton in
/// the store makes double-fires harmless.
fn spawn_scan_scheduler(ctx: DaemonContext) {
    let Ok(schedule) = cron::Schedule::from_str(&ctx.config.scan.schedule) else {
        warn!(schedule = %ctx.config.scan.schedule, "scan schedule invalid, periodic checks disabled");
        return;
    };
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        let mut last = Utc::now();
        loop {
            ticker.tick().await;
            let now = Utc::now();
            if schedule.after(&last).next().is_some_and(|at| at <= now) {
                info!("scheduled fleet check firing");
                let _ = api::start_check(&ctx, "schedule");
            }
            last = now;
        }
    });
}

/// Periodic orchestration sweep.
fn spawn_sweep_timer(ctx: DaemonContext) {
    let interval_secs = ctx.config.orchestrator.sweep_interval_secs.max(1);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        // The first tick completes immediately; skip it so a restart does
        // not sweep before the first scan has a chance to run.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let report = api::run_sweep(&ctx).await;
            if report.applied + report.failed + report.retried + report.deferred > 0 {
                info!(
                    applied = report.applied,
                    failed = report.failed,
                    retried = report.retried,
                    deferred = report.deferred,
                    conflicts = report.conflicts,
                    "sweep report"
                );
            }
        }
    });
}
