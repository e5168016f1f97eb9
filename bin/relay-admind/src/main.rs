//! ---
//! ra_section: "01-core-functionality"
//! ra_subsection: "binary"
//! ra_type: "source"
//! ra_scope: "code"
//! ra_description: "Binary entrypoint for the relay admin daemon."
//! ra_version: "v0.1.0"
//! ra_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use relay_api::{spawn_api_server, ApiState, ProcessLifecycle, Terminator};
use relay_common::{init_tracing, AppConfig, KeyValueStore, MemoryStore, VersionInfo};
use relay_metrics::{new_registry, spawn_http_server, DaemonMetrics, UpdateMetrics};
use relay_update::UpdateService;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    about = "Relay admin daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Serve the admin API")]
    Run,
    #[command(about = "Check for updates and print the verdict as JSON")]
    CheckUpdates {
        #[arg(long, help = "Ignore the cached verdict")]
        force: bool,
    },
    #[command(about = "Advance a source-controlled deployment to the upstream revision")]
    PerformUpdate,
    #[command(about = "Record the revision an archive deployment was unpacked from")]
    MarkApplied {
        #[arg(value_name = "REF")]
        reference: String,
    },
}

/// Hands the requested exit code to the main task, which shuts down cleanly.
struct ShutdownTerminator {
    tx: watch::Sender<Option<i32>>,
}

impl Terminator for ShutdownTerminator {
    fn terminate(&self, exit_code: i32) {
        self.tx.send_replace(Some(exit_code));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let version = VersionInfo::current();
    if cli.version {
        println!("{}", version.extended());
        return Ok(());
    }
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/relay-admin.toml"));

    let load_started = Instant::now();
    let loaded = AppConfig::load_with_source(&candidates)?;
    let config = loaded.config;
    let load_duration = load_started.elapsed();

    let registry = new_registry();
    let daemon_metrics = DaemonMetrics::new(registry.clone())?;
    daemon_metrics.observe_config_load(load_duration.as_secs_f64());
    daemon_metrics.set_build_info(&version.semver, &version.git_sha, &version.profile);

    init_tracing("relay-admind", &config.logging)?;
    match &loaded.source {
        Some(path) => info!(path = %path.display(), "configuration loaded"),
        None => info!("no configuration file found; using defaults"),
    }

    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let updates = UpdateService::from_config(&config.update, store.clone())
        .context("failed to initialise update service")?
        .with_metrics(UpdateMetrics::new(registry.clone())?);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            daemon_metrics.inc_start();
            run_daemon(config, updates, store, daemon_metrics).await?;
        }
        Commands::CheckUpdates { force } => {
            let verdict = updates.check(force).await;
            if let Some(warning) = &verdict.warning {
                warn!(warning = %warning, "update check degraded");
            }
            println!("{}", serde_json::to_string_pretty(&verdict.report())?);
        }
        Commands::PerformUpdate => {
            let outcome = updates.execute().await.context("update failed")?;
            info!(updated = outcome.updated, need_restart = outcome.need_restart, "update finished");
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::MarkApplied { reference } => {
            let revision = updates
                .mark_applied(&reference)
                .await
                .context("failed to record applied revision")?;
            println!("{}", revision.id());
        }
    }

    Ok(())
}

async fn run_daemon(
    config: AppConfig,
    updates: UpdateService,
    store: Arc<dyn KeyValueStore>,
    daemon_metrics: DaemonMetrics,
) -> Result<()> {
    let registry = daemon_metrics.registry();
    let metrics_server = if config.metrics.enabled {
        info!(address = %config.metrics.listen, "metrics exporter enabled");
        Some(spawn_http_server(registry.clone(), config.metrics.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let (exit_tx, mut exit_rx) = watch::channel(None);
    let lifecycle = ProcessLifecycle::new(
        &config.lifecycle,
        Arc::new(ShutdownTerminator { tx: exit_tx }),
    );
    let state = ApiState::new(&config, updates, store, lifecycle)
        .with_registry(registry)
        .with_daemon_metrics(daemon_metrics);
    let api_server = spawn_api_server(Arc::new(state), config.api.listen)?;
    info!(address = %api_server.addr(), "daemon running; waiting for termination signal");

    let exit_code = tokio::select! {
        result = signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            info!("ctrl-c received; shutting down");
            None
        }
        changed = exit_rx.changed() => {
            let code = match changed {
                Ok(()) => *exit_rx.borrow(),
                Err(_) => None,
            };
            info!(exit_code = ?code, "restart requested; shutting down");
            code
        }
    };

    api_server.shutdown().await?;
    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }

    if let Some(code) = exit_code {
        std::process::exit(code);
    }
    Ok(())
}
