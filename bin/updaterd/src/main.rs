//! ---
//! upd_section: "04-daemon"
//! upd_subsection: "binary"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Binary entrypoint for the update agent daemon."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use tokio::signal;
use tracing::info;
use updater_common::config::AppConfig;
use updater_common::logging::init_tracing;
use updater_core::{decide, UpdateAgent, UpdateDecision, UpdateOrchestrator};
use updater_metrics::{new_registry, spawn_http_server, DaemonMetrics, UpdaterMetrics};

const DEVICE_CONFIG_PATH: &str = "/data/local/tmp/updater/updater.toml";

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    version = concat!("updaterd ", env!("CARGO_PKG_VERSION")),
    about = "Background self-update agent",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print version information and exit"
    )]
    version: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the update agent until interrupted")]
    Run,
    #[command(about = "Compare installed and remote versions without updating")]
    Check,
    #[command(about = "Run a single update cycle and exit")]
    Once,
}

fn build_profile() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "release"
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.version {
        println!(
            "updaterd {} ({})",
            env!("CARGO_PKG_VERSION"),
            build_profile()
        );
        return Ok(());
    }

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/updater.toml"));
    candidates.push(PathBuf::from(DEVICE_CONFIG_PATH));

    let load_started = Instant::now();
    let loaded = AppConfig::load_with_source(&candidates)?;
    let config = loaded.config;
    let load_duration = load_started.elapsed();

    let registry = new_registry();
    let daemon_metrics = DaemonMetrics::new(registry.clone())?;
    daemon_metrics.observe_config_load(load_duration.as_secs_f64());
    daemon_metrics.inc_start();
    daemon_metrics.set_build_info(env!("CARGO_PKG_VERSION"), build_profile());

    init_tracing("updaterd", &config.logging)?;
    info!(
        source = %loaded.source.display(),
        application_id = %config.target.application_id,
        "configuration loaded"
    );

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let metrics = UpdaterMetrics::new(registry.clone())?;
            run_daemon(config, registry, metrics).await?
        }
        Commands::Check => {
            let orchestrator = UpdateOrchestrator::from_config(&config)?;
            let (installed, remote) = orchestrator.probe().await;
            let verdict = match decide(installed, remote) {
                UpdateDecision::Update => "update available",
                UpdateDecision::UpToDate => "up to date",
                UpdateDecision::RemoteUnavailable => "remote version unavailable",
            };
            println!(
                "{}: installed {installed}, remote {remote}: {verdict}",
                orchestrator.target().application_id
            );
        }
        Commands::Once => {
            let orchestrator = UpdateOrchestrator::from_config(&config)?;
            let report = orchestrator.run_cycle().await;
            println!(
                "{}: installed {}, remote {}: {} ({} ms)",
                orchestrator.target().application_id,
                report.installed,
                report.remote,
                report.outcome,
                report.duration.as_millis()
            );
        }
    }

    Ok(())
}

async fn run_daemon(
    config: AppConfig,
    registry: updater_metrics::SharedRegistry,
    metrics: UpdaterMetrics,
) -> Result<()> {
    let metrics_server = if config.metrics.enabled {
        let server = spawn_http_server(registry, config.metrics.listen)?;
        info!(address = %server.addr(), "metrics exporter enabled");
        Some(server)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let agent = UpdateAgent::from_config(&config, Some(metrics))?;
    let handle = agent.start();

    info!(
        interval_secs = config.schedule.interval.as_secs(),
        "daemon running; waiting for termination signal"
    );
    wait_for_termination().await?;
    info!("termination signal received; shutting down");
    handle.shutdown().await?;

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(())
}

#[cfg(unix)]
async fn wait_for_termination() -> Result<()> {
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    tokio::select! {
        result = signal::ctrl_c() => result?,
        _ = terminate.recv() => info!("SIGTERM received"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_termination() -> Result<()> {
    signal::ctrl_c().await?;
    Ok(())
}
