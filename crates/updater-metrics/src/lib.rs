//! ---
//! upd_section: "03-observability"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Metrics collection and export utilities."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across the agent.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let bound = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain"),
                )],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    registry: SharedRegistry,
    starts_total: IntCounter,
    config_load_seconds: Histogram,
    build_info: GaugeVec,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "updaterd_starts_total",
            "Total number of times the update daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "updaterd_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        let build_info = GaugeVec::new(
            Opts::new(
                "updaterd_build_info",
                "Build metadata for the running daemon binary",
            ),
            &["version", "profile"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            registry,
            starts_total,
            config_load_seconds,
            build_info,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }

    pub fn set_build_info(&self, version: &str, profile: &str) {
        self.build_info
            .with_label_values(&[version, profile])
            .set(1.0);
    }
}

/// Metrics describing the update pipeline.
#[derive(Clone, Debug)]
pub struct UpdaterMetrics {
    registry: SharedRegistry,
    cycles: IntCounterVec,
    state: IntGaugeVec,
    installed_version: IntGauge,
    remote_version: IntGauge,
    download_bytes: IntCounter,
    commands: IntCounterVec,
}

impl UpdaterMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let cycles = IntCounterVec::new(
            Opts::new(
                "updater_cycles_total",
                "Completed update cycles partitioned by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(cycles.clone()))?;

        let state = IntGaugeVec::new(
            Opts::new(
                "updater_state",
                "Indicator (0/1) of the orchestrator's current state",
            ),
            &["state"],
        )?;
        registry.register(Box::new(state.clone()))?;

        let installed_version = IntGauge::with_opts(Opts::new(
            "updater_installed_version",
            "Version code of the installed target application (-1 when absent)",
        ))?;
        registry.register(Box::new(installed_version.clone()))?;

        let remote_version = IntGauge::with_opts(Opts::new(
            "updater_remote_version",
            "Latest version code advertised remotely (-1 when unreachable)",
        ))?;
        registry.register(Box::new(remote_version.clone()))?;

        let download_bytes = IntCounter::with_opts(Opts::new(
            "updater_download_bytes_total",
            "Bytes written to the package cache by successful downloads",
        ))?;
        registry.register(Box::new(download_bytes.clone()))?;

        let commands = IntCounterVec::new(
            Opts::new(
                "updater_commands_total",
                "Privileged pipeline commands by step and result",
            ),
            &["step", "result"],
        )?;
        registry.register(Box::new(commands.clone()))?;

        Ok(Self {
            registry,
            cycles,
            state,
            installed_version,
            remote_version,
            download_bytes,
            commands,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_cycle(&self, outcome: &str) {
        self.cycles.with_label_values(&[outcome]).inc();
    }

    pub fn set_state(&self, previous: &str, current: &str) {
        self.state.with_label_values(&[previous]).set(0);
        self.state.with_label_values(&[current]).set(1);
    }

    pub fn set_versions(&self, installed: i64, remote: i64) {
        self.installed_version.set(installed);
        self.remote_version.set(remote);
    }

    pub fn add_download_bytes(&self, bytes: u64) {
        self.download_bytes.inc_by(bytes);
    }

    pub fn record_command(&self, step: &str, success: bool) {
        let result = if success { "ok" } else { "failed" };
        self.commands.with_label_values(&[step, result]).inc();
    }
}

pub use prometheus;
