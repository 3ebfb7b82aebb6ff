//! ---
//! upd_section: "02-update-pipeline"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Version probing, download, install and restart of the target application."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use updater_common::config::AppConfig;
use updater_metrics::UpdaterMetrics;

use crate::orchestrator::UpdateOrchestrator;
use crate::scheduler::{run_schedule, IntervalScheduler, Scheduler};
use crate::state::{OrchestratorState, StateChange};

/// Background update agent. Consumed by [`UpdateAgent::start`].
pub struct UpdateAgent {
    orchestrator: Arc<UpdateOrchestrator>,
    interval: Duration,
    disable_packages: Vec<String>,
}

impl UpdateAgent {
    pub fn new(orchestrator: Arc<UpdateOrchestrator>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
            disable_packages: Vec::new(),
        }
    }

    /// Packages to user-disable before the first cycle.
    pub fn with_disabled_packages(mut self, packages: Vec<String>) -> Self {
        self.disable_packages = packages;
        self
    }

    pub fn from_config(config: &AppConfig, metrics: Option<UpdaterMetrics>) -> Result<Self> {
        let mut orchestrator = UpdateOrchestrator::from_config(config)
            .context("failed to initialise update orchestrator")?;
        if let Some(metrics) = metrics {
            orchestrator = orchestrator.with_metrics(metrics);
        }
        Ok(Self::new(Arc::new(orchestrator), config.schedule.interval)
            .with_disabled_packages(config.startup.disable_packages.clone()))
    }

    pub fn orchestrator(&self) -> Arc<UpdateOrchestrator> {
        self.orchestrator.clone()
    }

    /// Spawn the worker on the fixed-period schedule.
    pub fn start(self) -> AgentHandle {
        let scheduler = IntervalScheduler::new(self.interval);
        self.start_with(scheduler)
    }

    /// Spawn the worker driven by `scheduler`.
    pub fn start_with<S>(self, scheduler: S) -> AgentHandle
    where
        S: Scheduler + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let orchestrator = self.orchestrator.clone();
        let packages = self.disable_packages;
        info!(
            application_id = %orchestrator.target().application_id,
            interval_secs = self.interval.as_secs(),
            "update agent started"
        );
        let task = tokio::spawn(async move {
            disable_packages(&orchestrator, &packages).await;
            run_schedule(orchestrator, scheduler, shutdown_rx).await
        });
        AgentHandle {
            orchestrator: self.orchestrator,
            shutdown: shutdown_tx,
            task,
        }
    }
}

async fn disable_packages(orchestrator: &UpdateOrchestrator, packages: &[String]) {
    let runner = orchestrator.runner();
    for package in packages {
        let command = orchestrator.commands().disable_package(package);
        let result = runner.run(&command, true).await;
        if result.success() {
            info!(package = %package, "package disabled");
        } else {
            warn!(package = %package, exit_code = result.exit_code, "failed to disable package");
        }
    }
}

/// Control handle for a running [`UpdateAgent`].
pub struct AgentHandle {
    orchestrator: Arc<UpdateOrchestrator>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<u64>,
}

impl AgentHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.orchestrator.subscribe()
    }

    pub fn state(&self) -> OrchestratorState {
        self.orchestrator.state()
    }

    pub fn orchestrator(&self) -> Arc<UpdateOrchestrator> {
        self.orchestrator.clone()
    }

    /// Stop scheduling, let a running cycle finish, and return the cycle count.
    pub async fn shutdown(self) -> Result<u64> {
        let _ = self.shutdown.send(true);
        let cycles = self.task.await.context("update agent task failed")?;
        info!(cycles, "update agent shutdown complete");
        Ok(cycles)
    }
}
