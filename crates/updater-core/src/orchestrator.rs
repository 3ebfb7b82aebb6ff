//! ---
//! upd_section: "02-update-pipeline"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Version probing, download, install and restart of the target application."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use parking_lot::Mutex;
use tokio::sync::{broadcast, Mutex as CycleLock};
use tracing::{debug, info, warn};
use updater_common::config::{AppConfig, TargetConfig};
use updater_metrics::UpdaterMetrics;

use crate::commands::PackageCommands;
use crate::exec::{CommandResult, CommandRunner, ShellExecutor};
use crate::fetch::{HttpPackageFetcher, PackageDownloader};
use crate::inspect::{InstalledVersionProbe, PackageManagerInspector};
use crate::lock::CacheLock;
use crate::remote::{HttpVersionClient, VersionSource};
use crate::state::{CycleOutcome, CycleReport, OrchestratorState, StateChange};
use crate::version::VersionCode;

const STATE_EVENT_CAPACITY: usize = 32;

/// The application kept up to date and where its packages come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateTarget {
    pub application_id: String,
    pub version_url: String,
    pub package_url: String,
    /// Single reused download location; each cycle overwrites it.
    pub artifact_path: PathBuf,
}

impl UpdateTarget {
    pub fn from_config(config: &TargetConfig) -> Self {
        Self {
            application_id: config.application_id.clone(),
            version_url: config.version_url.clone(),
            package_url: config.package_url.clone(),
            artifact_path: config.artifact_path(),
        }
    }
}

/// Collaborators the orchestrator drives.
#[derive(Clone)]
pub struct OrchestratorParts {
    pub runner: Arc<dyn CommandRunner>,
    pub remote: Arc<dyn VersionSource>,
    pub inspector: Arc<dyn InstalledVersionProbe>,
    pub fetcher: Arc<dyn PackageDownloader>,
    pub commands: PackageCommands,
}

impl OrchestratorParts {
    /// Wire the shell executor, HTTP clients and package-manager inspector.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let runner: Arc<dyn CommandRunner> = Arc::new(ShellExecutor::from_config(&config.executor));
        let commands = PackageCommands::new(config.commands.clone());
        Ok(Self {
            remote: Arc::new(HttpVersionClient::new(&config.network)?),
            fetcher: Arc::new(HttpPackageFetcher::new(&config.network)?),
            inspector: Arc::new(PackageManagerInspector::new(
                runner.clone(),
                commands.clone(),
            )),
            runner,
            commands,
        })
    }
}

/// What a version comparison calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateDecision {
    UpToDate,
    RemoteUnavailable,
    Update,
}

/// Strict `remote > installed`; an unknown remote never triggers an update.
pub fn decide(installed: VersionCode, remote: VersionCode) -> UpdateDecision {
    if !remote.is_known() {
        UpdateDecision::RemoteUnavailable
    } else if remote > installed {
        UpdateDecision::Update
    } else {
        UpdateDecision::UpToDate
    }
}

/// State machine for check → download → install → force-stop → relaunch.
///
/// Cycles are serialized: [`UpdateOrchestrator::run_cycle`] waits for any
/// cycle already in flight, in this process or in another one holding the
/// [`CacheLock`], so the artifact path is never written concurrently.
pub struct UpdateOrchestrator {
    target: UpdateTarget,
    parts: OrchestratorParts,
    state: Mutex<OrchestratorState>,
    events: broadcast::Sender<StateChange>,
    cycle_lock: CycleLock<()>,
    metrics: Option<UpdaterMetrics>,
}

impl UpdateOrchestrator {
    pub fn new(target: UpdateTarget, parts: OrchestratorParts) -> Self {
        let (events, _) = broadcast::channel(STATE_EVENT_CAPACITY);
        Self {
            target,
            parts,
            state: Mutex::new(OrchestratorState::Idle),
            events,
            cycle_lock: CycleLock::new(()),
            metrics: None,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self::new(
            UpdateTarget::from_config(&config.target),
            OrchestratorParts::from_config(config)?,
        ))
    }

    pub fn with_metrics(mut self, metrics: UpdaterMetrics) -> Self {
        metrics.set_state(
            OrchestratorState::Idle.as_str(),
            OrchestratorState::Idle.as_str(),
        );
        self.metrics = Some(metrics);
        self
    }

    pub fn target(&self) -> &UpdateTarget {
        &self.target
    }

    pub fn state(&self) -> OrchestratorState {
        *self.state.lock()
    }

    /// Receive every subsequent state transition.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.events.subscribe()
    }

    pub fn runner(&self) -> Arc<dyn CommandRunner> {
        self.parts.runner.clone()
    }

    pub fn commands(&self) -> &PackageCommands {
        &self.parts.commands
    }

    /// Read installed and remote versions concurrently. Read-only.
    pub async fn probe(&self) -> (VersionCode, VersionCode) {
        tokio::join!(
            self.parts
                .inspector
                .installed_version(&self.target.application_id),
            self.parts.remote.latest_version(&self.target.version_url),
        )
    }

    /// Run one full cycle and return to `Idle`.
    pub async fn run_cycle(&self) -> CycleReport {
        let _serial = self.cycle_lock.lock().await;
        let _cache = match CacheLock::acquire(&self.target.artifact_path).await {
            Ok(lock) => Some(lock),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "cache lock unavailable; cycle runs unguarded");
                None
            }
        };
        let started = Instant::now();
        self.transition(OrchestratorState::Checking);

        let (installed, remote) = self.probe().await;
        if let Some(metrics) = &self.metrics {
            metrics.set_versions(installed.get(), remote.get());
        }

        let outcome = match decide(installed, remote) {
            UpdateDecision::UpToDate => {
                info!(application_id = %self.target.application_id, %installed, %remote, "target application is up to date");
                CycleOutcome::UpToDate
            }
            UpdateDecision::RemoteUnavailable => {
                warn!(application_id = %self.target.application_id, %installed, "remote version unavailable; skipping cycle");
                CycleOutcome::RemoteUnavailable
            }
            UpdateDecision::Update => {
                info!(application_id = %self.target.application_id, %installed, %remote, "newer package available");
                self.upgrade_and_restart(installed, remote).await
            }
        };

        if outcome.is_failure() {
            self.transition(OrchestratorState::Failed);
        }
        self.transition(OrchestratorState::Idle);

        if let Some(metrics) = &self.metrics {
            metrics.record_cycle(outcome.as_str());
        }
        let duration = started.elapsed();
        info!(
            application_id = %self.target.application_id,
            outcome = outcome.as_str(),
            detail = %outcome,
            duration_ms = duration.as_millis() as u64,
            "update cycle finished"
        );
        CycleReport {
            installed,
            remote,
            outcome,
            duration,
        }
    }

    async fn upgrade_and_restart(&self, installed: VersionCode, remote: VersionCode) -> CycleOutcome {
        self.transition(OrchestratorState::Downloading);
        let artifact = &self.target.artifact_path;
        match self
            .parts
            .fetcher
            .download(&self.target.package_url, artifact)
            .await
        {
            Ok(bytes) => {
                info!(url = %self.target.package_url, path = %artifact.display(), bytes, "package downloaded");
                if let Some(metrics) = &self.metrics {
                    metrics.add_download_bytes(bytes);
                }
            }
            Err(err) => {
                warn!(url = %self.target.package_url, error = %err, "package download failed; install skipped");
                return CycleOutcome::DownloadFailed {
                    reason: err.to_string(),
                };
            }
        }

        self.transition(OrchestratorState::Installing);
        let install = self
            .run_step("install", &self.parts.commands.install(artifact))
            .await;
        if !install.success() {
            warn!(
                application_id = %self.target.application_id,
                exit_code = install.exit_code,
                "install failed; restart skipped"
            );
            return CycleOutcome::InstallFailed {
                exit_code: install.exit_code,
            };
        }

        // Restart steps are best-effort once the install has landed.
        self.transition(OrchestratorState::Restarting);
        let application_id = &self.target.application_id;
        self.run_step("force_stop", &self.parts.commands.force_stop(application_id))
            .await;
        let launch = self
            .run_step("launch", &self.parts.commands.launch(application_id))
            .await;

        CycleOutcome::Updated {
            from: installed,
            to: remote,
            relaunched: launch.success(),
        }
    }

    async fn run_step(&self, step: &'static str, command: &str) -> CommandResult {
        let result = self.parts.runner.run(command, true).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_command(step, result.success());
        }
        debug!(step, exit_code = result.exit_code, "pipeline step finished");
        result
    }

    fn transition(&self, to: OrchestratorState) {
        let from = std::mem::replace(&mut *self.state.lock(), to);
        debug!(%from, %to, "orchestrator state transition");
        if let Some(metrics) = &self.metrics {
            metrics.set_state(from.as_str(), to.as_str());
        }
        // No subscribers is fine.
        let _ = self.events.send(StateChange { from, to });
    }
}
