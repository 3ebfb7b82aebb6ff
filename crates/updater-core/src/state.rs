//! ---
//! upd_section: "02-update-pipeline"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Version probing, download, install and restart of the target application."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use std::fmt;
use std::time::Duration;

use crate::version::VersionCode;

/// Phase of the update cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OrchestratorState {
    #[default]
    Idle,
    Checking,
    Downloading,
    Installing,
    Restarting,
    /// Transient; always followed by `Idle` within the same cycle.
    Failed,
}

impl OrchestratorState {
    /// Static label for metrics and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrchestratorState::Idle => "idle",
            OrchestratorState::Checking => "checking",
            OrchestratorState::Downloading => "downloading",
            OrchestratorState::Installing => "installing",
            OrchestratorState::Restarting => "restarting",
            OrchestratorState::Failed => "failed",
        }
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status event published on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub from: OrchestratorState,
    pub to: OrchestratorState,
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Installed version is equal to or newer than the remote one.
    UpToDate,
    /// The remote version could not be determined; nothing was attempted.
    RemoteUnavailable,
    /// The package download failed; nothing was installed.
    DownloadFailed { reason: String },
    /// The installer exited non-zero; the application was not restarted.
    InstallFailed { exit_code: i32 },
    /// The new package was installed and a restart was attempted.
    Updated {
        from: VersionCode,
        to: VersionCode,
        relaunched: bool,
    },
}

impl CycleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleOutcome::UpToDate => "up_to_date",
            CycleOutcome::RemoteUnavailable => "remote_unavailable",
            CycleOutcome::DownloadFailed { .. } => "download_failed",
            CycleOutcome::InstallFailed { .. } => "install_failed",
            CycleOutcome::Updated { .. } => "updated",
        }
    }

    /// Whether the cycle passed through the transient `Failed` state.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            CycleOutcome::DownloadFailed { .. } | CycleOutcome::InstallFailed { .. }
        )
    }
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleOutcome::UpToDate => f.write_str("up to date"),
            CycleOutcome::RemoteUnavailable => f.write_str("remote version unavailable"),
            CycleOutcome::DownloadFailed { reason } => write!(f, "download failed: {reason}"),
            CycleOutcome::InstallFailed { exit_code } => {
                write!(f, "install failed with exit code {exit_code}")
            }
            CycleOutcome::Updated {
                from,
                to,
                relaunched,
            } => write!(f, "updated {from} -> {to} (relaunched: {relaunched})"),
        }
    }
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub installed: VersionCode,
    pub remote: VersionCode,
    pub outcome: CycleOutcome,
    pub duration: Duration,
}
