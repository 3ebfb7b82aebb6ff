//! ---
//! upd_section: "02-update-pipeline"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Version probing, download, install and restart of the target application."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
//! Update pipeline for the self-update agent: installed/remote version probes,
//! package download, privileged install and relaunch, and the periodic driver.

pub mod agent;
pub mod commands;
pub mod error;
pub mod exec;
pub mod fetch;
pub mod inspect;
pub mod lock;
pub mod orchestrator;
pub mod remote;
pub mod scheduler;
pub mod state;
pub mod version;

pub use agent::{AgentHandle, UpdateAgent};
pub use commands::PackageCommands;
pub use error::{DownloadError, RemoteVersionError};
pub use exec::{CommandResult, CommandRunner, ShellExecutor, ShellInvocation};
pub use fetch::{HttpPackageFetcher, PackageDownloader};
pub use inspect::{InstalledVersionProbe, PackageManagerInspector};
pub use lock::CacheLock;
pub use orchestrator::{
    decide, OrchestratorParts, UpdateDecision, UpdateOrchestrator, UpdateTarget,
};
pub use remote::{HttpVersionClient, VersionSource};
pub use scheduler::{run_schedule, IntervalScheduler, Scheduler};
pub use state::{CycleOutcome, CycleReport, OrchestratorState, StateChange};
pub use version::VersionCode;
