//! ---
//! upd_section: "01-core-functionality"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Shared primitives and utilities for the update agent."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
//! Shared configuration loading and logging setup for the self-update agent.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, CommandTemplates, ExecutorConfig, LoadedAppConfig, LoggingConfig, MetricsConfig,
    NetworkConfig, ScheduleConfig, StartupConfig, TargetConfig,
};
pub use logging::{init_tracing, LogFormat};
