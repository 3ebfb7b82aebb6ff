//! ---
//! upd_section: "01-core-functionality"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Shared primitives and utilities for the update agent."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;
use url::Url;

use crate::logging::LogFormat;

/// File name used when the package URL has no usable trailing segment.
pub const FALLBACK_ARTIFACT_NAME: &str = "package.apk";

fn default_application_id() -> String {
    "com.layer.layer_android_display.staging".to_owned()
}

fn default_version_url() -> String {
    "https://layer-android.b-cdn.net/app-version-code".to_owned()
}

fn default_package_url() -> String {
    "https://layer-android.b-cdn.net/app-staging-debug.apk".to_owned()
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("target/update-cache")
}

fn default_check_interval() -> Duration {
    Duration::from_secs(600)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_user_agent() -> String {
    format!("updaterd/{}", env!("CARGO_PKG_VERSION"))
}

fn default_shell() -> String {
    "sh".to_owned()
}

fn default_elevate_with() -> Vec<String> {
    vec!["su".to_owned(), "root".to_owned()]
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_install_template() -> String {
    "pm install -r {path}".to_owned()
}

fn default_force_stop_template() -> String {
    "am force-stop {package}".to_owned()
}

fn default_launch_template() -> String {
    "monkey -p {package} -c android.intent.category.LAUNCHER 1".to_owned()
}

fn default_disable_template() -> String {
    "pm disable-user --user 0 {package}".to_owned()
}

fn default_query_template() -> String {
    "dumpsys package {package}".to_owned()
}

fn default_disable_packages() -> Vec<String> {
    vec!["com.google.android.gms".to_owned()]
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9899))
}

/// Primary configuration object for the update agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub commands: CommandTemplates,
    #[serde(default)]
    pub startup: StartupConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "UPDATER_CONFIG";

    /// Load configuration from disk, respecting the `UPDATER_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.target.validate()?;
        if self.schedule.interval.is_zero() {
            return Err(anyhow!("schedule.interval must be greater than zero"));
        }
        self.network.validate()?;
        self.executor.validate()?;
        self.commands.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// The single application kept up to date by the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(default = "default_application_id")]
    pub application_id: String,
    #[serde(default = "default_version_url")]
    pub version_url: String,
    #[serde(default = "default_package_url")]
    pub package_url: String,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default)]
    pub artifact_name: Option<String>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            application_id: default_application_id(),
            version_url: default_version_url(),
            package_url: default_package_url(),
            cache_dir: default_cache_dir(),
            artifact_name: None,
        }
    }
}

impl TargetConfig {
    pub fn validate(&self) -> Result<()> {
        if self.application_id.trim().is_empty() {
            return Err(anyhow!("target.application_id must not be empty"));
        }
        if self.application_id.chars().any(char::is_whitespace) {
            return Err(anyhow!(
                "target.application_id '{}' must not contain whitespace",
                self.application_id
            ));
        }
        validate_http_url("target.version_url", &self.version_url)?;
        validate_http_url("target.package_url", &self.package_url)?;
        if let Some(name) = &self.artifact_name {
            if name.is_empty() || name == "." || name == ".." || name.contains('/') {
                return Err(anyhow!(
                    "target.artifact_name '{}' must be a plain file name",
                    name
                ));
            }
        }
        Ok(())
    }

    /// File name used for the downloaded package inside `cache_dir`.
    pub fn resolved_artifact_name(&self) -> String {
        if let Some(name) = &self.artifact_name {
            return name.clone();
        }
        Url::parse(&self.package_url)
            .ok()
            .and_then(|url| {
                url.path_segments()
                    .and_then(|mut segments| segments.next_back().map(str::to_owned))
            })
            .filter(|segment| !segment.is_empty() && segment != "." && segment != "..")
            .unwrap_or_else(|| FALLBACK_ARTIFACT_NAME.to_owned())
    }

    /// Single reused location of the downloaded package.
    pub fn artifact_path(&self) -> PathBuf {
        self.cache_dir.join(self.resolved_artifact_name())
    }
}

fn validate_http_url(field: &str, raw: &str) -> Result<()> {
    let url = Url::parse(raw).with_context(|| format!("{field} '{raw}' is not a valid URL"))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(anyhow!(
            "{field} '{raw}' uses unsupported scheme '{other}'"
        )),
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_check_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub interval: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval: default_check_interval(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_connect_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub connect_timeout: Duration,
    /// Whole-request deadline for the version probe, per-chunk deadline for downloads.
    #[serde(default = "default_read_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub read_timeout: Duration,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            read_timeout: default_read_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() || self.read_timeout.is_zero() {
            return Err(anyhow!(
                "network.connect_timeout and network.read_timeout must be greater than zero"
            ));
        }
        Ok(())
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Prefix placed in front of the shell for elevated commands.
    #[serde(default = "default_elevate_with")]
    pub elevate_with: Vec<String>,
    /// Zero disables the deadline and waits for the command indefinitely.
    #[serde(default = "default_command_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub command_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            elevate_with: default_elevate_with(),
            command_timeout: default_command_timeout(),
        }
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.shell.trim().is_empty() {
            return Err(anyhow!("executor.shell must not be empty"));
        }
        if self.elevate_with.iter().any(|arg| arg.is_empty()) {
            return Err(anyhow!("executor.elevate_with must not contain empty arguments"));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        if self.command_timeout.is_zero() {
            None
        } else {
            Some(self.command_timeout)
        }
    }
}

/// Shell command templates for the platform's package manager.
///
/// `{package}` expands to an application identifier and `{path}` to the
/// downloaded artifact path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandTemplates {
    #[serde(default = "default_install_template")]
    pub install: String,
    #[serde(default = "default_force_stop_template")]
    pub force_stop: String,
    #[serde(default = "default_launch_template")]
    pub launch: String,
    #[serde(default = "default_disable_template")]
    pub disable_package: String,
    #[serde(default = "default_query_template")]
    pub query_version: String,
    #[serde(default)]
    pub query_elevated: bool,
}

impl Default for CommandTemplates {
    fn default() -> Self {
        Self {
            install: default_install_template(),
            force_stop: default_force_stop_template(),
            launch: default_launch_template(),
            disable_package: default_disable_template(),
            query_version: default_query_template(),
            query_elevated: false,
        }
    }
}

impl CommandTemplates {
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("commands.install", &self.install, "{path}"),
            ("commands.force_stop", &self.force_stop, "{package}"),
            ("commands.launch", &self.launch, "{package}"),
            ("commands.disable_package", &self.disable_package, "{package}"),
            ("commands.query_version", &self.query_version, "{package}"),
        ];
        for (field, template, placeholder) in required {
            if !template.contains(placeholder) {
                return Err(anyhow!(
                    "{field} '{template}' must reference the {placeholder} placeholder"
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupConfig {
    /// Unrelated system packages disabled once when the agent starts.
    #[serde(default = "default_disable_packages")]
    pub disable_packages: Vec<String>,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            disable_packages: default_disable_packages(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}
