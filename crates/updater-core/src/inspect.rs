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

use async_trait::async_trait;
use tracing::{debug, info};

use crate::commands::PackageCommands;
use crate::exec::CommandRunner;
use crate::version::VersionCode;

/// Reads the installed version of an application from the local package registry.
#[async_trait]
pub trait InstalledVersionProbe: Send + Sync {
    /// Installed version, or [`VersionCode::UNKNOWN`] when the application is absent.
    async fn installed_version(&self, application_id: &str) -> VersionCode;
}

/// Queries the platform package manager through the shell.
pub struct PackageManagerInspector {
    runner: Arc<dyn CommandRunner>,
    commands: PackageCommands,
}

impl PackageManagerInspector {
    pub fn new(runner: Arc<dyn CommandRunner>, commands: PackageCommands) -> Self {
        Self { runner, commands }
    }
}

#[async_trait]
impl InstalledVersionProbe for PackageManagerInspector {
    async fn installed_version(&self, application_id: &str) -> VersionCode {
        let command = self.commands.query_version(application_id);
        let result = self
            .runner
            .run(&command, self.commands.query_elevated())
            .await;
        if !result.success() {
            debug!(application_id, exit_code = result.exit_code, "package query failed");
            return VersionCode::UNKNOWN;
        }
        let version = parse_version_code(&result.stdout);
        if version.is_known() {
            info!(application_id, installed = %version, "local package version");
        } else {
            info!(application_id, "package not installed");
        }
        version
    }
}

/// Extract the first `versionCode=N` (dumpsys) or `versionCode:N` (pm list) value.
pub fn parse_version_code(output: &str) -> VersionCode {
    for token in output.split_whitespace() {
        let value = token
            .strip_prefix("versionCode=")
            .or_else(|| token.strip_prefix("versionCode:"));
        if let Some(value) = value {
            let digits: String = value.chars().take_while(char::is_ascii_digit).collect();
            if let Some(version) = VersionCode::parse(&digits) {
                return version;
            }
        }
    }
    VersionCode::UNKNOWN
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::CommandResult;
    use parking_lot::Mutex;

    struct ScriptedRunner {
        result: CommandResult,
        seen: Mutex<Vec<(String, bool)>>,
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, command: &str, elevated: bool) -> CommandResult {
            self.seen.lock().push((command.to_owned(), elevated));
            self.result.clone()
        }
    }

    fn inspector(result: CommandResult) -> (PackageManagerInspector, Arc<ScriptedRunner>) {
        let runner = Arc::new(ScriptedRunner {
            result,
            seen: Mutex::new(Vec::new()),
        });
        (
            PackageManagerInspector::new(runner.clone(), PackageCommands::default()),
            runner,
        )
    }

    const DUMPSYS: &str = "Packages:\n  Package [com.example.app] (3f2a1c):\n    userId=10123\n    versionCode=57 minSdk=24 targetSdk=33\n    versionName=1.4.0\n";

    #[test]
    fn parses_dumpsys_and_pm_list_output() {
        assert_eq!(parse_version_code(DUMPSYS), VersionCode::new(57));
        assert_eq!(
            parse_version_code("package:com.example.app versionCode:812"),
            VersionCode::new(812)
        );
        assert_eq!(
            parse_version_code("Unable to find package: com.example.app"),
            VersionCode::UNKNOWN
        );
        assert_eq!(parse_version_code("versionCode=abc"), VersionCode::UNKNOWN);
    }

    #[tokio::test]
    async fn queries_registry_without_elevation() {
        let (inspector, runner) = inspector(CommandResult::new(0, DUMPSYS, ""));
        let version = inspector.installed_version("com.example.app").await;
        assert_eq!(version, VersionCode::new(57));
        assert_eq!(
            runner.seen.lock().as_slice(),
            &[("dumpsys package com.example.app".to_owned(), false)]
        );
    }

    #[tokio::test]
    async fn missing_package_or_failed_query_is_unknown() {
        let (absent, _) = inspector(CommandResult::new(
            0,
            "Unable to find package: com.example.app\n",
            "",
        ));
        assert_eq!(
            absent.installed_version("com.example.app").await,
            VersionCode::UNKNOWN
        );

        let (broken, _) = inspector(CommandResult::spawn_failure());
        assert_eq!(
            broken.installed_version("com.example.app").await,
            VersionCode::UNKNOWN
        );
    }
}
