//! ---
//! upd_section: "02-update-pipeline"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Version probing, download, install and restart of the target application."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
//! Shell execution seam. Everything the agent does with elevated privilege
//! passes through [`CommandRunner::run`].

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};
use updater_common::config::ExecutorConfig;

/// Captured outcome of one shell invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    /// Exit code reported when the process could not be spawned or awaited.
    pub const SPAWN_FAILURE_CODE: i32 = -1;

    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Sentinel result for a command that never ran to completion.
    pub fn spawn_failure() -> Self {
        Self::new(Self::SPAWN_FAILURE_CODE, "", "")
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs shell commands, optionally elevated.
///
/// Implementations never fail: a non-zero exit is a normal result and an
/// unspawnable process is reported as [`CommandResult::spawn_failure`].
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str, elevated: bool) -> CommandResult;
}

/// Argument vector layout for plain and elevated invocations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellInvocation {
    shell: String,
    elevate_with: Vec<String>,
}

impl ShellInvocation {
    pub fn new(shell: impl Into<String>, elevate_with: Vec<String>) -> Self {
        Self {
            shell: shell.into(),
            elevate_with,
        }
    }

    /// `[shell, "-c", command]`, prefixed by the elevation wrapper when requested.
    pub fn argv(&self, command: &str, elevated: bool) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.elevate_with.len() + 3);
        if elevated {
            argv.extend(self.elevate_with.iter().cloned());
        }
        argv.push(self.shell.clone());
        argv.push("-c".to_owned());
        argv.push(command.to_owned());
        argv
    }
}

impl Default for ShellInvocation {
    fn default() -> Self {
        Self::new("sh", vec!["su".to_owned(), "root".to_owned()])
    }
}

/// [`CommandRunner`] backed by real child processes.
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor {
    invocation: ShellInvocation,
    timeout: Option<Duration>,
}

impl ShellExecutor {
    pub fn new(invocation: ShellInvocation, timeout: Option<Duration>) -> Self {
        Self {
            invocation,
            timeout,
        }
    }

    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self::new(
            ShellInvocation::new(config.shell.clone(), config.elevate_with.clone()),
            config.command_timeout(),
        )
    }

    pub fn invocation(&self) -> &ShellInvocation {
        &self.invocation
    }
}

#[async_trait]
impl CommandRunner for ShellExecutor {
    async fn run(&self, command: &str, elevated: bool) -> CommandResult {
        let argv = self.invocation.argv(command, elevated);
        let command_line = argv.join(" ");
        info!(command = %command_line, elevated, "executing shell command");

        let mut child = Command::new(&argv[0]);
        child
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let process = match child.spawn() {
            Ok(process) => process,
            Err(err) => {
                warn!(command = %command_line, error = %err, "failed to spawn shell command");
                return CommandResult::spawn_failure();
            }
        };

        // wait_with_output drains stdout and stderr concurrently before reaping.
        let waited = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, process.wait_with_output()).await {
                Ok(waited) => waited,
                Err(_) => {
                    warn!(command = %command_line, timeout_secs = limit.as_secs_f64(), "shell command timed out; process killed");
                    return CommandResult::spawn_failure();
                }
            },
            None => process.wait_with_output().await,
        };

        let output = match waited {
            Ok(output) => output,
            Err(err) => {
                warn!(command = %command_line, error = %err, "failed waiting for shell command");
                return CommandResult::spawn_failure();
            }
        };

        let result = CommandResult::new(
            output
                .status
                .code()
                .unwrap_or(CommandResult::SPAWN_FAILURE_CODE),
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        );

        if result.success() {
            info!(command = %command_line, exit_code = result.exit_code, "shell command succeeded");
        } else {
            warn!(
                command = %command_line,
                exit_code = result.exit_code,
                stdout = %result.stdout.trim_end(),
                stderr = %result.stderr.trim_end(),
                "shell command failed"
            );
        }
        result
    }
}

/// Quote a value for safe interpolation into a `sh -c` command line.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_./:=@%+,".contains(&b))
    {
        return value.to_owned();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}
