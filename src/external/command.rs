//! Base command execution abstraction
//!
//! Every external command runs with an explicit working directory and time
//! budget. The trait lets engines be exercised against scripted fakes.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::resilience::{with_timeout, TimeoutError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == 0
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Command execution failed: {message}")]
    ExecutionFailed { message: String },
    #[error("Command not found: {command}")]
    CommandNotFound { command: String },
    #[error("{label} timed out after {timeout_ms}ms")]
    Timeout { label: String, timeout_ms: u64 },
    #[error("IO error: {message}")]
    Io { message: String },
}

impl From<TimeoutError> for CommandError {
    fn from(err: TimeoutError) -> Self {
        CommandError::Timeout {
            label: err.label,
            timeout_ms: err.duration_ms,
        }
    }
}

/// Trait for executing external commands
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        cwd: &Path,
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError>;
}

/// Real implementation backed by `tokio::process`.
///
/// The child is spawned with `kill_on_drop`, so a timed-out command is killed
/// when its future is dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessCommandExecutor;

#[async_trait]
impl CommandExecutor for ProcessCommandExecutor {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        cwd: &Path,
        timeout: Duration,
    ) -> Result<CommandOutput, CommandError> {
        let label = format!("{} {}", program, args.first().copied().unwrap_or_default());
        debug!(program, ?args, cwd = %cwd.display(), "Running command");

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = with_timeout(
            async {
                command.output().await.map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        CommandError::CommandNotFound {
                            command: program.to_string(),
                        }
                    } else {
                        CommandError::Io {
                            message: e.to_string(),
                        }
                    }
                })
            },
            timeout,
            &label,
        )
        .await?;

        Ok(CommandOutput {
            status_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
