//! `shell:execute` capability

use crate::plugins::error::CapabilityError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Relative paths are joined to the workspace
    pub cwd: Option<PathBuf>,
    pub timeout: Option<Duration>,
    pub env: Vec<(String, String)>,
}

/// Captured result of a finished command
///
/// A non-zero exit is still a successful capture, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Clone)]
pub struct ShellExecutor {
    workspace: PathBuf,
    default_timeout: Duration,
}

impl ShellExecutor {
    pub fn new(workspace: PathBuf, default_timeout: Duration) -> Self {
        Self {
            workspace,
            default_timeout,
        }
    }

    /// Run `command` through the platform shell
    pub async fn exec(
        &self,
        command: &str,
        options: ExecOptions,
    ) -> Result<ExecOutput, CapabilityError> {
        let (shell, shell_arg) = if cfg!(windows) {
            ("cmd", "/C")
        } else {
            ("sh", "-c")
        };

        let cwd = options
            .cwd
            .map(|dir| self.workspace.join(dir))
            .unwrap_or_else(|| self.workspace.clone());
        let timeout = options.timeout.unwrap_or(self.default_timeout);

        let mut cmd = Command::new(shell);
        cmd.arg(shell_arg)
            .arg(command)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in options.env {
            cmd.env(key, value);
        }

        let child = cmd.spawn().map_err(|source| CapabilityError::Spawn {
            command: command.to_string(),
            source,
        })?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => {
                let output = output?;
                Ok(ExecOutput {
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                    exit_code: output.status.code().unwrap_or(-1),
                })
            }
            Err(_) => Err(CapabilityError::Timeout(timeout.as_secs())),
        }
    }
}
