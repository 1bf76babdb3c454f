//! External install commands (package manager, git) with a time bound

use crate::plugins::error::{PluginError, PluginResult};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Run `program args..` in `cwd`, returning captured stdout
///
/// A non-zero exit becomes `InstallFailed` carrying stderr; exceeding
/// `timeout` kills the child and becomes `InstallTimedOut`.
pub(super) async fn run(
    program: &str,
    args: &[String],
    cwd: &Path,
    timeout: Duration,
) -> PluginResult<String> {
    let rendered = render(program, args);
    tracing::debug!("Running '{}' in {}", rendered, cwd.display());

    let child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| PluginError::InstallFailed(format!("failed to run '{}': {}", rendered, e)))?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => {
            tracing::warn!("'{}' timed out after {}s", rendered, timeout.as_secs());
            return Err(PluginError::InstallTimedOut {
                command: rendered,
                secs: timeout.as_secs(),
            });
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PluginError::InstallFailed(format!(
            "'{}' exited with code {}: {}",
            rendered,
            output.status.code().unwrap_or(-1),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn render(program: &str, args: &[String]) -> String {
    std::iter::once(program.to_string())
        .chain(args.iter().cloned())
        .collect::<Vec<_>>()
        .join(" ")
}
