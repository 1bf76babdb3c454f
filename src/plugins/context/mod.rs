//! Capability contexts handed to plugins
//!
//! A context only carries the host functions its permission set authorizes;
//! an ungranted capability is simply `None`. This gates the host-provided
//! surface only. Plugin code itself runs with the host's privileges.

mod fs;
mod net;
mod shell;

pub use fs::{FileReader, FileWriter, PathScope};
pub use net::{FetchRequest, FetchResponse, NetworkFetch};
pub use shell::{ExecOptions, ExecOutput, ShellExecutor};

use super::manifest::{Permission, PermissionSet};
use super::registry::RegistryEntry;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Logger whose lines carry the owning plugin's id
#[derive(Debug, Clone)]
pub struct PluginLogger {
    plugin_id: String,
}

impl PluginLogger {
    pub fn new(plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn debug(&self, msg: impl AsRef<str>) {
        tracing::debug!(plugin = %self.plugin_id, "[plugin:{}] {}", self.plugin_id, msg.as_ref());
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        tracing::info!(plugin = %self.plugin_id, "[plugin:{}] {}", self.plugin_id, msg.as_ref());
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        tracing::warn!(plugin = %self.plugin_id, "[plugin:{}] {}", self.plugin_id, msg.as_ref());
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        tracing::error!(plugin = %self.plugin_id, "[plugin:{}] {}", self.plugin_id, msg.as_ref());
    }
}

/// The permission-scoped host surface given to a plugin at activation
#[derive(Debug, Clone)]
pub struct PluginContext {
    pub plugin_id: String,
    pub workspace: PathBuf,
    pub install_dir: PathBuf,
    pub settings: Map<String, Value>,
    pub permissions: PermissionSet,
    pub logger: PluginLogger,
    pub read_file: Option<FileReader>,
    pub write_file: Option<FileWriter>,
    pub fetch: Option<NetworkFetch>,
    pub exec: Option<ShellExecutor>,
}

impl PluginContext {
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }
}

/// Per-invocation context handed to a tool handler
#[derive(Debug, Clone)]
pub struct ToolExecutionContext {
    pub workspace: PathBuf,
    pub provider: Option<String>,
    pub conversation_id: String,
    pub settings: Map<String, Value>,
    pub logger: PluginLogger,
    /// Present only when `shell:execute` is granted
    pub exec: Option<ShellExecutor>,
    /// Present alongside `exec`, so handlers can run bundled scripts
    pub install_dir: Option<PathBuf>,
}

/// Builds contexts from registry entries
#[derive(Debug, Clone)]
pub struct CapabilityContextFactory {
    workspace: PathBuf,
    shell_timeout: Duration,
    http: reqwest::Client,
}

impl CapabilityContextFactory {
    pub fn new(workspace: impl Into<PathBuf>, shell_timeout: Duration) -> Self {
        Self {
            workspace: workspace.into(),
            shell_timeout,
            http: reqwest::Client::new(),
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Context for plugin activation
    pub fn create(&self, entry: &RegistryEntry) -> PluginContext {
        let granted = &entry.granted_permissions;
        let scope = PathScope::new(&self.workspace, granted.contains(&Permission::FsGlobal));

        PluginContext {
            plugin_id: entry.id.clone(),
            workspace: self.workspace.clone(),
            install_dir: entry.install_path.clone(),
            settings: entry.settings.clone(),
            permissions: granted.clone(),
            logger: PluginLogger::new(&entry.id),
            read_file: granted
                .contains(&Permission::FsRead)
                .then(|| FileReader::new(scope.clone())),
            write_file: granted
                .contains(&Permission::FsWrite)
                .then(|| FileWriter::new(scope.clone())),
            fetch: granted
                .contains(&Permission::NetworkFetch)
                .then(|| NetworkFetch::new(self.http.clone())),
            exec: granted
                .contains(&Permission::ShellExecute)
                .then(|| self.shell_executor()),
        }
    }

    /// Fresh context for one tool invocation
    pub fn tool_context(
        &self,
        entry: &RegistryEntry,
        provider: Option<&str>,
        conversation_id: &str,
    ) -> ToolExecutionContext {
        let exec = entry
            .has_permission(Permission::ShellExecute)
            .then(|| self.shell_executor());
        let install_dir = exec.as_ref().map(|_| entry.install_path.clone());

        ToolExecutionContext {
            workspace: self.workspace.clone(),
            provider: provider.map(str::to_string),
            conversation_id: conversation_id.to_string(),
            settings: entry.settings.clone(),
            logger: PluginLogger::new(&entry.id),
            exec,
            install_dir,
        }
    }

    fn shell_executor(&self) -> ShellExecutor {
        ShellExecutor::new(self.workspace.clone(), self.shell_timeout)
    }
}
