//! Plugin registry - persisted metadata for installed plugins
//!
//! The registry is a single JSON array of entries, loaded wholesale at
//! startup and rewritten wholesale after every mutation.

use super::manifest::{ExtensionManifest, Permission, PermissionSet};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Where an installed plugin came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallSource {
    /// Package registry via the external package manager
    Registry,
    /// Git repository clone
    Repository,
    /// Existing directory on disk
    LocalPath,
}

impl fmt::Display for InstallSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallSource::Registry => write!(f, "registry"),
            InstallSource::Repository => write!(f, "repository"),
            InstallSource::LocalPath => write!(f, "local-path"),
        }
    }
}

/// Lifecycle state of an installed plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    Installed,
    Active,
    Inactive,
    Error,
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginState::Installed => write!(f, "installed"),
            PluginState::Active => write!(f, "active"),
            PluginState::Inactive => write!(f, "inactive"),
            PluginState::Error => write!(f, "error"),
        }
    }
}

/// Persisted record of one installed plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    /// Globally unique id (the package name)
    pub id: String,
    pub version: String,
    pub source: InstallSource,
    /// Package spec, repository coordinates, or filesystem path
    pub source_ref: String,
    /// Absolute directory the plugin code lives in
    pub install_path: PathBuf,
    pub manifest: ExtensionManifest,
    pub state: PluginState,
    /// Permissions the user granted; always a subset of the manifest's request
    #[serde(default)]
    pub granted_permissions: PermissionSet,
    #[serde(default)]
    pub settings: Map<String, Value>,
    pub installed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RegistryEntry {
    pub fn is_active(&self) -> bool {
        self.state == PluginState::Active
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.granted_permissions.contains(&permission)
    }

    /// Move to `error`, keeping the invariant that the message is non-empty
    pub fn mark_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.error = Some(if message.trim().is_empty() {
            "unknown error".to_string()
        } else {
            message
        });
        self.state = PluginState::Error;
        self.touch();
    }

    pub fn set_state(&mut self, state: PluginState) {
        self.state = state;
        if state != PluginState::Error {
            self.error = None;
        }
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// JSON file backing the registry
#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every entry; a missing file is an empty registry
    pub fn load(&self) -> Result<BTreeMap<String, RegistryEntry>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read registry: {}", self.path.display()))?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        let entries: Vec<RegistryEntry> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse registry: {}", self.path.display()))?;

        tracing::debug!(
            "Loaded {} registry entries from {}",
            entries.len(),
            self.path.display()
        );
        Ok(entries.into_iter().map(|e| (e.id.clone(), e)).collect())
    }

    /// Rewrite the whole file
    pub fn save(&self, entries: &BTreeMap<String, RegistryEntry>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let list: Vec<&RegistryEntry> = entries.values().collect();
        let content = serde_json::to_string_pretty(&list)?;

        // Write then rename so a crash never leaves a truncated registry
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)
            .with_context(|| format!("Failed to write registry: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace registry: {}", self.path.display()))?;
        Ok(())
    }
}
