//! Configuration management for the plugin host

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_NAME: &str = "agent-plugin-host";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Version plugins are gated against via `minHostVersion`
    pub host_version: String,
    /// Root that relative plugin file access resolves against
    pub workspace: PathBuf,
    pub paths: PathsConfig,
    pub package_manager: PackageManagerConfig,
    pub git: GitConfig,
    pub runtime: RuntimeConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            host_version: env!("CARGO_PKG_VERSION").to_string(),
            workspace: PathBuf::from("."),
            paths: PathsConfig::default(),
            package_manager: PackageManagerConfig::default(),
            git: GitConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

/// Where plugins, the registry file, and shared skills live
///
/// Unset entries fall back to the platform data directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub plugins_dir: Option<PathBuf>,
    pub registry_file: Option<PathBuf>,
    pub skills_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageManagerConfig {
    pub command: String,
    pub proxy: Option<String>,
    pub install_timeout_secs: u64,
    /// Queried for the latest published version during update checks
    pub registry_url: String,
}

impl Default for PackageManagerConfig {
    fn default() -> Self {
        Self {
            command: "npm".to_string(),
            proxy: None,
            install_timeout_secs: 300,
            registry_url: "https://registry.npmjs.org".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub command: String,
    pub clone_timeout_secs: u64,
    /// Prefix for bare `owner/name` repository references
    pub default_host: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            command: "git".to_string(),
            clone_timeout_secs: 300,
            default_host: "https://github.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Bound on each call into a process-backed plugin
    pub call_timeout_secs: u64,
    /// Default timeout of the `shell:execute` capability
    pub shell_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: 30,
            shell_timeout_secs: 60,
        }
    }
}

impl RuntimeConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn shell_timeout(&self) -> Duration {
        Duration::from_secs(self.shell_timeout_secs)
    }
}

impl HostConfig {
    /// Load configuration from default location or create default
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load from an explicit file; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(HostConfig::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: HostConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        Ok(config)
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", APP_NAME) {
            Ok(proj_dirs.config_dir().join("config.toml"))
        } else {
            Ok(PathBuf::from("config.toml"))
        }
    }

    /// Save configuration to default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn plugins_dir(&self) -> Result<PathBuf> {
        match &self.paths.plugins_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(data_dir()?.join("plugins")),
        }
    }

    pub fn registry_file(&self) -> Result<PathBuf> {
        match &self.paths.registry_file {
            Some(file) => Ok(file.clone()),
            None => Ok(self.plugins_dir()?.join("registry.json")),
        }
    }

    pub fn skills_dir(&self) -> Result<PathBuf> {
        match &self.paths.skills_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(data_dir()?.join("skills")),
        }
    }

    /// Keep every path under `root`; handy for tests and throwaway hosts
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            workspace: root.join("workspace"),
            paths: PathsConfig {
                plugins_dir: Some(root.join("plugins")),
                registry_file: Some(root.join("plugins").join("registry.json")),
                skills_dir: Some(root.join("skills")),
            },
            ..Default::default()
        }
    }
}

fn data_dir() -> Result<PathBuf> {
    let base = dirs::data_local_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".local").join("share")))
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
    Ok(base.join(APP_NAME))
}
