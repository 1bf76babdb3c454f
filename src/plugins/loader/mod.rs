//! Plugin loader - acquire plugin code and turn it into registry entries
//!
//! Three install sources share one load path: validate the descriptor, gate
//! on host version, resolve the entry point, load the module through the
//! configured [`ModuleLoader`], and attach manifest-declared adapters.

mod command;
mod repo;

pub use repo::{checkout_dir_name, is_commit_ref, normalize_repository};

use super::error::{PluginError, PluginResult};
use super::manifest::{check_version_compatibility, PackageDescriptor, DESCRIPTOR_FILE};
use super::plugin::{Plugin, ProviderAdapter};
use super::registry::{InstallSource, PluginState, RegistryEntry};
use super::runtime::{ModuleLoader, ModuleRequest};
use crate::config::HostConfig;
use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Suffixes tried when an entry point is declared without one
const MODULE_SUFFIXES: [&str; 4] = ["js", "mjs", "cjs", "sh"];

const UPDATE_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// A plugin instance plus the adapters loaded for it
#[derive(Clone)]
pub struct LoadedModule {
    pub descriptor: PackageDescriptor,
    pub instance: Arc<dyn Plugin>,
    /// Adapters loaded from the manifest's adapter map
    pub adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl LoadedModule {
    /// The plugin's own adapter wins over an attached one
    pub fn adapter(&self, provider: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.instance
            .adapter(provider)
            .or_else(|| self.adapters.get(provider).cloned())
    }
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModule")
            .field("name", &self.descriptor.name)
            .field("version", &self.descriptor.version)
            .field("adapters", &self.adapters.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Result of a fresh install: the entry to persist and the loaded code
#[derive(Debug, Clone)]
pub struct LoadedPlugin {
    pub entry: RegistryEntry,
    pub module: LoadedModule,
}

/// Outcome of an update check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateInfo {
    pub current: String,
    pub latest: Option<String>,
    pub available: bool,
}

impl UpdateInfo {
    fn none(current: &str) -> Self {
        Self {
            current: current.to_string(),
            latest: None,
            available: false,
        }
    }
}

#[derive(Deserialize)]
struct LatestVersion {
    version: String,
}

/// Stateless apart from the directories it writes to
#[derive(Clone)]
pub struct PluginLoader {
    config: HostConfig,
    plugins_dir: PathBuf,
    modules: Arc<dyn ModuleLoader>,
    http: reqwest::Client,
}

impl PluginLoader {
    pub fn new(config: HostConfig, modules: Arc<dyn ModuleLoader>) -> anyhow::Result<Self> {
        let plugins_dir = config.plugins_dir()?;
        let http = reqwest::Client::builder()
            .timeout(UPDATE_CHECK_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            config,
            plugins_dir,
            modules,
            http,
        })
    }

    pub fn host_version(&self) -> &str {
        &self.config.host_version
    }

    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    // =========================================================================
    // Install sources
    // =========================================================================

    /// Install `name[@version]` through the external package manager
    pub async fn install_from_registry(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> PluginResult<LoadedPlugin> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PluginError::InstallFailed("package name is empty".into()));
        }
        let spec = match version {
            Some(v) if !v.trim().is_empty() => format!("{}@{}", name, v.trim()),
            _ => name.to_string(),
        };

        let host_dir = self.registry_host_dir(name);
        tokio::fs::create_dir_all(&host_dir).await?;
        let host_package = serde_json::json!({
            "name": format!("plugin-host-{}", sanitize(name)),
            "version": "0.0.0",
            "private": true,
        });
        tokio::fs::write(
            host_dir.join(DESCRIPTOR_FILE),
            serde_json::to_string_pretty(&host_package)?,
        )
        .await?;

        tracing::info!("Installing {} from the package registry", spec);
        let mut args = vec![
            "install".to_string(),
            spec.clone(),
            "--save".to_string(),
            "--production".to_string(),
        ];
        args.extend(self.proxy_arg());
        command::run(
            &self.config.package_manager.command,
            &args,
            &host_dir,
            self.install_timeout(),
        )
        .await?;

        let package_dir = name
            .split('/')
            .fold(host_dir.join("node_modules"), |dir, part| dir.join(part));
        self.load_from_directory(&package_dir, InstallSource::Registry, &spec)
            .await
    }

    /// Shallow-clone a repository, install its dependencies, build, then load
    pub async fn install_from_repository(
        &self,
        repo_ref: &str,
        git_ref: Option<&str>,
    ) -> PluginResult<LoadedPlugin> {
        let url = normalize_repository(repo_ref, &self.config.git.default_host)?;
        let git_ref = git_ref.map(str::trim).filter(|r| !r.is_empty());
        let target = self.checkout_dir(&url);

        // A failed earlier attempt leaves its clone behind; start over
        if target.exists() {
            tracing::debug!("Removing stale checkout {}", target.display());
            tokio::fs::remove_dir_all(&target).await?;
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tracing::info!(
            "Cloning {}{}",
            url,
            git_ref.map(|r| format!(" at {}", r)).unwrap_or_default()
        );
        let git = &self.config.git.command;
        let clone_timeout = Duration::from_secs(self.config.git.clone_timeout_secs);
        let target_arg = target.to_string_lossy().to_string();
        match git_ref {
            Some(commit) if is_commit_ref(commit) => {
                // Shallow clones cannot check out arbitrary commits
                let args = vec!["clone".to_string(), url.clone(), target_arg];
                command::run(git, &args, &self.plugins_dir, clone_timeout).await?;
                let args = vec!["checkout".to_string(), commit.to_string()];
                command::run(git, &args, &target, clone_timeout).await?;
            }
            _ => {
                let mut args = vec!["clone".to_string(), "--depth".to_string(), "1".to_string()];
                if let Some(branch) = git_ref {
                    args.push("--branch".to_string());
                    args.push(branch.to_string());
                }
                args.push(url.clone());
                args.push(target_arg);
                command::run(git, &args, &self.plugins_dir, clone_timeout).await?;
            }
        }

        self.prepare_checkout(&target).await?;

        let source_ref = match git_ref {
            Some(r) => format!("{}#{}", url, r),
            None => url,
        };
        self.load_from_directory(&target, InstallSource::Repository, &source_ref)
            .await
    }

    /// Load an existing directory in place
    pub async fn install_from_local_path(&self, path: &Path) -> PluginResult<LoadedPlugin> {
        let dir = absolutize(path)?;
        if !dir.is_dir() {
            return Err(PluginError::InstallFailed(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
        let source_ref = dir.to_string_lossy().to_string();
        self.load_from_directory(&dir, InstallSource::LocalPath, &source_ref)
            .await
    }

    /// Dependency install and declared build step for a fresh checkout
    async fn prepare_checkout(&self, dir: &Path) -> PluginResult<()> {
        let descriptor_path = dir.join(DESCRIPTOR_FILE);
        if !descriptor_path.exists() {
            return Ok(());
        }
        let raw: Value = serde_json::from_str(&tokio::fs::read_to_string(&descriptor_path).await?)?;
        let has_dependencies = raw
            .get("dependencies")
            .and_then(Value::as_object)
            .map(|deps| !deps.is_empty())
            .unwrap_or(false);
        let has_build = raw
            .pointer("/scripts/build")
            .and_then(Value::as_str)
            .is_some();

        let npm = &self.config.package_manager.command;
        if has_dependencies || has_build {
            tracing::info!("Installing dependencies in {}", dir.display());
            let mut args = vec!["install".to_string()];
            args.extend(self.proxy_arg());
            command::run(npm, &args, dir, self.install_timeout()).await?;
        }
        if has_build {
            tracing::info!("Building plugin in {}", dir.display());
            let args = vec!["run".to_string(), "build".to_string()];
            command::run(npm, &args, dir, self.install_timeout()).await?;
        }
        Ok(())
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Validate, load, and produce a fresh registry entry for `dir`
    pub async fn load_from_directory(
        &self,
        dir: &Path,
        source: InstallSource,
        source_ref: &str,
    ) -> PluginResult<LoadedPlugin> {
        let dir = absolutize(dir)?;
        let module = self.load_module(&dir).await?;

        let descriptor = &module.descriptor;
        let now = Utc::now();
        let entry = RegistryEntry {
            id: descriptor.name.clone(),
            version: descriptor.version.clone(),
            source,
            source_ref: source_ref.to_string(),
            install_path: dir,
            manifest: descriptor.manifest.clone(),
            state: PluginState::Installed,
            granted_permissions: Default::default(),
            settings: descriptor.manifest.default_settings(),
            installed_at: now,
            updated_at: now,
            error: None,
        };

        tracing::info!(
            "Loaded plugin {} v{} from {}",
            entry.id,
            entry.version,
            entry.install_path.display()
        );
        Ok(LoadedPlugin { entry, module })
    }

    /// Load the code of an already-installed plugin
    pub async fn load(&self, entry: &RegistryEntry) -> PluginResult<LoadedModule> {
        self.load_module(&entry.install_path).await
    }

    async fn load_module(&self, dir: &Path) -> PluginResult<LoadedModule> {
        let descriptor = PackageDescriptor::load(dir)?;

        if let Some(required) = &descriptor.manifest.min_host_version {
            if !check_version_compatibility(required, self.host_version()) {
                return Err(PluginError::IncompatibleHost {
                    required: required.clone(),
                    host: self.host_version().to_string(),
                });
            }
        }

        let entry_point = resolve_module_path(dir, descriptor.entry_point())?;
        let request = ModuleRequest {
            plugin_dir: dir.to_path_buf(),
            entry_point,
            descriptor: descriptor.clone(),
        };

        let instance = self
            .modules
            .load_plugin(&request)
            .await
            .map_err(|e| PluginError::InvalidModule(format!("{:#}", e)))?;
        if instance.id().trim().is_empty() {
            return Err(PluginError::InvalidModule(
                "module does not export an identifier".into(),
            ));
        }
        if instance.version().trim().is_empty() {
            return Err(PluginError::InvalidModule(format!(
                "module '{}' does not export a version",
                instance.id()
            )));
        }
        if instance.id() != descriptor.name {
            tracing::warn!(
                "Module id '{}' differs from package name '{}'; using the package name",
                instance.id(),
                descriptor.name
            );
        }

        let mut adapters = HashMap::new();
        for (provider, path) in &descriptor.manifest.adapters {
            if instance.adapter(provider).is_some() {
                continue;
            }
            let module_path = resolve_module_path(dir, path)?;
            let adapter = self
                .modules
                .load_adapter(&request, provider, &module_path)
                .await
                .map_err(|e| {
                    PluginError::InvalidModule(format!("adapter '{}': {:#}", provider, e))
                })?;
            tracing::debug!("Attached {} adapter to {}", provider, descriptor.name);
            adapters.insert(provider.clone(), adapter);
        }

        Ok(LoadedModule {
            descriptor,
            instance,
            adapters,
        })
    }

    // =========================================================================
    // Updates and removal
    // =========================================================================

    /// Ask the package registry for the latest version; never fails
    pub async fn check_for_update(&self, package: &str, current: &str) -> UpdateInfo {
        match self.latest_version(package).await {
            Ok(latest) => UpdateInfo {
                current: current.to_string(),
                available: latest != current,
                latest: Some(latest),
            },
            Err(e) => {
                tracing::debug!("Update check for {} failed: {:#}", package, e);
                UpdateInfo::none(current)
            }
        }
    }

    async fn latest_version(&self, package: &str) -> anyhow::Result<String> {
        // Scoped names keep the scope separator encoded
        let url = format!(
            "{}/{}/latest",
            self.config.package_manager.registry_url.trim_end_matches('/'),
            package.replace('/', "%2f")
        );
        let response = self.http.get(&url).send().await?.error_for_status()?;
        let latest: LatestVersion = response.json().await?;
        Ok(latest.version)
    }

    /// Remove the plugin's files
    ///
    /// Registry installs remove the whole isolated host directory. Local-path
    /// installs are left alone: the directory belongs to the user.
    pub fn uninstall(&self, entry: &RegistryEntry) -> PluginResult<()> {
        let target = match entry.source {
            InstallSource::LocalPath => {
                tracing::debug!(
                    "Leaving local plugin directory {} in place",
                    entry.install_path.display()
                );
                return Ok(());
            }
            InstallSource::Registry => registry_host_dir_of(&entry.install_path),
            InstallSource::Repository => entry.install_path.clone(),
        };

        if target.exists() {
            tracing::info!("Removing {}", target.display());
            std::fs::remove_dir_all(&target)?;
        }
        Ok(())
    }

    /// Where a repository install of `repo_ref` is cloned to
    pub fn repository_checkout_dir(&self, repo_ref: &str) -> PluginResult<PathBuf> {
        let url = normalize_repository(repo_ref, &self.config.git.default_host)?;
        Ok(self.checkout_dir(&url))
    }

    fn checkout_dir(&self, url: &str) -> PathBuf {
        self.plugins_dir.join("repos").join(checkout_dir_name(url))
    }

    fn registry_host_dir(&self, name: &str) -> PathBuf {
        self.plugins_dir.join("registry").join(sanitize(name))
    }

    fn proxy_arg(&self) -> Option<String> {
        self.config
            .package_manager
            .proxy
            .as_ref()
            .map(|proxy| format!("--proxy={}", proxy))
    }

    fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.config.package_manager.install_timeout_secs)
    }
}

/// Host directory of a registry install: the parent of its `node_modules`
fn registry_host_dir_of(install_path: &Path) -> PathBuf {
    install_path
        .ancestors()
        .find(|p| p.file_name().map(|n| n == "node_modules").unwrap_or(false))
        .and_then(Path::parent)
        .or_else(|| install_path.parent().and_then(Path::parent))
        .unwrap_or(install_path)
        .to_path_buf()
}

/// Resolve a declared module path inside `dir`
fn resolve_module_path(dir: &Path, declared: &str) -> PluginResult<PathBuf> {
    let relative = Path::new(declared.trim());
    let escapes = relative
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
    let base = dir.join(relative);
    if escapes {
        return Err(PluginError::EntryPointMissing(base));
    }

    if base.is_file() {
        return Ok(base);
    }
    let found = MODULE_SUFFIXES
        .iter()
        .map(|suffix| {
            let mut candidate = base.clone().into_os_string();
            candidate.push(".");
            candidate.push(suffix);
            PathBuf::from(candidate)
        })
        .find(|candidate| candidate.is_file());
    found.ok_or(PluginError::EntryPointMissing(base))
}

fn absolutize(path: &Path) -> PluginResult<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn sanitize(name: &str) -> String {
    name.trim_start_matches('@').replace('/', "__")
}
