//! Plugin manager - owns the registry and the active plugin set
//!
//! All state mutation goes through `&mut self`, so the registry map and the
//! active map change on one logical sequence. Embedders that share the
//! manager wrap it in their own lock.

mod collect;
mod pipeline;

pub use collect::{namespaced_tool_name, parse_namespaced_tool, PluginMcpServer, PluginSkill};

use super::context::{CapabilityContextFactory, PluginContext};
use super::error::{PluginError, PluginResult};
use super::loader::{LoadedModule, LoadedPlugin, PluginLoader, UpdateInfo};
use super::manifest::{Permission, PermissionSet};
use super::mcp::{InMemoryMcpServerHost, McpServerHost};
use super::registry::{InstallSource, PluginState, RegistryEntry, RegistryStore};
use super::runtime::ModuleLoader;
use super::types::SkillSource;
use crate::config::HostConfig;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

/// Lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginEvent {
    Activated { id: String },
    Deactivated { id: String },
    Error { id: String, message: String },
}

/// Runtime-only record of one activated plugin
struct ActivePlugin {
    module: LoadedModule,
    context: PluginContext,
    /// Skill directories this plugin placed in the shared skills dir
    installed_skills: Vec<String>,
}

impl ActivePlugin {
    fn priority(&self) -> i32 {
        self.module.instance.priority()
    }
}

pub struct PluginManager {
    registry: BTreeMap<String, RegistryEntry>,
    active: BTreeMap<String, ActivePlugin>,
    store: RegistryStore,
    loader: PluginLoader,
    contexts: CapabilityContextFactory,
    mcp: Box<dyn McpServerHost>,
    skills_dir: PathBuf,
    active_provider: Option<String>,
    events: broadcast::Sender<PluginEvent>,
}

impl PluginManager {
    /// Create a manager with an empty in-memory registry
    ///
    /// Call [`PluginManager::initialize`] to load persisted state.
    pub fn new(config: HostConfig, modules: Arc<dyn ModuleLoader>) -> anyhow::Result<Self> {
        let store = RegistryStore::new(config.registry_file()?);
        let skills_dir = config.skills_dir()?;
        let contexts =
            CapabilityContextFactory::new(config.workspace.clone(), config.runtime.shell_timeout());
        let loader = PluginLoader::new(config, modules)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            registry: BTreeMap::new(),
            active: BTreeMap::new(),
            store,
            loader,
            contexts,
            mcp: Box::new(InMemoryMcpServerHost::new()),
            skills_dir,
            active_provider: None,
            events,
        })
    }

    /// Route plugin-declared MCP servers to `host`
    pub fn with_mcp_host(mut self, host: Box<dyn McpServerHost>) -> Self {
        self.mcp = host;
        self
    }

    /// Load the registry from disk and bring back plugins that were active
    pub async fn initialize(&mut self) -> anyhow::Result<()> {
        self.load_registry()?;
        self.restore_active_plugins().await;
        Ok(())
    }

    /// Load the registry from disk without activating anything
    pub fn load_registry(&mut self) -> anyhow::Result<()> {
        self.registry = self.store.load()?;
        tracing::info!(
            "Plugin registry loaded: {} installed",
            self.registry.len()
        );
        Ok(())
    }

    /// Re-activate every entry persisted as `active`; returns how many came back
    pub async fn restore_active_plugins(&mut self) -> usize {
        let ids: Vec<String> = self
            .registry
            .values()
            .filter(|e| e.is_active() && !self.active.contains_key(&e.id))
            .map(|e| e.id.clone())
            .collect();

        let mut restored = 0;
        for id in ids {
            match self.activate_plugin(&id).await {
                Ok(()) => restored += 1,
                Err(e) => tracing::warn!("Could not restore plugin {}: {}", id, e),
            }
        }
        restored
    }

    /// Stop every active plugin, keeping their persisted `active` state
    ///
    /// The next [`PluginManager::initialize`] restores them.
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        let ids: Vec<String> = self.active.keys().cloned().collect();
        for id in ids {
            if let Some(active) = self.active.remove(&id) {
                self.teardown(&id, active).await;
                self.emit(PluginEvent::Deactivated { id });
            }
        }
        self.persist()
    }

    /// Provider used when a collection call does not name one
    pub fn set_active_provider(&mut self, provider: Option<String>) {
        self.active_provider = provider;
    }

    pub fn active_provider(&self) -> Option<&str> {
        self.active_provider.as_deref()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PluginEvent> {
        self.events.subscribe()
    }

    pub fn loader(&self) -> &PluginLoader {
        &self.loader
    }

    pub fn skills_dir(&self) -> &Path {
        &self.skills_dir
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn get_plugins(&self) -> Vec<&RegistryEntry> {
        self.registry.values().collect()
    }

    pub fn get_plugin(&self, id: &str) -> Option<&RegistryEntry> {
        self.registry.get(id)
    }

    pub fn get_active_plugins(&self) -> Vec<&RegistryEntry> {
        self.registry
            .values()
            .filter(|e| self.active.contains_key(&e.id))
            .collect()
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.active.contains_key(id)
    }

    // =========================================================================
    // Install / uninstall
    // =========================================================================

    pub async fn install_from_registry(
        &mut self,
        name: &str,
        version: Option<&str>,
    ) -> PluginResult<RegistryEntry> {
        if self.registry.contains_key(name.trim()) {
            return Err(PluginError::AlreadyInstalled(name.trim().to_string()));
        }
        let loaded = self.loader.install_from_registry(name, version).await?;
        self.insert_installed(loaded)
    }

    pub async fn install_from_repository(
        &mut self,
        repo_ref: &str,
        git_ref: Option<&str>,
    ) -> PluginResult<RegistryEntry> {
        // The checkout directory would be replaced by a fresh clone
        let target = self.loader.repository_checkout_dir(repo_ref)?;
        if let Some(existing) = self.registry.values().find(|e| e.install_path == target) {
            return Err(PluginError::AlreadyInstalled(existing.id.clone()));
        }
        let loaded = self.loader.install_from_repository(repo_ref, git_ref).await?;
        self.insert_installed(loaded)
    }

    pub async fn install_from_local_path(&mut self, path: &Path) -> PluginResult<RegistryEntry> {
        let loaded = self.loader.install_from_local_path(path).await?;
        self.insert_installed(loaded)
    }

    fn insert_installed(&mut self, loaded: LoadedPlugin) -> PluginResult<RegistryEntry> {
        let entry = loaded.entry;
        if self.registry.contains_key(&entry.id) {
            return Err(PluginError::AlreadyInstalled(entry.id));
        }
        self.registry.insert(entry.id.clone(), entry.clone());
        self.persist()?;
        tracing::info!("Installed plugin {} v{} ({})", entry.id, entry.version, entry.source);
        Ok(entry)
    }

    /// Deactivate if needed, remove files, then forget the entry
    pub async fn uninstall(&mut self, id: &str) -> PluginResult<()> {
        let entry = self
            .registry
            .get(id)
            .cloned()
            .ok_or_else(|| PluginError::NotInstalled(id.to_string()))?;

        if self.active.contains_key(id) {
            self.deactivate_plugin(id).await?;
        }

        self.loader.uninstall(&entry)?;
        self.registry.remove(id);
        self.persist()?;
        tracing::info!("Uninstalled plugin {}", id);
        Ok(())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Activate `id`; a no-op when already active
    ///
    /// Any failure moves the entry to `error` with the message retained.
    pub async fn activate_plugin(&mut self, id: &str) -> PluginResult<()> {
        if self.active.contains_key(id) {
            return Ok(());
        }
        let entry = self
            .registry
            .get(id)
            .cloned()
            .ok_or_else(|| PluginError::NotInstalled(id.to_string()))?;

        match self.start(&entry).await {
            Ok(active) => {
                self.active.insert(id.to_string(), active);
                if let Some(entry) = self.registry.get_mut(id) {
                    entry.set_state(PluginState::Active);
                }
                self.persist()?;
                tracing::info!("Activated plugin {}", id);
                self.emit(PluginEvent::Activated { id: id.to_string() });
                Ok(())
            }
            Err(e) => {
                let message = format!("{:#}", e);
                tracing::error!("Failed to activate plugin {}: {}", id, message);
                if let Some(entry) = self.registry.get_mut(id) {
                    entry.mark_error(message.clone());
                }
                if let Err(persist_err) = self.persist() {
                    tracing::warn!("Failed to persist plugin registry: {}", persist_err);
                }
                self.emit(PluginEvent::Error {
                    id: id.to_string(),
                    message: message.clone(),
                });
                Err(PluginError::Activation {
                    id: id.to_string(),
                    message,
                })
            }
        }
    }

    async fn start(&mut self, entry: &RegistryEntry) -> anyhow::Result<ActivePlugin> {
        let module = self.loader.load(entry).await?;
        let context = self.contexts.create(entry);
        module.instance.activate(&context).await?;

        let mut installed_skills = Vec::new();
        if let Err(e) = self.install_skills(entry, &module, &mut installed_skills) {
            self.abort_start(entry, &module, &installed_skills).await;
            return Err(e);
        }

        let servers: Vec<_> = module
            .instance
            .mcp_servers()
            .iter()
            .map(|server| collect::resolve_bundled(&entry.install_path, server))
            .collect();
        if !servers.is_empty() {
            match self.mcp.register(&entry.id, &servers) {
                Ok(accepted) => {
                    tracing::debug!("Registered MCP servers for {}: {:?}", entry.id, accepted)
                }
                Err(e) => {
                    self.abort_start(entry, &module, &installed_skills).await;
                    return Err(e.context("Failed to register MCP servers"));
                }
            }
        }

        Ok(ActivePlugin {
            module,
            context,
            installed_skills,
        })
    }

    /// Undo a half-finished activation, including skills copied by it
    async fn abort_start(
        &mut self,
        entry: &RegistryEntry,
        module: &LoadedModule,
        skills: &[String],
    ) {
        for name in skills {
            let dest = self.skills_dir.join(name);
            if let Err(e) = std::fs::remove_dir_all(&dest) {
                tracing::warn!("Failed to remove skill {}: {}", dest.display(), e);
            }
        }
        if let Err(e) = self.mcp.unregister(&entry.id) {
            tracing::warn!("Failed to unregister MCP servers for {}: {:#}", entry.id, e);
        }
        if let Err(e) = module.instance.deactivate().await {
            tracing::warn!("Deactivation of {} after failed start: {:#}", entry.id, e);
        }
    }

    /// Copy bundled skill directories into the shared skills dir
    ///
    /// An existing skill of the same name is never overwritten. Names of the
    /// skills copied so far are pushed to `installed`, also on failure.
    fn install_skills(
        &self,
        entry: &RegistryEntry,
        module: &LoadedModule,
        installed: &mut Vec<String>,
    ) -> anyhow::Result<()> {
        for skill in module.instance.skills() {
            let SkillSource::Bundled(relative) = &skill.source else {
                continue;
            };
            if !is_plain_name(&skill.name) {
                tracing::warn!(
                    "Skill '{}' from plugin {} has an unusable name; skipped",
                    skill.name,
                    entry.id
                );
                continue;
            }
            if !is_contained(relative) {
                tracing::warn!(
                    "Skill '{}' from plugin {} points outside the plugin ({}); skipped",
                    skill.name,
                    entry.id,
                    relative.display()
                );
                continue;
            }

            let dest = self.skills_dir.join(&skill.name);
            if dest.exists() {
                tracing::warn!(
                    "Skill '{}' already exists in {}; keeping the existing one (plugin {})",
                    skill.name,
                    self.skills_dir.display(),
                    entry.id
                );
                continue;
            }

            let src = entry.install_path.join(relative);
            if let Err(e) = copy_dir(&src, &dest) {
                if dest.exists() {
                    std::fs::remove_dir_all(&dest).ok();
                }
                return Err(e.context(format!(
                    "Failed to install skill '{}' from {}",
                    skill.name,
                    src.display()
                )));
            }
            tracing::debug!("Installed skill {} for {}", skill.name, entry.id);
            installed.push(skill.name.clone());
        }
        Ok(())
    }

    /// Deactivate `id`; a no-op when not active
    ///
    /// An entry persisted as `active` that was never restored in this process
    /// has no instance to stop and is only marked inactive.
    pub async fn deactivate_plugin(&mut self, id: &str) -> PluginResult<()> {
        match self.active.remove(id) {
            Some(active) => self.teardown(id, active).await,
            None if self.registry.get(id).map(|e| e.is_active()).unwrap_or(false) => {
                tracing::debug!("Plugin {} was not running; marking inactive", id);
            }
            None => return Ok(()),
        }

        if let Some(entry) = self.registry.get_mut(id) {
            entry.set_state(PluginState::Inactive);
        }
        self.persist()?;
        tracing::info!("Deactivated plugin {}", id);
        self.emit(PluginEvent::Deactivated { id: id.to_string() });
        Ok(())
    }

    async fn teardown(&mut self, id: &str, active: ActivePlugin) {
        if let Err(e) = self.mcp.unregister(id) {
            tracing::warn!("Failed to unregister MCP servers for {}: {:#}", id, e);
        }
        if let Err(e) = active.module.instance.deactivate().await {
            active
                .context
                .logger
                .warn(format!("deactivation failed: {:#}", e));
        }
        if !active.installed_skills.is_empty() {
            tracing::debug!(
                "Skills {:?} from {} stay in the shared skills dir",
                active.installed_skills,
                id
            );
        }
    }

    // =========================================================================
    // Settings, permissions, updates
    // =========================================================================

    /// Merge `patch` into the settings and notify the plugin if active
    pub async fn update_settings(
        &mut self,
        id: &str,
        patch: Map<String, Value>,
    ) -> PluginResult<Map<String, Value>> {
        let entry = self
            .registry
            .get_mut(id)
            .ok_or_else(|| PluginError::NotInstalled(id.to_string()))?;
        entry.settings.extend(patch);
        entry.touch();
        let settings = entry.settings.clone();
        self.persist()?;

        if let Some(active) = self.active.get_mut(id) {
            active.context.settings = settings.clone();
            if let Err(e) = active.module.instance.on_settings_changed(&settings).await {
                active
                    .context
                    .logger
                    .warn(format!("settings change handler failed: {:#}", e));
            }
        }
        Ok(settings)
    }

    /// Grant permissions the manifest requests
    ///
    /// Takes effect for an active plugin at its next activation.
    pub fn grant_permissions(
        &mut self,
        id: &str,
        permissions: &[Permission],
    ) -> PluginResult<PermissionSet> {
        let entry = self
            .registry
            .get_mut(id)
            .ok_or_else(|| PluginError::NotInstalled(id.to_string()))?;

        if let Some(missing) = permissions.iter().find(|p| !entry.manifest.requests(**p)) {
            return Err(PluginError::PermissionNotRequested {
                id: id.to_string(),
                permission: missing.to_string(),
            });
        }
        entry.granted_permissions.extend(permissions.iter().copied());
        entry.touch();
        let granted = entry.granted_permissions.clone();
        self.persist()?;
        Ok(granted)
    }

    pub fn revoke_permissions(
        &mut self,
        id: &str,
        permissions: &[Permission],
    ) -> PluginResult<PermissionSet> {
        let entry = self
            .registry
            .get_mut(id)
            .ok_or_else(|| PluginError::NotInstalled(id.to_string()))?;
        for permission in permissions {
            entry.granted_permissions.remove(permission);
        }
        entry.touch();
        let granted = entry.granted_permissions.clone();
        self.persist()?;
        Ok(granted)
    }

    /// Best effort; only registry installs are checked
    pub async fn check_for_update(&self, id: &str) -> PluginResult<UpdateInfo> {
        let entry = self
            .registry
            .get(id)
            .ok_or_else(|| PluginError::NotInstalled(id.to_string()))?;
        Ok(self.check_entry(entry).await)
    }

    pub async fn check_for_updates(&self) -> Vec<(String, UpdateInfo)> {
        let mut results = Vec::new();
        for entry in self
            .registry
            .values()
            .filter(|e| e.source == InstallSource::Registry)
        {
            results.push((entry.id.clone(), self.check_entry(entry).await));
        }
        results
    }

    async fn check_entry(&self, entry: &RegistryEntry) -> UpdateInfo {
        if entry.source != InstallSource::Registry {
            return UpdateInfo {
                current: entry.version.clone(),
                latest: None,
                available: false,
            };
        }
        self.loader.check_for_update(&entry.id, &entry.version).await
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn persist(&self) -> anyhow::Result<()> {
        self.store.save(&self.registry)
    }

    fn emit(&self, event: PluginEvent) {
        let _ = self.events.send(event);
    }

    /// Active plugins in pipeline order: ascending priority, then id
    fn ordered_active(&self) -> Vec<(&str, &ActivePlugin)> {
        let mut ordered: Vec<(&str, &ActivePlugin)> = self
            .active
            .iter()
            .map(|(id, active)| (id.as_str(), active))
            .collect();
        ordered.sort_by_key(|(_, active)| active.priority());
        ordered
    }
}

fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(std::path::Component::Normal(_)), None)
    )
}

/// Relative and free of `..`
fn is_contained(path: &Path) -> bool {
    path.components().all(|c| {
        matches!(
            c,
            std::path::Component::Normal(_) | std::path::Component::CurDir
        )
    })
}

fn copy_dir(src: &Path, dest: &Path) -> anyhow::Result<()> {
    if !src.is_dir() {
        anyhow::bail!("{} is not a directory", src.display());
    }
    for entry in walkdir::WalkDir::new(src) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(src)?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
