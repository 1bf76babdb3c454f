//! Plugin system
//!
//! Installs, activates, and orchestrates third-party plugins that add
//! prompts, tools, skills, MCP servers, and message hooks to an agent host.
//!
//! # Architecture
//!
//! - [`manifest`]: validates the `package.json` descriptor and its
//!   `extension` block before anything is trusted
//! - [`loader`]: acquires plugin code (package registry, git, local path)
//!   and loads it through a [`runtime::ModuleLoader`]
//! - [`context`]: builds the permission-scoped host surface for a plugin
//! - [`manager`]: lifecycle, capability collection, and the hook pipeline
//!
//! # Security
//!
//! Permissions gate only the host functions handed to a plugin in its
//! [`context::PluginContext`]. Native plugins run with host privileges;
//! process-backed plugins run in their own OS process.

pub mod base;
pub mod context;
pub mod error;
pub mod loader;
pub mod manager;
pub mod manifest;
pub mod mcp;
pub mod plugin;
pub mod registry;
pub mod runtime;
pub mod types;

pub use base::{BasicPlugin, BasicPluginBuilder};
pub use context::{CapabilityContextFactory, PluginContext, PluginLogger, ToolExecutionContext};
pub use error::{CapabilityError, PluginError, PluginResult, ValidationIssue};
pub use loader::{LoadedModule, LoadedPlugin, PluginLoader, UpdateInfo};
pub use manager::{PluginEvent, PluginManager, PluginMcpServer, PluginSkill};
pub use manifest::{
    check_version_compatibility, validate_descriptor, ExtensionManifest, PackageDescriptor,
    Permission, PermissionSet,
};
pub use mcp::{InMemoryMcpServerHost, McpServerHost};
pub use plugin::{FnToolHandler, Plugin, PluginHooks, PluginTool, ProviderAdapter, ToolHandler};
pub use registry::{InstallSource, PluginState, RegistryEntry, RegistryStore};
pub use runtime::{DefaultModuleLoader, ModuleLoader, NativeModules, ProcessModuleLoader};

use crate::config::HostConfig;
use std::sync::Arc;

/// Module loader for a stand-alone host: process-backed plugins only
pub fn process_module_loader(config: &HostConfig) -> Arc<dyn ModuleLoader> {
    Arc::new(DefaultModuleLoader::new(
        NativeModules::new(),
        ProcessModuleLoader::new(config.runtime.call_timeout()),
    ))
}
