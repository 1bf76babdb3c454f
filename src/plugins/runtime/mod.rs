//! Turning a plugin directory's entry point into a [`Plugin`] instance
//!
//! A compiled host cannot import arbitrary code, so loading is an explicit
//! step behind [`ModuleLoader`]:
//! - [`NativeModules`]: factories compiled into the host, keyed by package name
//! - [`ProcessModuleLoader`]: the entry point is an executable speaking JSON
//!   over stdin/stdout
//!
//! Whatever comes back is checked for an id and version before use.

mod process;

pub use process::{ProcessAdapter, ProcessModuleLoader, ProcessPlugin};

use super::manifest::PackageDescriptor;
use super::plugin::{Plugin, ProviderAdapter};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Everything a module loader gets to look at
#[derive(Debug, Clone)]
pub struct ModuleRequest {
    pub plugin_dir: PathBuf,
    /// Resolved and known to exist
    pub entry_point: PathBuf,
    pub descriptor: PackageDescriptor,
}

impl ModuleRequest {
    pub fn package_name(&self) -> &str {
        &self.descriptor.name
    }
}

#[async_trait]
pub trait ModuleLoader: Send + Sync {
    async fn load_plugin(&self, request: &ModuleRequest) -> Result<Arc<dyn Plugin>>;

    /// Load the adapter module at `module_path` for `provider`
    async fn load_adapter(
        &self,
        request: &ModuleRequest,
        provider: &str,
        module_path: &Path,
    ) -> Result<Arc<dyn ProviderAdapter>>;
}

type PluginFactory = Arc<dyn Fn() -> Arc<dyn Plugin> + Send + Sync>;
type AdapterFactory = Arc<dyn Fn() -> Arc<dyn ProviderAdapter> + Send + Sync>;

/// Plugins compiled into the host
#[derive(Default, Clone)]
pub struct NativeModules {
    plugins: HashMap<String, PluginFactory>,
    adapters: HashMap<(String, String), AdapterFactory>,
}

impl NativeModules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the factory used for packages named `package`
    pub fn register_plugin<F>(&mut self, package: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Arc<dyn Plugin> + Send + Sync + 'static,
    {
        self.plugins.insert(package.into(), Arc::new(factory));
        self
    }

    /// Register a standalone adapter module for `package` and `provider`
    pub fn register_adapter<F>(
        &mut self,
        package: impl Into<String>,
        provider: impl Into<String>,
        factory: F,
    ) -> &mut Self
    where
        F: Fn() -> Arc<dyn ProviderAdapter> + Send + Sync + 'static,
    {
        self.adapters
            .insert((package.into(), provider.into()), Arc::new(factory));
        self
    }

    pub fn has_plugin(&self, package: &str) -> bool {
        self.plugins.contains_key(package)
    }

    pub fn has_adapter(&self, package: &str, provider: &str) -> bool {
        self.adapters
            .contains_key(&(package.to_string(), provider.to_string()))
    }
}

impl std::fmt::Debug for NativeModules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeModules")
            .field("plugins", &self.plugins.keys().collect::<Vec<_>>())
            .field("adapters", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl ModuleLoader for NativeModules {
    async fn load_plugin(&self, request: &ModuleRequest) -> Result<Arc<dyn Plugin>> {
        let factory = self.plugins.get(request.package_name()).ok_or_else(|| {
            anyhow::anyhow!("no native module registered for '{}'", request.package_name())
        })?;
        Ok(factory())
    }

    async fn load_adapter(
        &self,
        request: &ModuleRequest,
        provider: &str,
        _module_path: &Path,
    ) -> Result<Arc<dyn ProviderAdapter>> {
        let key = (request.package_name().to_string(), provider.to_string());
        let factory = self.adapters.get(&key).ok_or_else(|| {
            anyhow::anyhow!(
                "no native '{}' adapter registered for '{}'",
                provider,
                request.package_name()
            )
        })?;
        Ok(factory())
    }
}

/// Native table first, subprocess protocol for everything else
#[derive(Debug, Clone)]
pub struct DefaultModuleLoader {
    native: NativeModules,
    process: ProcessModuleLoader,
}

impl DefaultModuleLoader {
    pub fn new(native: NativeModules, process: ProcessModuleLoader) -> Self {
        Self { native, process }
    }

    pub fn native_mut(&mut self) -> &mut NativeModules {
        &mut self.native
    }
}

#[async_trait]
impl ModuleLoader for DefaultModuleLoader {
    async fn load_plugin(&self, request: &ModuleRequest) -> Result<Arc<dyn Plugin>> {
        if self.native.has_plugin(request.package_name()) {
            self.native.load_plugin(request).await
        } else {
            self.process.load_plugin(request).await
        }
    }

    async fn load_adapter(
        &self,
        request: &ModuleRequest,
        provider: &str,
        module_path: &Path,
    ) -> Result<Arc<dyn ProviderAdapter>> {
        if self.native.has_adapter(request.package_name(), provider) {
            self.native.load_adapter(request, provider, module_path).await
        } else {
            self.process.load_adapter(request, provider, module_path).await
        }
    }
}
