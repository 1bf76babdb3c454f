//! Declarative plugin built from parts
//!
//! Covers the common case of a plugin that contributes a fixed set of
//! prompts, skills, tools and hooks, so authors do not have to implement
//! [`Plugin`] by hand. The activation context is retained for later use by
//! the plugin's own handlers.

use super::context::PluginContext;
use super::plugin::{Plugin, PluginHooks, PluginTool, ProviderAdapter};
use super::types::{McpServerDescriptor, Skill, SystemPrompt, DEFAULT_PRIORITY};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type LifecycleFn = dyn Fn(&PluginContext) -> Result<()> + Send + Sync;
type TeardownFn = dyn Fn() -> Result<()> + Send + Sync;

pub struct BasicPlugin {
    id: String,
    version: String,
    priority: i32,
    prompts: Vec<SystemPrompt>,
    skills: Vec<Skill>,
    tools: Vec<PluginTool>,
    mcp_servers: Vec<McpServerDescriptor>,
    hooks: Option<Arc<dyn PluginHooks>>,
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    on_activate: Option<Box<LifecycleFn>>,
    on_deactivate: Option<Box<TeardownFn>>,
    context: Mutex<Option<PluginContext>>,
}

impl BasicPlugin {
    pub fn builder(id: impl Into<String>, version: impl Into<String>) -> BasicPluginBuilder {
        BasicPluginBuilder {
            plugin: BasicPlugin {
                id: id.into(),
                version: version.into(),
                priority: DEFAULT_PRIORITY,
                prompts: Vec::new(),
                skills: Vec::new(),
                tools: Vec::new(),
                mcp_servers: Vec::new(),
                hooks: None,
                adapters: HashMap::new(),
                on_activate: None,
                on_deactivate: None,
                context: Mutex::new(None),
            },
        }
    }

    /// Context from the current activation, if active
    pub fn context(&self) -> Option<PluginContext> {
        self.context.lock().ok().and_then(|guard| guard.clone())
    }
}

pub struct BasicPluginBuilder {
    plugin: BasicPlugin,
}

impl BasicPluginBuilder {
    pub fn priority(mut self, priority: i32) -> Self {
        self.plugin.priority = priority;
        self
    }

    pub fn system_prompt(mut self, prompt: SystemPrompt) -> Self {
        self.plugin.prompts.push(prompt);
        self
    }

    pub fn skill(mut self, skill: Skill) -> Self {
        self.plugin.skills.push(skill);
        self
    }

    pub fn tool(mut self, tool: PluginTool) -> Self {
        self.plugin.tools.push(tool);
        self
    }

    pub fn mcp_server(mut self, server: McpServerDescriptor) -> Self {
        self.plugin.mcp_servers.push(server);
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn PluginHooks>) -> Self {
        self.plugin.hooks = Some(hooks);
        self
    }

    pub fn adapter(mut self, provider: impl Into<String>, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.plugin.adapters.insert(provider.into(), adapter);
        self
    }

    pub fn on_activate<F>(mut self, f: F) -> Self
    where
        F: Fn(&PluginContext) -> Result<()> + Send + Sync + 'static,
    {
        self.plugin.on_activate = Some(Box::new(f));
        self
    }

    pub fn on_deactivate<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.plugin.on_deactivate = Some(Box::new(f));
        self
    }

    pub fn build(self) -> BasicPlugin {
        self.plugin
    }
}

#[async_trait]
impl Plugin for BasicPlugin {
    fn id(&self) -> &str {
        &self.id
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn activate(&self, ctx: &PluginContext) -> Result<()> {
        if let Some(hook) = &self.on_activate {
            hook(ctx)?;
        }
        if let Ok(mut guard) = self.context.lock() {
            *guard = Some(ctx.clone());
        }
        Ok(())
    }

    async fn deactivate(&self) -> Result<()> {
        if let Ok(mut guard) = self.context.lock() {
            guard.take();
        }
        match &self.on_deactivate {
            Some(hook) => hook(),
            None => Ok(()),
        }
    }

    fn system_prompts(&self) -> Vec<SystemPrompt> {
        self.prompts.clone()
    }

    fn skills(&self) -> Vec<Skill> {
        self.skills.clone()
    }

    fn tools(&self) -> Vec<PluginTool> {
        self.tools.clone()
    }

    fn mcp_servers(&self) -> Vec<McpServerDescriptor> {
        self.mcp_servers.clone()
    }

    fn hooks(&self) -> Option<Arc<dyn PluginHooks>> {
        self.hooks.clone()
    }

    fn adapter(&self, provider: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(provider).cloned()
    }
}
