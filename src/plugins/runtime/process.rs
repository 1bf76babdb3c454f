//! Process-backed plugins
//!
//! The entry point is an executable. Each call spawns it once, writes a
//! single JSON request line to stdin, and reads the JSON result from stdout:
//!
//! ```json
//! {"method": "hook", "plugin_id": "pdf-tools", "payload": {...}}
//! ```
//!
//! A non-zero exit is a failed call and its stderr becomes the error. Every
//! call is bounded by the configured timeout. Methods: `describe`,
//! `activate`, `deactivate`, `settings`, `hook`, `tool`, `adapter`.

use super::{ModuleLoader, ModuleRequest};
use crate::plugins::context::{PluginContext, ToolExecutionContext};
use crate::plugins::plugin::{Plugin, PluginHooks, PluginTool, ProviderAdapter, ToolHandler};
use crate::plugins::types::{
    AssistantResponse, HookContext, McpServerDescriptor, MessageDecision, OutgoingMessage, Skill,
    SystemPrompt, ToolCall, ToolCallDecision, ToolExecutionResult, ToolSpec, DEFAULT_PRIORITY,
};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};

const HOOK_BEFORE_MESSAGE: &str = "before_message";
const HOOK_AFTER_RESPONSE: &str = "after_response";
const HOOK_BEFORE_TOOL_CALL: &str = "before_tool_call";
const HOOK_AFTER_TOOL_CALL: &str = "after_tool_call";

/// Loads plugins and adapters that run as child processes
#[derive(Debug, Clone)]
pub struct ProcessModuleLoader {
    timeout: Duration,
}

impl ProcessModuleLoader {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ModuleLoader for ProcessModuleLoader {
    async fn load_plugin(&self, request: &ModuleRequest) -> Result<Arc<dyn Plugin>> {
        let runner = ProcessRunner {
            entry: request.entry_point.clone(),
            cwd: request.plugin_dir.clone(),
            plugin_id: request.descriptor.name.clone(),
            timeout: self.timeout,
        };
        let plugin = ProcessPlugin::describe(runner).await?;
        Ok(Arc::new(plugin))
    }

    async fn load_adapter(
        &self,
        request: &ModuleRequest,
        provider: &str,
        module_path: &Path,
    ) -> Result<Arc<dyn ProviderAdapter>> {
        let runner = Arc::new(ProcessRunner {
            entry: module_path.to_path_buf(),
            cwd: request.plugin_dir.clone(),
            plugin_id: request.descriptor.name.clone(),
            timeout: self.timeout,
        });
        let raw = runner
            .call("describe", json!({ "provider": provider }))
            .await
            .with_context(|| format!("Adapter module {} failed to describe", module_path.display()))?;
        let description: AdapterDescription = serde_json::from_value(raw)
            .context("Adapter module returned an invalid description")?;
        Ok(Arc::new(ProcessAdapter::new(runner, provider, description)))
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
struct ProcessDescription {
    #[serde(default)]
    id: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    priority: Option<i32>,
    #[serde(default)]
    system_prompts: Vec<SystemPrompt>,
    #[serde(default)]
    skills: Vec<Skill>,
    #[serde(default)]
    tools: Vec<ToolDescription>,
    #[serde(default)]
    mcp_servers: Vec<McpServerDescriptor>,
    #[serde(default)]
    hooks: Vec<String>,
    #[serde(default)]
    adapters: Vec<AdapterDescription>,
}

#[derive(Debug, Clone, Deserialize)]
struct ToolDescription {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    parameters: Value,
    #[serde(default)]
    providers: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AdapterDescription {
    #[serde(default)]
    provider: String,
    #[serde(default)]
    tools: Vec<ToolSpec>,
    #[serde(default)]
    system_prompt: Option<String>,
}

#[derive(Serialize)]
struct ProcessRequest<'a> {
    method: &'a str,
    plugin_id: &'a str,
    payload: Value,
}

// =============================================================================
// Runner
// =============================================================================

#[derive(Debug, Clone)]
struct ProcessRunner {
    entry: PathBuf,
    cwd: PathBuf,
    plugin_id: String,
    timeout: Duration,
}

impl ProcessRunner {
    fn spawn(&self) -> Result<Child> {
        let configure = |cmd: &mut Command| {
            cmd.current_dir(&self.cwd)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);
        };

        let mut direct = Command::new(&self.entry);
        configure(&mut direct);
        match direct.spawn() {
            Ok(child) => Ok(child),
            Err(direct_err) => {
                // Not executable: try it as a shell script
                let mut fallback = Command::new("sh");
                fallback.arg(&self.entry);
                configure(&mut fallback);
                fallback.spawn().map_err(|fallback_err| {
                    anyhow!(
                        "failed to spawn plugin process {}: {} (sh fallback: {})",
                        self.entry.display(),
                        direct_err,
                        fallback_err
                    )
                })
            }
        }
    }

    async fn call(&self, method: &str, payload: Value) -> Result<Value> {
        let request = ProcessRequest {
            method,
            plugin_id: &self.plugin_id,
            payload,
        };
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');

        let mut child = self.spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            // A process that exits without reading is judged by its exit status
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                tracing::debug!("plugin process '{}' did not take its request: {}", self.plugin_id, e);
            }
            stdin.flush().await.ok();
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output.context("failed to collect plugin process output")?,
            Err(_) => bail!(
                "plugin process '{}' timed out after {}s during '{}'",
                self.plugin_id,
                self.timeout.as_secs(),
                method
            ),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "plugin process '{}' failed during '{}' (exit {}): {}",
                self.plugin_id,
                method,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        if stdout.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(stdout).with_context(|| {
            format!(
                "plugin process '{}' returned invalid JSON for '{}'",
                self.plugin_id, method
            )
        })
    }
}

// =============================================================================
// Plugin
// =============================================================================

/// A plugin living in a child process
pub struct ProcessPlugin {
    runner: Arc<ProcessRunner>,
    description: ProcessDescription,
}

impl ProcessPlugin {
    async fn describe(runner: ProcessRunner) -> Result<Self> {
        let raw = runner.call("describe", json!({})).await?;
        let description: ProcessDescription =
            serde_json::from_value(raw).context("plugin returned an invalid description")?;
        Ok(Self {
            runner: Arc::new(runner),
            description,
        })
    }
}

#[async_trait]
impl Plugin for ProcessPlugin {
    fn id(&self) -> &str {
        &self.description.id
    }

    fn version(&self) -> &str {
        &self.description.version
    }

    fn priority(&self) -> i32 {
        self.description.priority.unwrap_or(DEFAULT_PRIORITY)
    }

    async fn activate(&self, ctx: &PluginContext) -> Result<()> {
        let payload = json!({
            "workspace": ctx.workspace,
            "install_dir": ctx.install_dir,
            "settings": ctx.settings,
            "permissions": ctx.permissions,
        });
        self.runner.call("activate", payload).await.map(|_| ())
    }

    async fn deactivate(&self) -> Result<()> {
        self.runner.call("deactivate", json!({})).await.map(|_| ())
    }

    fn system_prompts(&self) -> Vec<SystemPrompt> {
        self.description.system_prompts.clone()
    }

    fn skills(&self) -> Vec<Skill> {
        self.description.skills.clone()
    }

    fn tools(&self) -> Vec<PluginTool> {
        self.description
            .tools
            .iter()
            .map(|tool| PluginTool {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.parameters.clone(),
                providers: tool.providers.clone(),
                handler: Arc::new(ProcessToolHandler {
                    runner: self.runner.clone(),
                    name: tool.name.clone(),
                }),
            })
            .collect()
    }

    fn mcp_servers(&self) -> Vec<McpServerDescriptor> {
        self.description.mcp_servers.clone()
    }

    fn hooks(&self) -> Option<Arc<dyn PluginHooks>> {
        if self.description.hooks.is_empty() {
            return None;
        }
        Some(Arc::new(ProcessHooks {
            runner: self.runner.clone(),
            declared: self.description.hooks.iter().cloned().collect(),
        }))
    }

    fn adapter(&self, provider: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.description
            .adapters
            .iter()
            .find(|a| a.provider == provider)
            .map(|a| {
                Arc::new(ProcessAdapter::new(self.runner.clone(), provider, a.clone()))
                    as Arc<dyn ProviderAdapter>
            })
    }

    async fn on_settings_changed(&self, settings: &Map<String, Value>) -> Result<()> {
        self.runner
            .call("settings", json!({ "settings": settings }))
            .await
            .map(|_| ())
    }
}

struct ProcessToolHandler {
    runner: Arc<ProcessRunner>,
    name: String,
}

#[async_trait]
impl ToolHandler for ProcessToolHandler {
    async fn call(&self, params: Value, ctx: ToolExecutionContext) -> Result<ToolExecutionResult> {
        let payload = json!({
            "name": self.name,
            "params": params,
            "context": {
                "workspace": ctx.workspace,
                "provider": ctx.provider,
                "conversation_id": ctx.conversation_id,
                "settings": ctx.settings,
                "install_dir": ctx.install_dir,
            }
        });
        let raw = self.runner.call("tool", payload).await?;
        // Bare values are treated as successful output
        Ok(serde_json::from_value(raw.clone()).unwrap_or_else(|_| ToolExecutionResult::success(raw)))
    }
}

struct ProcessHooks {
    runner: Arc<ProcessRunner>,
    declared: HashSet<String>,
}

impl ProcessHooks {
    async fn invoke(&self, hook: &str, ctx: &HookContext, payload: Value) -> Result<Value> {
        self.runner
            .call("hook", json!({ "hook": hook, "context": ctx, "payload": payload }))
            .await
    }
}

#[async_trait]
impl PluginHooks for ProcessHooks {
    async fn before_message(
        &self,
        ctx: &HookContext,
        message: OutgoingMessage,
    ) -> Result<MessageDecision> {
        if !self.declared.contains(HOOK_BEFORE_MESSAGE) {
            return Ok(MessageDecision::proceed(message));
        }
        let raw = self
            .invoke(HOOK_BEFORE_MESSAGE, ctx, serde_json::to_value(&message)?)
            .await?;
        Ok(serde_json::from_value(raw)?)
    }

    async fn after_response(
        &self,
        ctx: &HookContext,
        response: AssistantResponse,
    ) -> Result<AssistantResponse> {
        if !self.declared.contains(HOOK_AFTER_RESPONSE) {
            return Ok(response);
        }
        let raw = self
            .invoke(HOOK_AFTER_RESPONSE, ctx, serde_json::to_value(&response)?)
            .await?;
        Ok(serde_json::from_value(raw)?)
    }

    async fn before_tool_call(&self, ctx: &HookContext, call: ToolCall) -> Result<ToolCallDecision> {
        if !self.declared.contains(HOOK_BEFORE_TOOL_CALL) {
            return Ok(ToolCallDecision::proceed(call.params));
        }
        let raw = self
            .invoke(HOOK_BEFORE_TOOL_CALL, ctx, serde_json::to_value(&call)?)
            .await?;
        Ok(serde_json::from_value(raw)?)
    }

    async fn after_tool_call(
        &self,
        ctx: &HookContext,
        call: &ToolCall,
        result: &ToolExecutionResult,
    ) -> Result<()> {
        if !self.declared.contains(HOOK_AFTER_TOOL_CALL) {
            return Ok(());
        }
        self.invoke(
            HOOK_AFTER_TOOL_CALL,
            ctx,
            json!({ "call": call, "result": result }),
        )
        .await
        .map(|_| ())
    }
}

/// Provider adapter answered by a child process
pub struct ProcessAdapter {
    runner: Arc<ProcessRunner>,
    provider: String,
    tools: Vec<ToolSpec>,
    system_prompt: Option<String>,
}

impl ProcessAdapter {
    fn new(runner: Arc<ProcessRunner>, provider: &str, description: AdapterDescription) -> Self {
        Self {
            runner,
            provider: provider.to_string(),
            tools: description.tools,
            system_prompt: description.system_prompt,
        }
    }

    async fn transform(&self, operation: &str, body: Value) -> Result<Value> {
        self.runner
            .call(
                "adapter",
                json!({ "provider": self.provider, "operation": operation, "body": body }),
            )
            .await
    }
}

#[async_trait]
impl ProviderAdapter for ProcessAdapter {
    async fn transform_request(&self, body: Value) -> Result<Value> {
        self.transform("transform_request", body).await
    }

    async fn transform_response(&self, body: Value) -> Result<Value> {
        self.transform("transform_response", body).await
    }

    fn tools(&self) -> Vec<ToolSpec> {
        self.tools.clone()
    }

    fn system_prompt(&self) -> Option<String> {
        self.system_prompt.clone()
    }
}
