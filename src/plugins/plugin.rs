//! The interface every loaded plugin is adapted to
//!
//! Each optional contribution is an overridable method whose default means
//! "not offered". The manager never treats absence as an error.

use super::context::{PluginContext, ToolExecutionContext};
use super::types::{
    AssistantResponse, HookContext, McpServerDescriptor, MessageDecision, OutgoingMessage, Skill,
    SystemPrompt, ToolCall, ToolCallDecision, ToolExecutionResult, ToolSpec, DEFAULT_PRIORITY,
};
use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// A loaded plugin instance
#[async_trait]
pub trait Plugin: Send + Sync {
    fn id(&self) -> &str;

    fn version(&self) -> &str;

    /// Lower runs earlier on the way in
    fn priority(&self) -> i32 {
        DEFAULT_PRIORITY
    }

    async fn activate(&self, ctx: &PluginContext) -> Result<()>;

    async fn deactivate(&self) -> Result<()> {
        Ok(())
    }

    fn system_prompts(&self) -> Vec<SystemPrompt> {
        Vec::new()
    }

    fn skills(&self) -> Vec<Skill> {
        Vec::new()
    }

    fn tools(&self) -> Vec<PluginTool> {
        Vec::new()
    }

    fn mcp_servers(&self) -> Vec<McpServerDescriptor> {
        Vec::new()
    }

    fn hooks(&self) -> Option<Arc<dyn PluginHooks>> {
        None
    }

    /// Adapter the plugin defines itself for `provider`
    fn adapter(&self, _provider: &str) -> Option<Arc<dyn ProviderAdapter>> {
        None
    }

    /// Settings changed while active; best effort
    async fn on_settings_changed(&self, _settings: &Map<String, Value>) -> Result<()> {
        Ok(())
    }
}

/// Message and tool-call interception points
///
/// Defaults pass everything through untouched.
#[async_trait]
pub trait PluginHooks: Send + Sync {
    async fn before_message(
        &self,
        _ctx: &HookContext,
        message: OutgoingMessage,
    ) -> Result<MessageDecision> {
        Ok(MessageDecision::proceed(message))
    }

    async fn after_response(
        &self,
        _ctx: &HookContext,
        response: AssistantResponse,
    ) -> Result<AssistantResponse> {
        Ok(response)
    }

    async fn before_tool_call(
        &self,
        _ctx: &HookContext,
        call: ToolCall,
    ) -> Result<ToolCallDecision> {
        Ok(ToolCallDecision::proceed(call.params))
    }

    /// Notification only; the result is already final
    async fn after_tool_call(
        &self,
        _ctx: &HookContext,
        _call: &ToolCall,
        _result: &ToolExecutionResult,
    ) -> Result<()> {
        Ok(())
    }
}

/// Per-provider request/response transforms and contributions
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn transform_request(&self, body: Value) -> Result<Value> {
        Ok(body)
    }

    async fn transform_response(&self, body: Value) -> Result<Value> {
        Ok(body)
    }

    fn tools(&self) -> Vec<ToolSpec> {
        Vec::new()
    }

    fn system_prompt(&self) -> Option<String> {
        None
    }
}

/// Callable behind a plugin tool
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, params: Value, ctx: ToolExecutionContext) -> Result<ToolExecutionResult>;
}

type HandlerFn =
    dyn Fn(Value, ToolExecutionContext) -> BoxFuture<'static, Result<ToolExecutionResult>>
        + Send
        + Sync;

/// Closure-backed handler
pub struct FnToolHandler(Box<HandlerFn>);

impl FnToolHandler {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Value, ToolExecutionContext) -> BoxFuture<'static, Result<ToolExecutionResult>>
            + Send
            + Sync
            + 'static,
    {
        Self(Box::new(f))
    }
}

#[async_trait]
impl ToolHandler for FnToolHandler {
    async fn call(&self, params: Value, ctx: ToolExecutionContext) -> Result<ToolExecutionResult> {
        (self.0)(params, ctx).await
    }
}

/// A tool contributed by a plugin
#[derive(Clone)]
pub struct PluginTool {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub providers: Option<Vec<String>>,
    pub handler: Arc<dyn ToolHandler>,
}

impl PluginTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            providers: None,
            handler,
        }
    }

    pub fn for_providers<I, S>(mut self, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.providers = Some(providers.into_iter().map(Into::into).collect());
        self
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

impl fmt::Debug for PluginTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("providers", &self.providers)
            .finish_non_exhaustive()
    }
}
