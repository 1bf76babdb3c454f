//! Hook and adapter pipelines
//!
//! Stages run one after another in priority order (ascending on the way in,
//! descending on the way out). A failing stage is logged and skipped; its
//! input flows on to the next stage unchanged.

use super::PluginManager;
use crate::plugins::types::{
    AssistantResponse, HookContext, MessagePipelineResult, OutgoingMessage, ToolCall,
    ToolCallPipelineResult, ToolExecutionResult,
};
use serde_json::Value;

impl PluginManager {
    /// Ascending priority; the first cancellation stops the pipeline
    pub async fn run_before_message_hooks(
        &self,
        ctx: &HookContext,
        message: OutgoingMessage,
    ) -> MessagePipelineResult {
        let mut message = message;
        for (id, active) in self.ordered_active() {
            let Some(hooks) = active.module.instance.hooks() else {
                continue;
            };
            match hooks.before_message(ctx, message.clone()).await {
                Ok(decision) => {
                    message = decision.message;
                    if decision.cancel {
                        tracing::info!("Message cancelled by plugin {}", id);
                        return MessagePipelineResult {
                            message,
                            cancelled: true,
                            cancelled_by: Some(id.to_string()),
                        };
                    }
                }
                Err(e) => active
                    .context
                    .logger
                    .warn(format!("before-message hook failed: {:#}", e)),
            }
        }
        MessagePipelineResult {
            message,
            cancelled: false,
            cancelled_by: None,
        }
    }

    /// Descending priority, so the outermost plugin sees the response last
    pub async fn run_after_response_hooks(
        &self,
        ctx: &HookContext,
        response: AssistantResponse,
    ) -> AssistantResponse {
        let mut response = response;
        for (_, active) in self.ordered_active().into_iter().rev() {
            let Some(hooks) = active.module.instance.hooks() else {
                continue;
            };
            match hooks.after_response(ctx, response.clone()).await {
                Ok(next) => response = next,
                Err(e) => active
                    .context
                    .logger
                    .warn(format!("after-response hook failed: {:#}", e)),
            }
        }
        response
    }

    /// Ascending priority; may rewrite params or cancel with a reason
    pub async fn run_before_tool_call_hooks(
        &self,
        ctx: &HookContext,
        call: ToolCall,
    ) -> ToolCallPipelineResult {
        let name = call.name;
        let mut params = call.params;
        for (id, active) in self.ordered_active() {
            let Some(hooks) = active.module.instance.hooks() else {
                continue;
            };
            let staged = ToolCall {
                name: name.clone(),
                params: params.clone(),
            };
            match hooks.before_tool_call(ctx, staged).await {
                Ok(decision) => {
                    params = decision.params;
                    if let Some(reason) = decision.cancel_reason {
                        tracing::info!("Tool call {} cancelled by plugin {}: {}", name, id, reason);
                        return ToolCallPipelineResult {
                            params,
                            cancelled: true,
                            reason: Some(reason),
                            cancelled_by: Some(id.to_string()),
                        };
                    }
                }
                Err(e) => active
                    .context
                    .logger
                    .warn(format!("before-tool-call hook failed: {:#}", e)),
            }
        }
        ToolCallPipelineResult {
            params,
            cancelled: false,
            reason: None,
            cancelled_by: None,
        }
    }

    /// Ascending priority notification; the result cannot be changed
    pub async fn run_after_tool_call_hooks(
        &self,
        ctx: &HookContext,
        call: &ToolCall,
        result: &ToolExecutionResult,
    ) {
        for (_, active) in self.ordered_active() {
            let Some(hooks) = active.module.instance.hooks() else {
                continue;
            };
            if let Err(e) = hooks.after_tool_call(ctx, call, result).await {
                active
                    .context
                    .logger
                    .warn(format!("after-tool-call hook failed: {:#}", e));
            }
        }
    }

    /// Outgoing provider request body through every adapter, ascending
    pub async fn transform_request(&self, provider: &str, body: Value) -> Value {
        let mut body = body;
        for (_, active) in self.ordered_active() {
            let Some(adapter) = active.module.adapter(provider) else {
                continue;
            };
            match adapter.transform_request(body.clone()).await {
                Ok(next) => body = next,
                Err(e) => active
                    .context
                    .logger
                    .warn(format!("{} request transform failed: {:#}", provider, e)),
            }
        }
        body
    }

    /// Incoming provider response body through every adapter, descending
    pub async fn transform_response(&self, provider: &str, body: Value) -> Value {
        let mut body = body;
        for (_, active) in self.ordered_active().into_iter().rev() {
            let Some(adapter) = active.module.adapter(provider) else {
                continue;
            };
            match adapter.transform_response(body.clone()).await {
                Ok(next) => body = next,
                Err(e) => active
                    .context
                    .logger
                    .warn(format!("{} response transform failed: {:#}", provider, e)),
            }
        }
        body
    }
}
