//! Contributed capability and hook payload types
//!
//! Plain data exchanged between the manager and plugin instances. Plugins
//! hand these out fresh on every collection call.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;

/// Priority used when a plugin or prompt does not declare one
pub const DEFAULT_PRIORITY: i32 = 100;

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

/// Whether an optional provider filter admits `provider`
///
/// No filter admits everything. A filter with no effective provider admits
/// nothing, since there is nothing to match against.
pub fn provider_matches(filter: Option<&[String]>, provider: Option<&str>) -> bool {
    match (filter, provider) {
        (None, _) => true,
        (Some(list), _) if list.is_empty() => true,
        (Some(list), Some(p)) => list.iter().any(|allowed| allowed == p),
        (Some(_), None) => false,
    }
}

/// Text prepended to the next conversation turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemPrompt {
    pub content: String,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub providers: Option<Vec<String>>,
}

impl SystemPrompt {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            priority: DEFAULT_PRIORITY,
            providers: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn for_providers<I, S>(mut self, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.providers = Some(providers.into_iter().map(Into::into).collect());
        self
    }
}

/// Body of a skill: inline text or a bundled directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillSource {
    /// Skill text carried by the plugin itself
    Inline(String),
    /// Directory of instructions and scripts, relative to the install dir
    Bundled(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub source: SkillSource,
}

impl Skill {
    pub fn inline(
        name: impl Into<String>,
        description: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            source: SkillSource::Inline(body.into()),
        }
    }

    pub fn bundled(
        name: impl Into<String>,
        description: impl Into<String>,
        dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            source: SkillSource::Bundled(dir.into()),
        }
    }
}

/// Launch configuration for a companion-protocol (MCP) server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpTransport {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Http {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

/// Companion-protocol server a plugin wants the host to run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerDescriptor {
    pub name: String,
    pub transport: McpTransport,
    /// Command path is relative to the plugin's install directory
    #[serde(default)]
    pub bundled: bool,
}

/// Provider-facing tool shape (no handler attached)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object_schema")]
    pub parameters: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// What a tool handler returns to the manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    pub success: bool,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ToolExecutionResult {
    pub fn success(data: impl Into<Value>) -> Self {
        Self {
            success: true,
            data: Some(data.into()),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

// =============================================================================
// Hook payloads
// =============================================================================

/// Outgoing user message seen by before-message hooks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub content: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl OutgoingMessage {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

/// Assistant response seen by after-response hooks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantResponse {
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl AssistantResponse {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

/// A tool call as seen by tool hooks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub params: Value,
}

/// Per-call information shared with every hook
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HookContext {
    pub conversation_id: String,
    #[serde(default)]
    pub provider: Option<String>,
    pub workspace: PathBuf,
}

/// A before-message hook's verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDecision {
    pub message: OutgoingMessage,
    #[serde(default)]
    pub cancel: bool,
}

impl MessageDecision {
    pub fn proceed(message: OutgoingMessage) -> Self {
        Self {
            message,
            cancel: false,
        }
    }

    pub fn cancel(message: OutgoingMessage) -> Self {
        Self {
            message,
            cancel: true,
        }
    }
}

/// A before-tool-call hook's verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDecision {
    pub params: Value,
    /// Set to cancel the call; surfaced to the user
    #[serde(default)]
    pub cancel_reason: Option<String>,
}

impl ToolCallDecision {
    pub fn proceed(params: Value) -> Self {
        Self {
            params,
            cancel_reason: None,
        }
    }

    pub fn cancel(params: Value, reason: impl Into<String>) -> Self {
        Self {
            params,
            cancel_reason: Some(reason.into()),
        }
    }
}

/// Outcome of the whole before-message pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct MessagePipelineResult {
    /// Message after the last stage that ran
    pub message: OutgoingMessage,
    pub cancelled: bool,
    /// Plugin that cancelled, if any
    pub cancelled_by: Option<String>,
}

/// Outcome of the whole before-tool-call pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallPipelineResult {
    pub params: Value,
    pub cancelled: bool,
    pub reason: Option<String>,
    pub cancelled_by: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_provider_filter() {
        let filter = vec!["claude".to_string(), "gemini".to_string()];
        assert!(provider_matches(None, Some("codex")));
        assert!(provider_matches(None, None));
        assert!(provider_matches(Some(filter.as_slice()), Some("claude")));
        assert!(!provider_matches(Some(filter.as_slice()), Some("codex")));
        assert!(!provider_matches(Some(filter.as_slice()), None));
        assert!(provider_matches(Some(&[][..]), Some("codex")));
    }

    #[test]
    fn test_system_prompt_default_priority_on_deserialize() {
        let prompt: SystemPrompt = serde_json::from_value(json!({ "content": "be terse" })).unwrap();
        assert_eq!(prompt.priority, DEFAULT_PRIORITY);
        assert!(prompt.providers.is_none());
    }

    #[test]
    fn test_mcp_descriptor_wire_shape() {
        let server: McpServerDescriptor = serde_json::from_value(json!({
            "name": "pdf",
            "bundled": true,
            "transport": { "type": "stdio", "command": "servers/pdf", "args": ["--stdio"] }
        }))
        .unwrap();
        assert!(server.bundled);
        match server.transport {
            McpTransport::Stdio { command, args, .. } => {
                assert_eq!(command, "servers/pdf");
                assert_eq!(args, vec!["--stdio"]);
            }
            other => panic!("unexpected transport: {:?}", other),
        }
    }
}
