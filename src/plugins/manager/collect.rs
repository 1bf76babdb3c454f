//! Capability collection across active plugins
//!
//! Everything is read fresh from the plugin instances on each call.

use super::PluginManager;
use crate::plugins::types::{
    provider_matches, McpServerDescriptor, McpTransport, Skill, SkillSource, ToolExecutionResult,
    ToolSpec,
};
use serde_json::Value;
use std::path::Path;

const TOOL_NAMESPACE: &str = "plugin";

/// A skill tagged with the plugin it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSkill {
    pub plugin_id: String,
    /// Bundled directories are absolute
    pub skill: Skill,
}

/// An MCP server tagged with the plugin it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginMcpServer {
    pub plugin_id: String,
    /// Bundled commands are absolute
    pub server: McpServerDescriptor,
}

/// `plugin:<id>:<tool>`
pub fn namespaced_tool_name(plugin_id: &str, tool: &str) -> String {
    format!("{}:{}:{}", TOOL_NAMESPACE, plugin_id, tool)
}

/// Split a namespaced tool name into plugin id and tool name
pub fn parse_namespaced_tool(name: &str) -> Option<(&str, &str)> {
    let mut parts = name.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(TOOL_NAMESPACE), Some(id), Some(tool))
            if !id.is_empty() && !tool.is_empty() && !tool.contains(':') =>
        {
            Some((id, tool))
        }
        _ => None,
    }
}

/// Make a bundled server's command absolute against `install_dir`
pub(super) fn resolve_bundled(install_dir: &Path, server: &McpServerDescriptor) -> McpServerDescriptor {
    let mut resolved = server.clone();
    if server.bundled {
        if let McpTransport::Stdio { command, .. } = &mut resolved.transport {
            if Path::new(command.as_str()).is_relative() {
                *command = install_dir.join(command.as_str()).to_string_lossy().to_string();
            }
        }
    }
    resolved
}

impl PluginManager {
    fn effective_provider<'a>(&'a self, provider: Option<&'a str>) -> Option<&'a str> {
        provider.or(self.active_provider.as_deref())
    }

    /// Prompt texts for the next turn, ascending by prompt priority
    pub fn collect_system_prompts(&self, provider: Option<&str>) -> Vec<String> {
        let provider = self.effective_provider(provider);
        let mut prompts: Vec<(i32, String)> = self
            .ordered_active()
            .into_iter()
            .flat_map(|(_, active)| active.module.instance.system_prompts())
            .filter(|p| provider_matches(p.providers.as_deref(), provider))
            .map(|p| (p.priority, p.content))
            .collect();
        prompts.sort_by_key(|(priority, _)| *priority);
        prompts.into_iter().map(|(_, content)| content).collect()
    }

    /// Tool definitions with names rewritten to `plugin:<id>:<tool>`
    pub fn collect_plugin_tools(&self, provider: Option<&str>) -> Vec<ToolSpec> {
        let provider = self.effective_provider(provider);
        let mut tools = Vec::new();
        for (id, active) in self.ordered_active() {
            for tool in active.module.instance.tools() {
                if !provider_matches(tool.providers.as_deref(), provider) {
                    continue;
                }
                let mut spec = tool.spec();
                spec.name = namespaced_tool_name(id, &tool.name);
                tools.push(spec);
            }
        }
        tools
    }

    /// Run a namespaced tool; failures come back as a failed result
    pub async fn execute_tool(
        &self,
        namespaced_name: &str,
        params: Value,
        conversation_id: &str,
    ) -> ToolExecutionResult {
        let Some((plugin_id, tool_name)) = parse_namespaced_tool(namespaced_name) else {
            return ToolExecutionResult::failure(format!(
                "Invalid plugin tool name '{}': expected plugin:<id>:<tool>",
                namespaced_name
            ));
        };

        let Some(active) = self.active.get(plugin_id) else {
            return ToolExecutionResult::failure(format!(
                "Plugin '{}' is not active",
                plugin_id
            ));
        };
        let Some(entry) = self.registry.get(plugin_id) else {
            return ToolExecutionResult::failure(format!(
                "Plugin '{}' is not installed",
                plugin_id
            ));
        };

        let Some(tool) = active
            .module
            .instance
            .tools()
            .into_iter()
            .find(|t| t.name == tool_name)
        else {
            return ToolExecutionResult::failure(format!(
                "Plugin '{}' has no tool named '{}'",
                plugin_id, tool_name
            ));
        };

        let ctx = self
            .contexts
            .tool_context(entry, self.active_provider.as_deref(), conversation_id);
        let logger = ctx.logger.clone();
        match tool.handler.call(params, ctx).await {
            Ok(result) => result,
            Err(e) => {
                logger.error(format!("tool '{}' failed: {:#}", tool_name, e));
                ToolExecutionResult::failure(format!("Tool '{}' failed: {:#}", tool_name, e))
            }
        }
    }

    /// Declared MCP servers, bundled commands made absolute
    pub fn collect_plugin_mcp_servers(&self) -> Vec<PluginMcpServer> {
        self.ordered_active()
            .into_iter()
            .flat_map(|(id, active)| {
                let install_dir = active.context.install_dir.clone();
                active
                    .module
                    .instance
                    .mcp_servers()
                    .into_iter()
                    .map(move |server| PluginMcpServer {
                        plugin_id: id.to_string(),
                        server: resolve_bundled(&install_dir, &server),
                    })
            })
            .collect()
    }

    /// Every active plugin's skills, bundled paths made absolute
    pub fn collect_skills(&self) -> Vec<PluginSkill> {
        self.ordered_active()
            .into_iter()
            .flat_map(|(id, active)| {
                let install_dir = active.context.install_dir.clone();
                active
                    .module
                    .instance
                    .skills()
                    .into_iter()
                    .map(move |mut skill| {
                        if let SkillSource::Bundled(path) = &mut skill.source {
                            if path.is_relative() {
                                *path = install_dir.join(&*path);
                            }
                        }
                        PluginSkill {
                            plugin_id: id.to_string(),
                            skill,
                        }
                    })
            })
            .collect()
    }

    /// Provider-specific tool definitions from adapters
    pub fn collect_adapter_tools(&self, provider: &str) -> Vec<ToolSpec> {
        self.ordered_active()
            .into_iter()
            .filter_map(|(_, active)| active.module.adapter(provider))
            .flat_map(|adapter| adapter.tools())
            .collect()
    }

    /// Provider-specific prompt fragments from adapters
    pub fn collect_adapter_prompts(&self, provider: &str) -> Vec<String> {
        self.ordered_active()
            .into_iter()
            .filter_map(|(_, active)| active.module.adapter(provider))
            .filter_map(|adapter| adapter.system_prompt())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;

    #[test]
    fn test_parse_namespaced_tool() {
        assert_eq!(
            parse_namespaced_tool("plugin:pdf-tools:convert"),
            Some(("pdf-tools", "convert"))
        );
        assert_eq!(
            parse_namespaced_tool("plugin:@acme/x:run"),
            Some(("@acme/x", "run"))
        );
        assert_eq!(parse_namespaced_tool("pdf-tools:convert"), None);
        assert_eq!(parse_namespaced_tool("plugin::convert"), None);
        assert_eq!(parse_namespaced_tool("plugin:pdf-tools:"), None);
        assert_eq!(parse_namespaced_tool("plugin:a:b:c"), None);
        assert_eq!(parse_namespaced_tool("tool:a:b"), None);
    }

    #[test]
    fn test_resolve_bundled_command() {
        let server = McpServerDescriptor {
            name: "pdf".into(),
            transport: McpTransport::Stdio {
                command: "servers/pdf".into(),
                args: vec![],
                env: HashMap::new(),
            },
            bundled: true,
        };
        let resolved = resolve_bundled(Path::new("/opt/plugins/pdf-tools"), &server);
        match resolved.transport {
            McpTransport::Stdio { command, .. } => {
                assert_eq!(PathBuf::from(command), PathBuf::from("/opt/plugins/pdf-tools/servers/pdf"))
            }
            other => panic!("unexpected transport: {:?}", other),
        }

        let external = McpServerDescriptor {
            bundled: false,
            ..server
        };
        assert_eq!(resolve_bundled(Path::new("/opt"), &external), external);
    }
}
