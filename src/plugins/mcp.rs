//! Registration of plugin-declared companion-protocol (MCP) servers
//!
//! The host's MCP client lives outside this crate; the manager only tells it
//! which servers appeared and disappeared.

use super::types::McpServerDescriptor;
use anyhow::Result;
use std::collections::BTreeMap;

/// Sink for plugin-declared servers
pub trait McpServerHost: Send + Sync {
    /// Register `servers` for `plugin_id`, returning the names accepted
    fn register(&mut self, plugin_id: &str, servers: &[McpServerDescriptor])
        -> Result<Vec<String>>;

    /// Drop every server owned by `plugin_id`
    fn unregister(&mut self, plugin_id: &str) -> Result<()>;
}

/// Keeps servers in memory, keyed by name
///
/// A name already owned by another plugin is skipped with a warning.
#[derive(Debug, Default)]
pub struct InMemoryMcpServerHost {
    servers: BTreeMap<String, (String, McpServerDescriptor)>,
}

impl InMemoryMcpServerHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&McpServerDescriptor> {
        self.servers.get(name).map(|(_, server)| server)
    }

    pub fn owner(&self, name: &str) -> Option<&str> {
        self.servers.get(name).map(|(owner, _)| owner.as_str())
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

impl McpServerHost for InMemoryMcpServerHost {
    fn register(
        &mut self,
        plugin_id: &str,
        servers: &[McpServerDescriptor],
    ) -> Result<Vec<String>> {
        let mut accepted = Vec::new();
        for server in servers {
            match self.servers.get(&server.name) {
                Some((owner, _)) if owner != plugin_id => {
                    tracing::warn!(
                        "MCP server '{}' from plugin '{}' skipped: already provided by '{}'",
                        server.name,
                        plugin_id,
                        owner
                    );
                }
                _ => {
                    self.servers
                        .insert(server.name.clone(), (plugin_id.to_string(), server.clone()));
                    accepted.push(server.name.clone());
                }
            }
        }
        Ok(accepted)
    }

    fn unregister(&mut self, plugin_id: &str) -> Result<()> {
        self.servers.retain(|_, (owner, _)| owner != plugin_id);
        Ok(())
    }
}
