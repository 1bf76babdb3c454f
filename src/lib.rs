//! agent-plugin-host: extension host for conversational agents
//!
//! This library provides:
//! - Manifest validation for plugin packages
//! - Installation from a package registry, git repositories, or local paths
//! - Permission-scoped capability contexts
//! - A plugin manager with lifecycle, capability collection, and an ordered,
//!   cancelable hook and adapter pipeline

pub mod config;
pub mod plugins;
pub mod transport;

pub use config::HostConfig;
pub use plugins::{PluginError, PluginManager};
