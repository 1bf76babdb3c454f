//! Plugin error types
//!
//! Validation failures are reported field by field so the user can fix a
//! manifest in one pass. Everything else carries a single message.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A single field-attributed manifest problem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Dotted path of the offending field, e.g. `extension.permissions[2]`
    pub field: String,
    /// What is wrong with it
    pub message: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors raised while installing, loading, or managing plugins
#[derive(Debug, Error)]
pub enum PluginError {
    /// The package descriptor failed schema validation
    #[error("Invalid plugin manifest: {}", join_issues(.0))]
    Validation(Vec<ValidationIssue>),

    /// The host is older than the plugin's minimum host version
    #[error("Plugin requires host version {required} or newer (host is {host})")]
    IncompatibleHost { required: String, host: String },

    /// The declared entry point does not exist
    #[error("Plugin entry point not found: {}", .0.display())]
    EntryPointMissing(PathBuf),

    /// The loaded module does not conform to the plugin interface
    #[error("Invalid plugin module: {0}")]
    InvalidModule(String),

    /// An external install command exited unsuccessfully
    #[error("Install failed: {0}")]
    InstallFailed(String),

    /// An external install command exceeded its time budget
    #[error("Install command '{command}' timed out after {secs}s")]
    InstallTimedOut { command: String, secs: u64 },

    /// A repository reference is neither `owner/name` nor a URL
    #[error("Invalid repository reference: {0}")]
    InvalidRepository(String),

    #[error("Plugin '{0}' is not installed")]
    NotInstalled(String),

    #[error("Plugin '{0}' is already installed")]
    AlreadyInstalled(String),

    /// Activation threw; the message is also stored on the registry entry
    #[error("Failed to activate plugin '{id}': {message}")]
    Activation { id: String, message: String },

    /// A permission outside what the manifest requests
    #[error("Plugin '{id}' does not request permission '{permission}'")]
    PermissionNotRequested { id: String, permission: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl PluginError {
    /// Field-level issues, when this is a validation failure
    pub fn issues(&self) -> Option<&[ValidationIssue]> {
        match self {
            PluginError::Validation(issues) => Some(issues),
            _ => None,
        }
    }
}

pub type PluginResult<T> = std::result::Result<T, PluginError>;

/// Errors raised by host capability functions handed to plugins
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// An absolute path outside the workspace without `fs:global`
    #[error("Path is outside the workspace: {}", .0.display())]
    PathOutsideWorkspace(PathBuf),

    #[error("Command timed out after {0}s")]
    Timeout(u64),

    #[error("Failed to spawn command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
