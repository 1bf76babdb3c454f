//! Plugin manifest parsing and validation
//!
//! Every plugin directory carries a `package.json` package descriptor with an
//! `extension` block declaring:
//! - Display metadata (name, description, category)
//! - Requested permissions (closed vocabulary)
//! - Minimum host version and per-provider adapter modules
//! - A typed settings schema used to seed the plugin's settings
//!
//! Validation runs on the raw JSON before anything is trusted and reports
//! every offending field, not just the first one.

use super::error::{PluginError, PluginResult, ValidationIssue};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::{Component, Path};
use std::str::FromStr;

/// File name of the package descriptor inside a plugin directory
pub const DESCRIPTOR_FILE: &str = "package.json";

/// Key of the extension manifest block inside the descriptor
pub const MANIFEST_KEY: &str = "extension";

/// Entry point used when the descriptor has no `main`
pub const DEFAULT_ENTRY_POINT: &str = "./dist/index";

static PACKAGE_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(@[a-z0-9][a-z0-9._-]*/)?[a-z0-9][a-z0-9._-]*$").expect("valid package regex")
});

// =============================================================================
// Permissions
// =============================================================================

/// Host capabilities a plugin may request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "fs:read")]
    FsRead,
    #[serde(rename = "fs:write")]
    FsWrite,
    #[serde(rename = "fs:global")]
    FsGlobal,
    #[serde(rename = "network:fetch")]
    NetworkFetch,
    #[serde(rename = "shell:execute")]
    ShellExecute,
    #[serde(rename = "ui:panel")]
    UiPanel,
    #[serde(rename = "ui:overlay")]
    UiOverlay,
    #[serde(rename = "clipboard")]
    Clipboard,
    #[serde(rename = "mcp:server")]
    McpServer,
}

impl Permission {
    pub const ALL: [Permission; 9] = [
        Permission::FsRead,
        Permission::FsWrite,
        Permission::FsGlobal,
        Permission::NetworkFetch,
        Permission::ShellExecute,
        Permission::UiPanel,
        Permission::UiOverlay,
        Permission::Clipboard,
        Permission::McpServer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::FsRead => "fs:read",
            Permission::FsWrite => "fs:write",
            Permission::FsGlobal => "fs:global",
            Permission::NetworkFetch => "network:fetch",
            Permission::ShellExecute => "shell:execute",
            Permission::UiPanel => "ui:panel",
            Permission::UiOverlay => "ui:overlay",
            Permission::Clipboard => "clipboard",
            Permission::McpServer => "mcp:server",
        }
    }

    /// Permissions that hand the plugin process-level power
    pub fn is_dangerous(&self) -> bool {
        matches!(
            self,
            Permission::FsGlobal | Permission::ShellExecute | Permission::FsWrite
        )
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown permission '{}'", s))
    }
}

pub type PermissionSet = BTreeSet<Permission>;

// =============================================================================
// Manifest
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginCategory {
    Productivity,
    Development,
    Documents,
    Integration,
    Ai,
    #[default]
    Other,
}

impl PluginCategory {
    const NAMES: [&'static str; 6] = [
        "productivity",
        "development",
        "documents",
        "integration",
        "ai",
        "other",
    ];
}

impl fmt::Display for PluginCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PluginCategory::Productivity => "productivity",
            PluginCategory::Development => "development",
            PluginCategory::Documents => "documents",
            PluginCategory::Integration => "integration",
            PluginCategory::Ai => "ai",
            PluginCategory::Other => "other",
        };
        f.write_str(name)
    }
}

/// What kinds of contributions the plugin says it makes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ManifestCapabilities {
    pub prompts: bool,
    pub skills: bool,
    pub tools: bool,
    pub mcp_servers: bool,
    pub hooks: bool,
    pub adapters: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingType {
    String,
    Number,
    Boolean,
    Select,
}

impl SettingType {
    const NAMES: [&'static str; 4] = ["string", "number", "boolean", "select"];

    fn accepts(&self, value: &Value) -> bool {
        match self {
            SettingType::String | SettingType::Select => value.is_string(),
            SettingType::Number => value.is_number(),
            SettingType::Boolean => value.is_boolean(),
        }
    }
}

/// One typed entry of the settings schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingField {
    pub key: String,
    #[serde(rename = "type")]
    pub setting_type: SettingType,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub options: Vec<String>,
}

/// The `extension` block of a package descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionManifest {
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: PluginCategory,
    #[serde(default)]
    pub capabilities: ManifestCapabilities,
    #[serde(default)]
    pub min_host_version: Option<String>,
    /// Provider id -> adapter module path (relative to the plugin directory)
    #[serde(default)]
    pub adapters: BTreeMap<String, String>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub settings: Vec<SettingField>,
}

impl ExtensionManifest {
    /// Settings map seeded from the schema defaults
    pub fn default_settings(&self) -> Map<String, Value> {
        self.settings
            .iter()
            .filter_map(|field| {
                field
                    .default
                    .clone()
                    .map(|value| (field.key.clone(), value))
            })
            .collect()
    }

    pub fn requests(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }
}

/// A validated `package.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageDescriptor {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub main: Option<String>,
    #[serde(default)]
    pub scripts: BTreeMap<String, String>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(rename = "extension")]
    pub manifest: ExtensionManifest,
}

impl PackageDescriptor {
    /// Read and validate the descriptor inside `dir`
    pub fn load(dir: &Path) -> PluginResult<Self> {
        let path = dir.join(DESCRIPTOR_FILE);
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            PluginError::Validation(vec![ValidationIssue::new(
                DESCRIPTOR_FILE,
                format!("cannot read {}: {}", path.display(), e),
            )])
        })?;
        let value: Value = serde_json::from_str(&raw).map_err(|e| {
            PluginError::Validation(vec![ValidationIssue::new(
                DESCRIPTOR_FILE,
                format!("invalid JSON: {}", e),
            )])
        })?;
        validate_descriptor(&value).map_err(PluginError::Validation)
    }

    /// Entry point path relative to the plugin directory
    pub fn entry_point(&self) -> &str {
        self.main.as_deref().unwrap_or(DEFAULT_ENTRY_POINT)
    }

    pub fn build_script(&self) -> Option<&str> {
        self.scripts.get("build").map(String::as_str)
    }
}

// =============================================================================
// Validation
// =============================================================================

/// Validate a raw package descriptor, collecting every field-level issue
pub fn validate_descriptor(value: &Value) -> Result<PackageDescriptor, Vec<ValidationIssue>> {
    let mut issues = Vec::new();

    let Some(root) = value.as_object() else {
        return Err(vec![ValidationIssue::new(
            DESCRIPTOR_FILE,
            "must be a JSON object",
        )]);
    };

    match root.get("name").and_then(Value::as_str) {
        None => issues.push(ValidationIssue::new("name", "is required")),
        Some(name) if !PACKAGE_NAME_RE.is_match(name) => issues.push(ValidationIssue::new(
            "name",
            format!("'{}' is not a valid package name", name),
        )),
        Some(_) => {}
    }

    match root.get("version").and_then(Value::as_str) {
        None => issues.push(ValidationIssue::new("version", "is required")),
        Some(version) if semver::Version::parse(version).is_err() => issues.push(
            ValidationIssue::new("version", format!("'{}' is not valid semver", version)),
        ),
        Some(_) => {}
    }

    if let Some(main) = root.get("main") {
        match main.as_str() {
            Some(path) => check_relative_path("main", path, &mut issues),
            None => issues.push(ValidationIssue::new("main", "must be a string")),
        }
    }

    match root.get(MANIFEST_KEY) {
        None => issues.push(ValidationIssue::new(MANIFEST_KEY, "is required")),
        Some(Value::Object(block)) => validate_manifest_block(block, &mut issues),
        Some(_) => issues.push(ValidationIssue::new(MANIFEST_KEY, "must be an object")),
    }

    if !issues.is_empty() {
        return Err(issues);
    }

    serde_json::from_value(value.clone())
        .map_err(|e| vec![ValidationIssue::new(DESCRIPTOR_FILE, e.to_string())])
}

fn validate_manifest_block(block: &Map<String, Value>, issues: &mut Vec<ValidationIssue>) {
    let field = |name: &str| format!("{}.{}", MANIFEST_KEY, name);

    match block.get("displayName") {
        Some(Value::String(s)) if !s.trim().is_empty() => {}
        Some(Value::String(_)) => issues.push(ValidationIssue::new(
            field("displayName"),
            "must not be empty",
        )),
        Some(_) => issues.push(ValidationIssue::new(field("displayName"), "must be a string")),
        None => issues.push(ValidationIssue::new(field("displayName"), "is required")),
    }

    if let Some(desc) = block.get("description") {
        if !desc.is_string() {
            issues.push(ValidationIssue::new(field("description"), "must be a string"));
        }
    }

    if let Some(category) = block.get("category") {
        match category.as_str() {
            Some(c) if PluginCategory::NAMES.contains(&c) => {}
            _ => issues.push(ValidationIssue::new(
                field("category"),
                format!("must be one of {}", PluginCategory::NAMES.join(", ")),
            )),
        }
    }

    if let Some(caps) = block.get("capabilities") {
        match caps.as_object() {
            Some(map) => {
                for (key, value) in map {
                    if !value.is_boolean() {
                        issues.push(ValidationIssue::new(
                            format!("{}.{}", field("capabilities"), key),
                            "must be a boolean",
                        ));
                    }
                }
            }
            None => issues.push(ValidationIssue::new(field("capabilities"), "must be an object")),
        }
    }

    if let Some(min) = block.get("minHostVersion") {
        match min.as_str() {
            Some(v) if is_dotted_version(v) => {}
            _ => issues.push(ValidationIssue::new(
                field("minHostVersion"),
                "must be a dotted numeric version such as \"1.2.0\"",
            )),
        }
    }

    if let Some(adapters) = block.get("adapters") {
        match adapters.as_object() {
            Some(map) => {
                for (provider, path) in map {
                    let name = format!("{}.{}", field("adapters"), provider);
                    match path.as_str() {
                        Some(p) => check_relative_path(&name, p, issues),
                        None => issues.push(ValidationIssue::new(name, "must be a string path")),
                    }
                }
            }
            None => issues.push(ValidationIssue::new(field("adapters"), "must be an object")),
        }
    }

    if let Some(perms) = block.get("permissions") {
        match perms.as_array() {
            Some(list) => {
                for (i, perm) in list.iter().enumerate() {
                    let name = format!("{}[{}]", field("permissions"), i);
                    match perm.as_str() {
                        Some(p) => {
                            if let Err(e) = p.parse::<Permission>() {
                                issues.push(ValidationIssue::new(name, e));
                            }
                        }
                        None => issues.push(ValidationIssue::new(name, "must be a string")),
                    }
                }
            }
            None => issues.push(ValidationIssue::new(field("permissions"), "must be an array")),
        }
    }

    if let Some(settings) = block.get("settings") {
        match settings.as_array() {
            Some(list) => validate_settings_schema(list, issues),
            None => issues.push(ValidationIssue::new(field("settings"), "must be an array")),
        }
    }
}

fn validate_settings_schema(list: &[Value], issues: &mut Vec<ValidationIssue>) {
    let mut seen = HashSet::new();
    for (i, entry) in list.iter().enumerate() {
        let base = format!("{}.settings[{}]", MANIFEST_KEY, i);
        let Some(obj) = entry.as_object() else {
            issues.push(ValidationIssue::new(base, "must be an object"));
            continue;
        };

        match obj.get("key").and_then(Value::as_str) {
            Some(key) if !key.trim().is_empty() => {
                if !seen.insert(key.to_string()) {
                    issues.push(ValidationIssue::new(
                        format!("{}.key", base),
                        format!("duplicate setting key '{}'", key),
                    ));
                }
            }
            _ => issues.push(ValidationIssue::new(format!("{}.key", base), "is required")),
        }

        let setting_type = obj
            .get("type")
            .cloned()
            .and_then(|v| serde_json::from_value::<SettingType>(v).ok());
        let Some(setting_type) = setting_type else {
            issues.push(ValidationIssue::new(
                format!("{}.type", base),
                format!("must be one of {}", SettingType::NAMES.join(", ")),
            ));
            continue;
        };

        let options: Vec<&str> = obj
            .get("options")
            .and_then(Value::as_array)
            .map(|opts| opts.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        if setting_type == SettingType::Select && options.is_empty() {
            issues.push(ValidationIssue::new(
                format!("{}.options", base),
                "select settings need at least one option",
            ));
        }

        if let Some(default) = obj.get("default") {
            if !setting_type.accepts(default) {
                issues.push(ValidationIssue::new(
                    format!("{}.default", base),
                    "does not match the declared type",
                ));
            } else if setting_type == SettingType::Select {
                let chosen = default.as_str().unwrap_or_default();
                if !options.is_empty() && !options.contains(&chosen) {
                    issues.push(ValidationIssue::new(
                        format!("{}.default", base),
                        format!("'{}' is not one of the options", chosen),
                    ));
                }
            }
        }
    }
}

fn check_relative_path(field: &str, raw: &str, issues: &mut Vec<ValidationIssue>) {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        issues.push(ValidationIssue::new(field, "must not be empty"));
        return;
    }
    for component in Path::new(trimmed).components() {
        match component {
            Component::ParentDir => {
                issues.push(ValidationIssue::new(
                    field,
                    "must not contain parent traversals",
                ));
                return;
            }
            Component::Prefix(_) | Component::RootDir => {
                issues.push(ValidationIssue::new(field, "must be a relative path"));
                return;
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }
}

// =============================================================================
// Host version gating
// =============================================================================

fn is_dotted_version(raw: &str) -> bool {
    !raw.is_empty()
        && raw
            .split('.')
            .all(|part| part.chars().all(|c| c.is_ascii_digit()) && part.parse::<u64>().is_ok())
}

fn version_components(raw: &str) -> Vec<u64> {
    raw.trim()
        .trim_start_matches('v')
        .split('.')
        .map(|part| {
            let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
            if digits.is_empty() {
                0
            } else {
                // Only overflow can fail here
                digits.parse().unwrap_or(u64::MAX)
            }
        })
        .collect()
}

/// Whether `host` satisfies a `required` minimum version
///
/// Components are compared left to right, a missing component counts as
/// zero, and the first differing component decides. Equal versions are
/// compatible.
pub fn check_version_compatibility(required: &str, host: &str) -> bool {
    let required = version_components(required);
    let host = version_components(host);
    let len = required.len().max(host.len()).max(3);

    for i in 0..len {
        let r = required.get(i).copied().unwrap_or(0);
        let h = host.get(i).copied().unwrap_or(0);
        match h.cmp(&r) {
            Ordering::Greater => return true,
            Ordering::Less => return false,
            Ordering::Equal => continue,
        }
    }
    true
}
