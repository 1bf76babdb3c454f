//! CLI commands for plugin management

use crate::config::HostConfig;
use crate::plugins::{
    check_version_compatibility, process_module_loader, PackageDescriptor, Permission,
    PluginError, PluginManager, PluginState, RegistryEntry,
};
use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::{Map, Value};
use std::path::Path;
use tabled::{settings::Style, Table, Tabled};

/// Manager over the persisted registry; nothing is activated
fn open_manager(config: &HostConfig) -> Result<PluginManager> {
    let mut manager = PluginManager::new(config.clone(), process_module_loader(config))?;
    manager.load_registry()?;
    Ok(manager)
}

fn state_label(state: PluginState) -> String {
    match state {
        PluginState::Active => "✓ active".green().to_string(),
        PluginState::Installed => "installed".normal().to_string(),
        PluginState::Inactive => "✗ inactive".yellow().to_string(),
        PluginState::Error => "✗ error".red().to_string(),
    }
}

fn parse_permissions(raw: &[String]) -> Result<Vec<Permission>> {
    raw.iter()
        .map(|p| p.parse::<Permission>().map_err(|e| anyhow::anyhow!(e)))
        .collect()
}

/// List installed plugins
pub async fn run_plugin_list(config: &HostConfig) -> Result<()> {
    let manager = open_manager(config)?;

    println!("{}", "=== Installed Plugins ===".bold().cyan());
    println!();

    #[derive(Tabled)]
    struct PluginRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Version")]
        version: String,
        #[tabled(rename = "Source")]
        source: String,
        #[tabled(rename = "Status")]
        status: String,
        #[tabled(rename = "Description")]
        description: String,
    }

    let rows: Vec<PluginRow> = manager
        .get_plugins()
        .into_iter()
        .map(|p| PluginRow {
            id: p.id.clone(),
            version: p.version.clone(),
            source: p.source.to_string(),
            status: state_label(p.state),
            description: p.manifest.description.chars().take(40).collect::<String>(),
        })
        .collect();

    if rows.is_empty() {
        println!("No plugins installed.");
        println!();
        println!("Install a plugin with:");
        println!("  plugin-host install repo <owner/name>");
    } else {
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{}", table);
    }

    println!();
    println!("Plugins directory: {}", manager.loader().plugins_dir().display());

    Ok(())
}

/// Show plugin details
pub async fn run_plugin_info(config: &HostConfig, plugin_id: &str) -> Result<()> {
    let manager = open_manager(config)?;
    let plugin = manager
        .get_plugin(plugin_id)
        .ok_or_else(|| PluginError::NotInstalled(plugin_id.to_string()))?;

    println!("{}", format!("=== Plugin: {} ===", plugin_id).bold().cyan());
    println!();
    print_entry(plugin);
    Ok(())
}

fn print_entry(plugin: &RegistryEntry) {
    let manifest = &plugin.manifest;
    println!("{}:     {}", "Name".bold(), manifest.display_name);
    println!("{}:  {}", "Version".bold(), plugin.version);
    println!("{}: {}", "Category".bold(), manifest.category);
    println!("{}:   {}", "Source".bold(), plugin.source);
    println!("{}:   {}", "Status".bold(), state_label(plugin.state));
    if let Some(error) = &plugin.error {
        println!("{}:    {}", "Error".bold(), error.red());
    }
    if !manifest.description.is_empty() {
        println!("{}: {}", "Description".bold(), manifest.description);
    }
    if let Some(min) = &manifest.min_host_version {
        println!("{}: {}", "Requires host".bold(), min);
    }

    println!();
    println!("{}:", "Permissions".bold());
    if manifest.permissions.is_empty() {
        println!("  (none requested)");
    }
    for permission in &manifest.permissions {
        let granted = if plugin.has_permission(*permission) {
            "✓ granted".green().to_string()
        } else {
            "✗ not granted".normal().to_string()
        };
        let warning = if permission.is_dangerous() {
            " ⚠️".to_string()
        } else {
            String::new()
        };
        println!("  {:<14} {}{}", permission.as_str(), granted, warning);
    }

    if !manifest.adapters.is_empty() {
        println!();
        println!("{}:", "Adapters".bold());
        for (provider, path) in &manifest.adapters {
            println!("  {:<14} {}", provider, path);
        }
    }

    if !plugin.settings.is_empty() {
        println!();
        println!("{}:", "Settings".bold());
        for (key, value) in &plugin.settings {
            println!("  {} = {}", key, value);
        }
    }

    println!();
    println!("{}:", "Paths".bold());
    println!("  Install: {}", plugin.install_path.display());
    println!("  Source:  {}", plugin.source_ref);
}

pub enum InstallSourceArg<'a> {
    Registry {
        name: &'a str,
        version: Option<&'a str>,
    },
    Repository {
        repo: &'a str,
        git_ref: Option<&'a str>,
    },
    Local {
        path: &'a Path,
    },
}

/// Install a plugin from any source
pub async fn run_plugin_install(config: &HostConfig, source: InstallSourceArg<'_>) -> Result<()> {
    println!("{}", "=== Installing Plugin ===".bold().cyan());
    println!();

    let mut manager = open_manager(config)?;
    let result = match source {
        InstallSourceArg::Registry { name, version } => {
            println!("Package:    {}{}", name, version.map(|v| format!("@{}", v)).unwrap_or_default());
            manager.install_from_registry(name, version).await
        }
        InstallSourceArg::Repository { repo, git_ref } => {
            println!("Repository: {}", repo);
            println!("Ref:        {}", git_ref.unwrap_or("(default)"));
            manager.install_from_repository(repo, git_ref).await
        }
        InstallSourceArg::Local { path } => {
            println!("Path:       {}", path.display());
            manager.install_from_local_path(path).await
        }
    };

    let entry = match result {
        Ok(entry) => entry,
        Err(e) => {
            print_issues(&e);
            return Err(e.into());
        }
    };

    println!();
    println!(
        "Found plugin: {} v{}",
        entry.manifest.display_name.green(),
        entry.version
    );
    if !entry.manifest.permissions.is_empty() {
        println!("Requested permissions:");
        for permission in &entry.manifest.permissions {
            if permission.is_dangerous() {
                println!("  • {} {}", permission, "(dangerous!)".red());
            } else {
                println!("  • {}", permission);
            }
        }
    }

    println!();
    println!("✅ Successfully installed plugin: {}", entry.id.green());
    println!();
    println!("Grant permissions with `plugin-host grant {} <permission>...`", entry.id);
    println!("then activate with `plugin-host activate {}`.", entry.id);
    Ok(())
}

fn print_issues(err: &PluginError) {
    if let Some(issues) = err.issues() {
        println!();
        println!("{}", "Manifest problems:".red().bold());
        for issue in issues {
            println!("  • {}", issue);
        }
    }
}

/// Uninstall a plugin
pub async fn run_plugin_uninstall(config: &HostConfig, plugin_id: &str) -> Result<()> {
    println!("{}", "=== Uninstalling Plugin ===".bold().cyan());
    println!();

    let mut manager = open_manager(config)?;
    manager.uninstall(plugin_id).await?;

    println!("✅ Successfully uninstalled plugin: {}", plugin_id.green());
    Ok(())
}

/// Activate a plugin
pub async fn run_plugin_activate(config: &HostConfig, plugin_id: &str) -> Result<()> {
    let mut manager = open_manager(config)?;
    manager.activate_plugin(plugin_id).await?;

    println!("✅ Activated plugin: {}", plugin_id.green());
    Ok(())
}

/// Deactivate a plugin
pub async fn run_plugin_deactivate(config: &HostConfig, plugin_id: &str) -> Result<()> {
    let mut manager = open_manager(config)?;
    manager.deactivate_plugin(plugin_id).await?;

    println!("✅ Deactivated plugin: {}", plugin_id.yellow());
    Ok(())
}

/// Grant permissions
pub async fn run_plugin_grant(
    config: &HostConfig,
    plugin_id: &str,
    permissions: &[String],
) -> Result<()> {
    let permissions = parse_permissions(permissions)?;
    let mut manager = open_manager(config)?;
    let granted = manager.grant_permissions(plugin_id, &permissions)?;

    println!("✅ Granted to {}:", plugin_id.green());
    for permission in granted {
        println!("  • {}", permission);
    }
    if manager.get_plugin(plugin_id).map(|e| e.is_active()).unwrap_or(false) {
        println!();
        println!("Changes take effect the next time the plugin is activated.");
    }
    Ok(())
}

/// Revoke permissions
pub async fn run_plugin_revoke(
    config: &HostConfig,
    plugin_id: &str,
    permissions: &[String],
) -> Result<()> {
    let permissions = parse_permissions(permissions)?;
    let mut manager = open_manager(config)?;
    let granted = manager.revoke_permissions(plugin_id, &permissions)?;

    println!("✅ Revoked from {}", plugin_id.yellow());
    if granted.is_empty() {
        println!("No permissions granted.");
    } else {
        println!("Still granted: {}", granted.iter().map(Permission::as_str).collect::<Vec<_>>().join(", "));
    }
    Ok(())
}

/// Show or update plugin settings (`key=value`, values parsed as JSON when possible)
pub async fn run_plugin_settings(
    config: &HostConfig,
    plugin_id: &str,
    assignments: &[String],
) -> Result<()> {
    let mut manager = open_manager(config)?;

    let settings = if assignments.is_empty() {
        manager
            .get_plugin(plugin_id)
            .ok_or_else(|| PluginError::NotInstalled(plugin_id.to_string()))?
            .settings
            .clone()
    } else {
        let patch = parse_assignments(assignments)?;
        manager.update_settings(plugin_id, patch).await?
    };

    println!("{}", format!("=== Settings: {} ===", plugin_id).bold().cyan());
    if settings.is_empty() {
        println!("(no settings)");
    }
    for (key, value) in &settings {
        println!("  {} = {}", key.bold(), value);
    }
    Ok(())
}

fn parse_assignments(assignments: &[String]) -> Result<Map<String, Value>> {
    assignments
        .iter()
        .map(|raw| {
            let (key, value) = raw
                .split_once('=')
                .with_context(|| format!("Expected key=value, got '{}'", raw))?;
            let key = key.trim();
            if key.is_empty() {
                anyhow::bail!("Empty setting key in '{}'", raw);
            }
            let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
            Ok((key.to_string(), value))
        })
        .collect()
}

/// Check registry-installed plugins for newer versions
pub async fn run_plugin_check_updates(config: &HostConfig) -> Result<()> {
    let manager = open_manager(config)?;

    println!("{}", "=== Plugin Updates ===".bold().cyan());
    println!();

    let results = manager.check_for_updates().await;
    if results.is_empty() {
        println!("No registry-installed plugins to check.");
        return Ok(());
    }

    #[derive(Tabled)]
    struct UpdateRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Current")]
        current: String,
        #[tabled(rename = "Latest")]
        latest: String,
        #[tabled(rename = "Status")]
        status: String,
    }

    let rows: Vec<UpdateRow> = results
        .into_iter()
        .map(|(id, info)| UpdateRow {
            id,
            status: if info.available {
                "update available".yellow().to_string()
            } else if info.latest.is_some() {
                "up to date".green().to_string()
            } else {
                "unknown".normal().to_string()
            },
            current: info.current,
            latest: info.latest.unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{}", table);
    Ok(())
}

/// Validate a plugin directory without installing it
pub async fn run_plugin_validate(config: &HostConfig, dir: &Path) -> Result<()> {
    println!("{}", "=== Validating Plugin ===".bold().cyan());
    println!();

    let descriptor = match PackageDescriptor::load(dir) {
        Ok(descriptor) => descriptor,
        Err(e) => {
            print_issues(&e);
            return Err(e.into());
        }
    };

    let manifest = &descriptor.manifest;
    println!("Plugin:  {} v{}", descriptor.name.green(), descriptor.version);
    println!("Name:    {}", manifest.display_name);
    println!("Entry:   {}", descriptor.entry_point());

    let mut problems = Vec::new();
    if let Some(required) = &manifest.min_host_version {
        if !check_version_compatibility(required, &config.host_version) {
            problems.push(format!(
                "requires host {} (this host is {})",
                required, config.host_version
            ));
        }
    }
    let entry = dir.join(descriptor.entry_point());
    let has_entry = entry.is_file()
        || ["js", "mjs", "cjs", "sh"]
            .iter()
            .any(|ext| entry.with_extension(ext).is_file());
    if !has_entry {
        problems.push(format!("entry point {} not found (not built yet?)", entry.display()));
    }

    println!();
    if problems.is_empty() {
        println!("✅ {}", "Manifest is valid".green());
        Ok(())
    } else {
        for problem in &problems {
            println!("  • {}", problem.yellow());
        }
        anyhow::bail!("{} problem(s) found", problems.len())
    }
}
