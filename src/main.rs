use agent_plugin_host::config::HostConfig;
use agent_plugin_host::transport::plugin_cli::{self, InstallSourceArg};
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "plugin-host")]
#[command(author, version, about = "Install and manage agent host plugins", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List installed plugins
    List,

    /// Show details of an installed plugin
    Info {
        /// Plugin id
        id: String,
    },

    /// Install a plugin
    Install {
        #[command(subcommand)]
        source: InstallCommand,
    },

    /// Deactivate if needed and remove a plugin
    Uninstall {
        /// Plugin id
        id: String,
    },

    /// Activate an installed plugin
    Activate {
        /// Plugin id
        id: String,
    },

    /// Deactivate an active plugin
    Deactivate {
        /// Plugin id
        id: String,
    },

    /// Grant permissions the plugin requests (e.g. fs:read shell:execute)
    Grant {
        /// Plugin id
        id: String,

        #[arg(required = true)]
        permissions: Vec<String>,
    },

    /// Revoke granted permissions
    Revoke {
        /// Plugin id
        id: String,

        #[arg(required = true)]
        permissions: Vec<String>,
    },

    /// Show settings, or update them with key=value pairs
    Settings {
        /// Plugin id
        id: String,

        values: Vec<String>,
    },

    /// Check registry-installed plugins for newer versions
    CheckUpdates,

    /// Validate a plugin directory without installing it
    Validate {
        /// Plugin directory (containing package.json)
        dir: PathBuf,
    },
}

#[derive(Subcommand)]
enum InstallCommand {
    /// From the package registry via the package manager
    Registry {
        /// Package name
        name: String,

        /// Version or range
        #[arg(long)]
        version: Option<String>,
    },

    /// From a git repository (owner/name or URL)
    Repo {
        /// Repository reference
        repo: String,

        /// Branch, tag, or commit
        #[arg(long = "ref")]
        git_ref: Option<String>,
    },

    /// From a directory on disk
    Local {
        /// Plugin directory
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "agent_plugin_host=debug,plugin_host=debug"
    } else {
        "agent_plugin_host=info,plugin_host=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match &cli.config {
        Some(path) => HostConfig::load_from(path)?,
        None => HostConfig::load()?,
    };

    match cli.command {
        Commands::List => plugin_cli::run_plugin_list(&config).await?,
        Commands::Info { id } => plugin_cli::run_plugin_info(&config, &id).await?,
        Commands::Install { source } => {
            let source = match &source {
                InstallCommand::Registry { name, version } => InstallSourceArg::Registry {
                    name,
                    version: version.as_deref(),
                },
                InstallCommand::Repo { repo, git_ref } => InstallSourceArg::Repository {
                    repo,
                    git_ref: git_ref.as_deref(),
                },
                InstallCommand::Local { path } => InstallSourceArg::Local { path },
            };
            plugin_cli::run_plugin_install(&config, source).await?;
        }
        Commands::Uninstall { id } => plugin_cli::run_plugin_uninstall(&config, &id).await?,
        Commands::Activate { id } => plugin_cli::run_plugin_activate(&config, &id).await?,
        Commands::Deactivate { id } => plugin_cli::run_plugin_deactivate(&config, &id).await?,
        Commands::Grant { id, permissions } => {
            plugin_cli::run_plugin_grant(&config, &id, &permissions).await?
        }
        Commands::Revoke { id, permissions } => {
            plugin_cli::run_plugin_revoke(&config, &id, &permissions).await?
        }
        Commands::Settings { id, values } => {
            plugin_cli::run_plugin_settings(&config, &id, &values).await?
        }
        Commands::CheckUpdates => plugin_cli::run_plugin_check_updates(&config).await?,
        Commands::Validate { dir } => plugin_cli::run_plugin_validate(&config, &dir).await?,
    }

    Ok(())
}
