mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stackflow")]
#[command(about = "Step-chained lifecycle engine for cloud resources", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the volume step chains
    Steps {
        /// Phase to show (both if omitted)
        #[arg(value_parser = ["create", "delete"])]
        phase: Option<String>,
    },
    /// Print the effective configuration as JSON
    Config,
    /// Create and delete a volume against the simulated backend
    Simulate {
        /// Availability zone
        #[arg(long, default_value = "zone-a")]
        zone: String,
        /// Size in GiB
        #[arg(long, default_value_t = 1)]
        size: i32,
        /// Volume type (standard if omitted)
        #[arg(long)]
        volume_type: Option<String>,
        /// Tag as KEY=VALUE (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Deletion policy: delete, snapshot, retain
        #[arg(long, default_value = "delete")]
        policy: String,
        /// Describe polls before a resource settles
        #[arg(long, default_value_t = 2)]
        polls: u32,
        /// Make delete-time snapshots fail
        #[arg(long)]
        fail_snapshot: bool,
        /// Persist checkpoints under this directory
        #[arg(long, env = "STACKFLOW_STATE_DIR")]
        state_dir: Option<PathBuf>,
    },
    /// Enable and disable the worker stack against a simulated backend
    Launcher {
        /// Unrelated certificates already stored under the certificate path
        #[arg(long, default_value_t = 0)]
        existing_certificates: usize,
        /// Leave the worker stack enabled
        #[arg(long)]
        keep: bool,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries command output
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    if matches!(cli.command, Commands::Version) {
        println!("stackflow {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = stackflow_config::EngineConfig::load()?;
    tracing::debug!(
        max_pages = config.pagination.max_pages,
        launcher = %config.launcher.launcher_id,
        "Configuration loaded"
    );

    match cli.command {
        Commands::Steps { phase } => {
            commands::steps::handle(&config, phase.as_deref())?;
        }
        Commands::Config => {
            commands::config::handle(&config)?;
        }
        Commands::Simulate {
            zone,
            size,
            volume_type,
            tags,
            policy,
            polls,
            fail_snapshot,
            state_dir,
        } => {
            let options = commands::simulate::SimulateOptions {
                zone,
                size,
                volume_type,
                tags,
                policy,
                polls,
                fail_snapshot,
                state_dir,
            };
            commands::simulate::handle(&config, options).await?;
        }
        Commands::Launcher {
            existing_certificates,
            keep,
        } => {
            let options = commands::launcher::LauncherOptions {
                existing_certificates,
                keep,
            };
            commands::launcher::handle(&config, options).await?;
        }
        Commands::Version => {
            unreachable!("Version is handled before config loading");
        }
    }

    Ok(())
}
