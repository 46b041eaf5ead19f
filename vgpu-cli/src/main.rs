use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use vgpu_core::ManagerConfig;

mod commands;

use commands::{ConfigArgs, WatchArgs};

#[derive(Parser)]
#[command(name = "vgpu-dm")]
#[command(about = "NVIDIA vGPU device manager", long_about = None)]
struct Cli {
    /// Enable debug-level logging
    #[arg(short, long, global = true, env = "VGPU_DM_DEBUG")]
    debug: bool,

    /// Directory the host's /sys is mounted under
    #[arg(long, global = true, env = "VGPU_DM_SYSFS_ROOT")]
    sysfs_root: Option<PathBuf>,

    /// Manager settings file (JSON)
    #[arg(long, global = true, env = "VGPU_DM_SETTINGS")]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a vGPU configuration to the GPUs it selects
    Apply(ConfigArgs),

    /// Check that a vGPU configuration is currently applied
    Assert(ConfigArgs),

    /// List GPUs, parent devices and vGPU devices
    List,

    /// Apply the config named by a node label whenever it changes
    Watch(WatchArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    vgpu_core::init_observability(cli.debug)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    let mut settings = ManagerConfig::load(cli.settings.as_deref())
        .context("Failed to load manager settings")?;
    if let Some(root) = cli.sysfs_root {
        settings.sysfs_root = root;
    }

    match cli.command {
        Commands::Apply(args) => {
            tokio::task::spawn_blocking(move || commands::apply::apply(&settings, &args)).await??;
        }

        Commands::Assert(args) => {
            tokio::task::spawn_blocking(move || commands::assert::assert(&settings, &args))
                .await??;
        }

        Commands::List => {
            tokio::task::spawn_blocking(move || commands::list::list(&settings)).await??;
        }

        Commands::Watch(args) => {
            commands::watch::watch(settings, args).await?;
        }
    }

    Ok(())
}
