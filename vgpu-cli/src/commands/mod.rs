//! CLI command implementations

use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use tracing::info;
use vgpu_core::config_file::{self, Spec, VgpuConfigSpec};
use vgpu_core::{ManagerConfig, VgpuConfigManager, VgpuManager};

pub mod apply;
pub mod assert;
pub mod list;
pub mod watch;

pub use watch::WatchArgs;

/// Arguments shared by `apply` and `assert`.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Path to the configuration file, or `-` for stdin
    #[arg(short = 'f', long, env = "VGPU_DM_CONFIG_FILE")]
    pub config_file: PathBuf,

    /// Name of the vGPU config to use (optional when the file has only one)
    #[arg(short = 'c', long, env = "VGPU_DM_SELECTED_CONFIG")]
    pub selected_config: Option<String>,

    /// Only check that the selected config is valid
    #[arg(short = 'a', long)]
    pub valid_config: bool,
}

/// Load the configuration file and pick the requested config.
pub fn load_selected(path: &Path, name: Option<&str>) -> Result<(String, Vec<VgpuConfigSpec>)> {
    let spec: Spec = config_file::load(path)
        .with_context(|| format!("Failed to load config file {}", path.display()))?;
    let (name, specs) = spec.select(name)?;
    info!(config = %name, entries = specs.len(), "Selected vGPU config");
    Ok((name.to_string(), specs.to_vec()))
}

/// Detect the backend and wrap it in an engine.
pub fn build_engine(settings: &ManagerConfig) -> Result<VgpuConfigManager> {
    let manager = VgpuManager::detect(settings).context("Failed to detect vGPU mode")?;
    info!(mode = %manager.mode(), "Detected vGPU mode");
    Ok(VgpuConfigManager::new(manager))
}
