//! Manager settings.

use crate::error::{Result, VgpuError};
use crate::paths::{self, SysfsPaths};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings for the combined manager and its mode detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Root below which `sys/` is found (`/host` inside a container)
    pub sysfs_root: PathBuf,
    pub mode_detect_timeout_secs: u64,
    pub mode_detect_initial_backoff_ms: u64,
    pub mode_detect_max_backoff_ms: u64,
    /// GPU whose interfaces decide between the mdev and VFIO backends
    pub probe_gpu_index: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from(paths::DEFAULT_SYSFS_ROOT),
            mode_detect_timeout_secs: 30,
            mode_detect_initial_backoff_ms: 100,
            mode_detect_max_backoff_ms: 2000,
            probe_gpu_index: 0,
        }
    }
}

impl ManagerConfig {
    /// Load settings from a JSON file, or defaults when no file is given.
    ///
    /// `VGPU_DM_SYSFS_ROOT` takes precedence over the file's `sysfs_root`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .map_err(|e| VgpuError::IoError { path: path.to_path_buf(), source: e })?;
                serde_json::from_str(&content).map_err(|e| VgpuError::InvalidConfig {
                    reason: format!("Failed to parse settings {}: {}", path.display(), e),
                })?
            }
            None => Self::default(),
        };
        config.sysfs_root = paths::resolve_root(&config.sysfs_root);
        Ok(config)
    }

    /// Build the settings for a given root, leaving everything else default.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { sysfs_root: root.into(), ..Self::default() }
    }

    pub fn paths(&self) -> SysfsPaths {
        SysfsPaths::new(&self.sysfs_root)
    }

    pub fn mode_detect_timeout(&self) -> Duration {
        Duration::from_secs(self.mode_detect_timeout_secs)
    }

    pub fn mode_detect_initial_backoff(&self) -> Duration {
        Duration::from_millis(self.mode_detect_initial_backoff_ms)
    }

    pub fn mode_detect_max_backoff(&self) -> Duration {
        Duration::from_millis(self.mode_detect_max_backoff_ms)
    }
}
