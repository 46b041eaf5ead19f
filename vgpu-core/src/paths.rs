//! Centralized sysfs path configuration.
//!
//! Every kernel path the manager touches is derived from a single root so the
//! whole tree can be pointed at `/host` inside a container or at a fixture
//! directory in tests.

use std::path::{Path, PathBuf};

/// Environment variable overriding the sysfs root.
pub const SYSFS_ROOT_ENV: &str = "VGPU_DM_SYSFS_ROOT";

/// Default sysfs root.
pub const DEFAULT_SYSFS_ROOT: &str = "/";

/// Resolve the sysfs root.
///
/// Resolution order:
/// 1. `VGPU_DM_SYSFS_ROOT` environment variable
/// 2. the configured value
pub fn resolve_root(configured: &Path) -> PathBuf {
    if let Ok(dir) = std::env::var(SYSFS_ROOT_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    configured.to_path_buf()
}

/// Kernel paths below a root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysfsPaths {
    root: PathBuf,
}

impl SysfsPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `/sys/bus/pci/devices`
    pub fn pci_devices(&self) -> PathBuf {
        self.root.join("sys/bus/pci/devices")
    }

    /// `/sys/bus/pci/devices/<address>`
    pub fn pci_device(&self, address: &str) -> PathBuf {
        self.pci_devices().join(address)
    }

    /// `/sys/class/mdev_bus`
    pub fn mdev_bus(&self) -> PathBuf {
        self.root.join("sys/class/mdev_bus")
    }

    /// `/sys/bus/mdev/devices`
    pub fn mdev_devices(&self) -> PathBuf {
        self.root.join("sys/bus/mdev/devices")
    }
}

impl Default for SysfsPaths {
    fn default() -> Self {
        Self::new(DEFAULT_SYSFS_ROOT)
    }
}
