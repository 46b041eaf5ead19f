//! Combined vGPU manager.
//!
//! Picks the mdev or VFIO backend once at startup and exposes it together
//! with GPU lookup helpers. The choice holds for the lifetime of the process.

use crate::backend::vfio::{vf_control_path, CREATABLE_TYPES_FILE};
use crate::backend::{BackendMode, Device, MdevBackend, ParentDevice, VfioBackend, VgpuBackend};
use crate::config::ManagerConfig;
use crate::error::{Result, VgpuError};
use crate::pci::{PciBus, PciDevice};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument};

/// Selects a physical GPU either by its position in the GPU list or by PCI address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GpuTarget {
    Index(usize),
    Address(String),
}

impl fmt::Display for GpuTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuTarget::Index(index) => write!(f, "index {}", index),
            GpuTarget::Address(address) => write!(f, "address {}", address),
        }
    }
}

impl FromStr for GpuTarget {
    type Err = VgpuError;

    fn from_str(s: &str) -> Result<Self> {
        if let Ok(index) = s.parse() {
            return Ok(GpuTarget::Index(index));
        }
        if crate::pci::is_valid_pci_address(s) {
            return Ok(GpuTarget::Address(s.to_string()));
        }
        Err(VgpuError::InvalidConfig {
            reason: format!("Invalid GPU '{}' (expected an index or a PCI address)", s),
        })
    }
}

/// The active backend plus PCI lookups.
#[derive(Clone)]
pub struct VgpuManager {
    bus: PciBus,
    backend: Arc<dyn VgpuBackend>,
}

impl fmt::Debug for VgpuManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VgpuManager")
            .field("bus", &self.bus)
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl VgpuManager {
    /// Probe the host and build a manager for whichever backend it uses.
    #[instrument(skip(config), fields(root = %config.sysfs_root.display()))]
    pub fn detect(config: &ManagerConfig) -> Result<Self> {
        let bus = PciBus::new(config.paths());
        let mode = detect_mode(&bus, config)?;

        let backend: Arc<dyn VgpuBackend> = match mode {
            BackendMode::Vfio => Arc::new(VfioBackend::new(bus.clone())),
            BackendMode::Mdev => Arc::new(MdevBackend::new(bus.clone())),
        };

        info!(mode = %mode, "Selected vGPU backend");
        Ok(Self { bus, backend })
    }

    /// Build a manager around an existing backend.
    pub fn with_backend(bus: PciBus, backend: Arc<dyn VgpuBackend>) -> Self {
        Self { bus, backend }
    }

    pub fn mode(&self) -> BackendMode {
        self.backend.mode()
    }

    pub fn backend(&self) -> &Arc<dyn VgpuBackend> {
        &self.backend
    }

    pub fn bus(&self) -> &PciBus {
        &self.bus
    }

    /// Physical NVIDIA GPUs in index order.
    pub fn gpus(&self) -> Result<Vec<PciDevice>> {
        self.bus.gpus()
    }

    pub fn resolve_gpu(&self, target: &GpuTarget) -> Result<PciDevice> {
        match target {
            GpuTarget::Index(index) => self.bus.gpu_by_index(*index),
            GpuTarget::Address(address) => self.bus.gpu_by_address(address),
        }
    }

    pub fn parent_devices(&self) -> Result<Vec<Arc<dyn ParentDevice>>> {
        self.backend.parent_devices()
    }

    pub fn devices(&self) -> Result<Vec<Box<dyn Device>>> {
        self.backend.devices()
    }

    pub fn instance_id(&self, slot: usize) -> String {
        self.backend.instance_id(slot)
    }

    /// Parents backed by the given physical GPU, in enumeration order.
    pub fn parents_for_gpu(&self, address: &str) -> Result<Vec<Arc<dyn ParentDevice>>> {
        let parents: Vec<_> = self
            .parent_devices()?
            .into_iter()
            .filter(|p| p.physical_function().address == address)
            .collect();

        if parents.is_empty() {
            return Err(VgpuError::NoParentDevices { gpu: address.to_string() });
        }
        Ok(parents)
    }

    /// Live vGPU devices whose physical function is the given GPU.
    pub fn devices_for_gpu(&self, address: &str) -> Result<Vec<Box<dyn Device>>> {
        Ok(self
            .devices()?
            .into_iter()
            .filter(|d| d.physical_function().address == address)
            .collect())
    }
}

/// Poll the probe GPU until either backend's interface shows up.
///
/// Virtual functions and their vendor control directories can appear some
/// time after the driver loads, so a missing listing is retried with
/// exponential backoff until the configured timeout.
pub fn detect_mode(bus: &PciBus, config: &ManagerConfig) -> Result<BackendMode> {
    let started = Instant::now();
    let timeout = config.mode_detect_timeout();
    let max_backoff = config.mode_detect_max_backoff();
    let mut backoff = config.mode_detect_initial_backoff();

    loop {
        let gpu = bus.gpu_by_index(config.probe_gpu_index)?;
        let listing = vf_control_path(&gpu, 0).join(CREATABLE_TYPES_FILE);

        if listing.exists() {
            debug!(gpu = %gpu.address, path = %listing.display(), "Found VFIO vGPU listing");
            return Ok(BackendMode::Vfio);
        }

        if has_mdev_interface(bus, &gpu) {
            debug!(gpu = %gpu.address, "Found mdev vGPU interface");
            return Ok(BackendMode::Mdev);
        }

        let waited = started.elapsed();
        if waited >= timeout {
            return Err(VgpuError::ModeDetectionTimeout { path: listing, waited });
        }

        let sleep = backoff.min(timeout - waited);
        debug!(
            gpu = %gpu.address,
            retry_in_ms = sleep.as_millis() as u64,
            "No vGPU interface yet, waiting"
        );
        std::thread::sleep(sleep);
        backoff = next_backoff(backoff, max_backoff);
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max).max(Duration::from_millis(1))
}

fn has_mdev_interface(bus: &PciBus, gpu: &PciDevice) -> bool {
    if gpu.sysfs_path.join("mdev_supported_types").exists()
        || gpu.sysfs_path.join("virtfn0").join("mdev_supported_types").exists()
    {
        return true;
    }

    std::fs::read_dir(bus.paths().mdev_bus())
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}
