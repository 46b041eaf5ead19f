//! NVIDIA GPU detection.
//!
//! Scans /sys/bus/pci/devices for NVIDIA display and 3D controllers.

use crate::error::{Result, VgpuError};
use crate::paths::SysfsPaths;
use crate::pci::device::{address_sort_key, is_valid_pci_address, PciDevice};
use std::fs;
use tracing::debug;

/// Read-only view of the NVIDIA GPUs on the PCI bus.
#[derive(Debug, Clone)]
pub struct PciBus {
    paths: SysfsPaths,
}

impl PciBus {
    pub fn new(paths: SysfsPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &SysfsPaths {
        &self.paths
    }

    /// All NVIDIA GPUs, virtual functions included, in numeric address order.
    pub fn nvidia_devices(&self) -> Result<Vec<PciDevice>> {
        let pci_path = self.paths.pci_devices();
        let entries = fs::read_dir(&pci_path)
            .map_err(|e| VgpuError::IoError { path: pci_path.clone(), source: e })?;

        let mut devices = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| VgpuError::IoError { path: pci_path.clone(), source: e })?;
            let address = entry.file_name().to_string_lossy().to_string();
            if !is_valid_pci_address(&address) {
                continue;
            }

            let device = match PciDevice::from_address(&self.paths, &address) {
                Ok(d) => d,
                Err(e) => {
                    debug!(address = %address, error = %e, "Skipping unreadable PCI device");
                    continue;
                }
            };

            if !device.is_nvidia_gpu() {
                continue;
            }

            devices.push(device);
        }

        devices.sort_by_key(|d| address_sort_key(&d.address));
        Ok(devices)
    }

    /// Physical NVIDIA GPUs in numeric address order. Indices used throughout
    /// the manager refer to positions in this list.
    pub fn gpus(&self) -> Result<Vec<PciDevice>> {
        let gpus: Vec<PciDevice> =
            self.nvidia_devices()?.into_iter().filter(|d| !d.is_virtual_function()).collect();

        debug!(count = gpus.len(), "Detected NVIDIA GPUs");
        Ok(gpus)
    }

    pub fn gpu_by_index(&self, index: usize) -> Result<PciDevice> {
        self.gpus()?
            .into_iter()
            .nth(index)
            .ok_or_else(|| VgpuError::GpuNotFound { target: format!("index {}", index) })
    }

    pub fn gpu_by_address(&self, address: &str) -> Result<PciDevice> {
        match self.nvidia_device(address)? {
            Some(device) if !device.is_virtual_function() => Ok(device),
            _ => Err(VgpuError::GpuNotFound { target: format!("address {}", address) }),
        }
    }

    /// Read a device and return it only if it is an NVIDIA GPU (PF or VF).
    pub fn nvidia_device(&self, address: &str) -> Result<Option<PciDevice>> {
        if !self.paths.pci_device(address).exists() {
            return Ok(None);
        }
        let device = PciDevice::from_address(&self.paths, address)?;
        Ok(device.is_nvidia_gpu().then_some(device))
    }
}
