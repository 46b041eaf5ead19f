//! PCI device abstraction read from sysfs.

use crate::error::{Result, VgpuError};
use crate::paths::SysfsPaths;
use crate::types::DeviceId;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Regular expression to validate PCI address format: 0000:01:00.0
static PCI_ADDRESS_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{4}:[0-9a-fA-F]{2}:[0-9a-fA-F]{2}\.[0-7]$")
        .expect("Invalid PCI address regex")
});

/// PCI device class codes for GPUs (upper 16 bits of the class register).
pub mod class {
    /// VGA compatible controller
    pub const VGA_CONTROLLER: u32 = 0x0300;
    /// 3D controller - NVIDIA compute GPUs and their virtual functions
    pub const CONTROLLER_3D: u32 = 0x0302;
}

/// Known vendor IDs.
pub mod vendor {
    pub const NVIDIA: u16 = 0x10de;
}

/// SR-IOV role of a PCI device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sriov {
    /// Device without SR-IOV capability
    None,
    PhysicalFunction { total_vfs: u32, num_vfs: u32 },
    VirtualFunction { physical_function: Box<PciDevice> },
}

/// PCI device information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PciDevice {
    /// PCI address (e.g., "0000:3b:00.0")
    pub address: String,
    pub vendor_id: u16,
    pub device_id: u16,
    /// Full 24-bit class register (e.g., 0x030200)
    pub class: u32,
    /// Current driver (None if unbound)
    pub driver: Option<String>,
    /// IOMMU group ID
    pub iommu_group: Option<String>,
    /// NUMA node (-1 if not applicable)
    pub numa_node: i32,
    /// Sysfs path to this device
    pub sysfs_path: PathBuf,
    pub sriov: Sriov,
}

impl PciDevice {
    /// Read device information for an address from sysfs.
    pub fn from_address(paths: &SysfsPaths, address: &str) -> Result<Self> {
        if !is_valid_pci_address(address) {
            return Err(VgpuError::InvalidConfig {
                reason: format!(
                    "Invalid PCI address format: {} (expected: 0000:01:00.0)",
                    address
                ),
            });
        }

        let sysfs_path = paths.pci_device(address);
        if !sysfs_path.exists() {
            return Err(VgpuError::GpuNotFound { target: format!("PCI device {}", address) });
        }

        let vendor_id = read_hex_u16(&sysfs_path.join("vendor"))?;
        let device_id = read_hex_u16(&sysfs_path.join("device"))?;
        let class = read_hex_u32(&sysfs_path.join("class"))?;

        let driver = read_link_name(&sysfs_path.join("driver"));
        let iommu_group = read_link_name(&sysfs_path.join("iommu_group"));
        let numa_node = read_numa_node(&sysfs_path);
        let sriov = read_sriov(paths, &sysfs_path)?;

        debug!(
            address = %address,
            vendor = %format!("{:04x}", vendor_id),
            device = %format!("{:04x}", device_id),
            driver = ?driver,
            iommu_group = ?iommu_group,
            "Read PCI device info"
        );

        Ok(Self {
            address: address.to_string(),
            vendor_id,
            device_id,
            class,
            driver,
            iommu_group,
            numa_node,
            sysfs_path,
            sriov,
        })
    }

    /// Check if this device is a GPU (VGA or 3D controller).
    pub fn is_gpu(&self) -> bool {
        matches!(self.class >> 8, class::VGA_CONTROLLER | class::CONTROLLER_3D)
    }

    pub fn is_nvidia(&self) -> bool {
        self.vendor_id == vendor::NVIDIA
    }

    pub fn is_nvidia_gpu(&self) -> bool {
        self.is_nvidia() && self.is_gpu()
    }

    pub fn is_virtual_function(&self) -> bool {
        matches!(self.sriov, Sriov::VirtualFunction { .. })
    }

    /// Number of enabled virtual functions (0 for non-PF devices).
    pub fn num_vfs(&self) -> u32 {
        match self.sriov {
            Sriov::PhysicalFunction { num_vfs, .. } => num_vfs,
            _ => 0,
        }
    }

    /// The physical device backing this one: the PF for a virtual function,
    /// the device itself otherwise.
    pub fn physical_function(&self) -> &PciDevice {
        match &self.sriov {
            Sriov::VirtualFunction { physical_function } => physical_function,
            _ => self,
        }
    }

    pub fn pci_device_id(&self) -> DeviceId {
        DeviceId::new(self.device_id, self.vendor_id)
    }
}

/// Validate PCI address format.
pub fn is_valid_pci_address(address: &str) -> bool {
    PCI_ADDRESS_REGEX.is_match(address)
}

/// Numeric ordering key for a PCI address ("0000:3b:00.4" -> 0x00003b0004).
pub fn address_sort_key(address: &str) -> u64 {
    let digits: String = address.chars().filter(|c| *c != ':' && *c != '.').collect();
    u64::from_str_radix(&digits, 16).unwrap_or(u64::MAX)
}

/// Read a value from a sysfs file.
pub(crate) fn read_sysfs_value(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| VgpuError::IoError { path: path.to_path_buf(), source: e })
}

/// Write a value to an existing sysfs attribute.
pub(crate) fn write_sysfs_value(path: &Path, value: &str) -> Result<()> {
    use std::io::Write;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|e| VgpuError::IoError { path: path.to_path_buf(), source: e })?;
    file.write_all(value.as_bytes())
        .map_err(|e| VgpuError::IoError { path: path.to_path_buf(), source: e })
}

/// Basename of a symlink target (`driver`, `iommu_group`).
pub(crate) fn read_link_name(link: &Path) -> Option<String> {
    fs::read_link(link)
        .ok()
        .and_then(|target| target.file_name().map(|n| n.to_string_lossy().to_string()))
}

fn read_hex_u16(path: &Path) -> Result<u16> {
    let value = read_sysfs_value(path)?;
    u16::from_str_radix(value.trim_start_matches("0x"), 16).map_err(|_| VgpuError::InvalidConfig {
        reason: format!("Unexpected value '{}' in {}", value, path.display()),
    })
}

fn read_hex_u32(path: &Path) -> Result<u32> {
    let value = read_sysfs_value(path)?;
    u32::from_str_radix(value.trim_start_matches("0x"), 16).map_err(|_| VgpuError::InvalidConfig {
        reason: format!("Unexpected value '{}' in {}", value, path.display()),
    })
}

/// Read the NUMA node for a device.
fn read_numa_node(device_path: &Path) -> i32 {
    fs::read_to_string(device_path.join("numa_node"))
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(-1)
}

/// Work out the SR-IOV role from `physfn` and `sriov_*` attributes.
fn read_sriov(paths: &SysfsPaths, device_path: &Path) -> Result<Sriov> {
    if let Some(pf_address) = read_link_name(&device_path.join("physfn")) {
        let physical_function = PciDevice::from_address(paths, &pf_address)?;
        return Ok(Sriov::VirtualFunction { physical_function: Box::new(physical_function) });
    }

    let total_path = device_path.join("sriov_totalvfs");
    if !total_path.exists() {
        return Ok(Sriov::None);
    }

    let total_vfs = read_sysfs_value(&total_path)?.parse().unwrap_or(0);
    let num_vfs = fs::read_to_string(device_path.join("sriov_numvfs"))
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0);

    Ok(Sriov::PhysicalFunction { total_vfs, num_vfs })
}
