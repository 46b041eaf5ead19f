//! vGPU configuration files.
//!
//! A configuration file holds named vGPU configs, each a list of entries
//! selecting GPUs by index and optional PCI device ID. Only version `v1`
//! exists today.

use crate::error::{Result, VgpuError};
use crate::pci::PciDevice;
use crate::types::VgpuConfig;
use std::io::Read;
use std::path::Path;
use tracing::debug;

pub mod v1;

pub use v1::{DeviceFilter, Devices, Spec, VgpuConfigSpec};

/// Path value meaning "read the file from stdin".
pub const STDIN_PATH: &str = "-";

/// Parse and validate a configuration file from YAML text.
pub fn parse(content: &str) -> Result<Spec> {
    let spec: Spec = serde_yaml::from_str(content).map_err(|e| VgpuError::InvalidConfig {
        reason: format!("unmarshal error: {}", e),
    })?;
    spec.validate()?;
    Ok(spec)
}

/// Load a configuration file, or stdin when the path is `-`.
pub fn load(path: &Path) -> Result<Spec> {
    let content = if path == Path::new(STDIN_PATH) {
        let mut content = String::new();
        std::io::stdin()
            .read_to_string(&mut content)
            .map_err(|e| VgpuError::IoError { path: path.to_path_buf(), source: e })?;
        content
    } else {
        std::fs::read_to_string(path)
            .map_err(|e| VgpuError::IoError { path: path.to_path_buf(), source: e })?
    };

    debug!(path = %path.display(), "Parsing config file");
    parse(&content)
}

/// One GPU selected by a config entry.
#[derive(Debug, Clone)]
pub struct GpuAssignment<'a> {
    pub index: usize,
    pub gpu: &'a PciDevice,
    pub vgpu_devices: &'a VgpuConfig,
}

/// Pair every GPU with the config entries that select it.
///
/// Entries are walked in file order and GPUs in index order within each
/// entry, so a GPU matched by several entries appears once per entry.
pub fn assignments<'a>(
    specs: &'a [VgpuConfigSpec],
    gpus: &'a [PciDevice],
) -> Vec<GpuAssignment<'a>> {
    let mut result = Vec::new();

    for spec in specs {
        debug!(
            devices = %spec.devices,
            filtered = !spec.device_filter.is_empty(),
            "Walking vGPU config"
        );

        for (index, gpu) in gpus.iter().enumerate() {
            if !spec.matches_device_filter(gpu.pci_device_id()) || !spec.matches_devices(index) {
                continue;
            }
            debug!(index, device_id = %gpu.pci_device_id(), "Matched GPU");
            result.push(GpuAssignment { index, gpu, vgpu_devices: &spec.vgpu_devices });
        }
    }

    result
}
