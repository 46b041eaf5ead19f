//! Mediated-device (mdev) backend.
//!
//! Parents are the NVIDIA entries of `/sys/class/mdev_bus`. Each exposes its
//! vGPU types as `mdev_supported_types/nvidia-<id>/` directories holding a
//! `name`, an `available_instances` counter and a write-only `create` file.
//! Live devices appear as `/sys/bus/mdev/devices/<uuid>` symlinks into the
//! parent's directory and are removed by writing `1` to their `remove` file.

use crate::backend::{Availability, BackendMode, Device, ParentDevice, VgpuBackend};
use crate::error::{Result, VgpuError};
use crate::pci::device::{read_link_name, read_sysfs_value, write_sysfs_value};
use crate::pci::{address_sort_key, PciBus, PciDevice};
use crate::types::strip_product_prefix;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Prefix of NVIDIA entries in `mdev_supported_types`.
const NVIDIA_TYPE_PREFIX: &str = "nvidia-";

/// Backend driving mediated devices.
#[derive(Debug, Clone)]
pub struct MdevBackend {
    bus: PciBus,
}

impl MdevBackend {
    pub fn new(bus: PciBus) -> Self {
        Self { bus }
    }

    /// Build a parent for an mdev bus entry, or `None` if it is not an NVIDIA GPU.
    fn parent_at(&self, device_path: &Path) -> Result<Option<MdevParent>> {
        let address = match device_path.file_name() {
            Some(name) => name.to_string_lossy().to_string(),
            None => return Ok(None),
        };

        let device = match self.bus.nvidia_device(&address)? {
            Some(device) => device,
            None => return Ok(None),
        };

        let types = read_supported_types(&device.sysfs_path)?;
        Ok(Some(MdevParent { device, types }))
    }

    fn device_at(&self, link: &Path, uuid: &str) -> Result<Option<MdevDevice>> {
        let resolved = fs::canonicalize(link)
            .map_err(|e| VgpuError::IoError { path: link.to_path_buf(), source: e })?;

        let parent_path = match resolved.parent() {
            Some(parent) => parent.to_path_buf(),
            None => return Ok(None),
        };
        let parent = match self.parent_at(&parent_path)? {
            Some(parent) => parent,
            None => return Ok(None),
        };

        let type_dir = resolved.join("mdev_type");
        let type_dir = fs::canonicalize(&type_dir)
            .map_err(|e| VgpuError::IoError { path: type_dir.clone(), source: e })?;
        let vgpu_type = strip_product_prefix(&read_sysfs_value(&type_dir.join("name"))?)?;

        Ok(Some(MdevDevice {
            path: link.to_path_buf(),
            uuid: uuid.to_string(),
            vgpu_type,
            driver: read_link_name(&resolved.join("driver")),
            iommu_group: read_link_name(&resolved.join("iommu_group")),
            parent_address: parent.device.address.clone(),
            physical_function: parent.device.physical_function().clone(),
        }))
    }
}

impl VgpuBackend for MdevBackend {
    fn name(&self) -> &str {
        "mdev"
    }

    fn mode(&self) -> BackendMode {
        BackendMode::Mdev
    }

    #[instrument(skip(self))]
    fn parent_devices(&self) -> Result<Vec<Arc<dyn ParentDevice>>> {
        let root = self.bus.paths().mdev_bus();
        let entries = fs::read_dir(&root).map_err(|e| {
            VgpuError::enumeration(format!("unable to read {}: {}", root.display(), e))
        })?;

        let mut parents = Vec::new();
        for entry in entries {
            let entry = entry.map_err(VgpuError::enumeration)?;
            let parent = self.parent_at(&entry.path()).map_err(|e| {
                VgpuError::enumeration(format!("error constructing NVIDIA parent device: {}", e))
            })?;
            if let Some(parent) = parent {
                parents.push(parent);
            }
        }

        parents.sort_by_key(|p| {
            (address_sort_key(&p.physical_function().address), address_sort_key(&p.device.address))
        });

        debug!(count = parents.len(), "Enumerated mdev parent devices");
        Ok(parents.into_iter().map(|p| Arc::new(p) as Arc<dyn ParentDevice>).collect())
    }

    #[instrument(skip(self))]
    fn devices(&self) -> Result<Vec<Box<dyn Device>>> {
        let root = self.bus.paths().mdev_devices();
        let entries = match fs::read_dir(&root) {
            Ok(entries) => entries,
            // The mdev bus directory only appears once the first mdev-capable driver loads.
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(VgpuError::enumeration(format!(
                    "unable to read {}: {}",
                    root.display(),
                    e
                )))
            }
        };

        let mut devices: Vec<Box<dyn Device>> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(VgpuError::enumeration)?;
            let uuid = entry.file_name().to_string_lossy().to_string();
            let device = self.device_at(&entry.path(), &uuid).map_err(|e| {
                VgpuError::enumeration(format!("error constructing mdev device {}: {}", uuid, e))
            })?;
            if let Some(device) = device {
                devices.push(Box::new(device));
            }
        }

        debug!(count = devices.len(), "Enumerated mdev devices");
        Ok(devices)
    }

    fn instance_id(&self, _slot: usize) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Map canonical type name to its `mdev_supported_types/nvidia-*` directory.
fn read_supported_types(device_path: &Path) -> Result<BTreeMap<String, PathBuf>> {
    let types_dir = device_path.join("mdev_supported_types");
    let mut types = BTreeMap::new();

    let entries = match fs::read_dir(&types_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(types),
        Err(e) => return Err(VgpuError::IoError { path: types_dir, source: e }),
    };

    for entry in entries {
        let entry = entry.map_err(|e| VgpuError::IoError { path: types_dir.clone(), source: e })?;
        if !entry.file_name().to_string_lossy().starts_with(NVIDIA_TYPE_PREFIX) {
            continue;
        }

        let type_dir = entry.path();
        let name_path = type_dir.join("name");
        if !name_path.exists() {
            continue;
        }

        let name = strip_product_prefix(&read_sysfs_value(&name_path)?)?;
        types.insert(name, type_dir);
    }

    Ok(types)
}

/// An NVIDIA device on the mdev bus.
#[derive(Debug, Clone)]
pub struct MdevParent {
    device: PciDevice,
    types: BTreeMap<String, PathBuf>,
}

impl ParentDevice for MdevParent {
    fn address(&self) -> &str {
        &self.device.address
    }

    fn physical_function(&self) -> &PciDevice {
        self.device.physical_function()
    }

    fn supported_types(&self) -> Result<Vec<String>> {
        Ok(self.types.keys().cloned().collect())
    }

    fn supports_type(&self, vgpu_type: &str) -> Result<bool> {
        Ok(self.types.contains_key(vgpu_type))
    }

    fn available_instances(&self, vgpu_type: &str) -> Result<Availability> {
        let type_dir = match self.types.get(vgpu_type) {
            Some(dir) => dir,
            None => return Ok(Availability::Unsupported),
        };

        let path = type_dir.join("available_instances");
        let value = read_sysfs_value(&path)?;
        let available: i64 = value.parse().map_err(|_| {
            VgpuError::enumeration(format!(
                "unexpected available_instances value '{}' in {}",
                value,
                path.display()
            ))
        })?;

        Ok(Availability::Instances(available.max(0) as usize))
    }

    #[instrument(skip(self), fields(parent = %self.device.address))]
    fn create_instance(&self, vgpu_type: &str, id_hint: &str) -> Result<()> {
        let type_dir = self.types.get(vgpu_type).ok_or_else(|| VgpuError::CreateFailed {
            vgpu_type: vgpu_type.to_string(),
            parent: self.device.address.clone(),
            reason: "type not supported by parent device".to_string(),
        })?;

        write_sysfs_value(&type_dir.join("create"), id_hint).map_err(|e| {
            VgpuError::CreateFailed {
                vgpu_type: vgpu_type.to_string(),
                parent: self.device.address.clone(),
                reason: e.to_string(),
            }
        })?;

        debug!(uuid = %id_hint, "Created mdev device");
        Ok(())
    }
}

/// A live mediated device.
#[derive(Debug, Clone)]
pub struct MdevDevice {
    /// `/sys/bus/mdev/devices/<uuid>`
    pub path: PathBuf,
    pub uuid: String,
    pub vgpu_type: String,
    pub driver: Option<String>,
    pub iommu_group: Option<String>,
    parent_address: String,
    physical_function: PciDevice,
}

impl Device for MdevDevice {
    fn id(&self) -> &str {
        &self.uuid
    }

    fn vgpu_type(&self) -> &str {
        &self.vgpu_type
    }

    fn parent_address(&self) -> &str {
        &self.parent_address
    }

    fn physical_function(&self) -> &PciDevice {
        &self.physical_function
    }

    fn delete(&self) -> Result<()> {
        write_sysfs_value(&self.path.join("remove"), "1").map_err(|e| VgpuError::DeleteFailed {
            device: self.uuid.clone(),
            reason: e.to_string(),
        })
    }
}
