//! VFIO (SR-IOV) backend.
//!
//! On GPUs using the vendor-specific VFIO framework every virtual function
//! hosts at most one vGPU. The type is selected by writing its numeric id to
//! `<pf>/virtfn<N>/nvidia/current_vgpu_type` and cleared by writing `0`.
//! The ids come from the `creatable_vgpu_types` listing next to it.

use crate::backend::{
    parse_type_listing, Availability, BackendMode, Device, ParentDevice, VgpuBackend,
};
use crate::error::{Result, VgpuError};
use crate::pci::device::{read_link_name, read_sysfs_value, write_sysfs_value};
use crate::pci::{PciBus, PciDevice};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Listing of the types the VF can be switched to right now.
pub const CREATABLE_TYPES_FILE: &str = "creatable_vgpu_types";
/// Listing of every type the VF knows about.
pub const SUPPORTED_TYPES_FILE: &str = "supported_vgpu_types";
pub const CURRENT_TYPE_FILE: &str = "current_vgpu_type";

/// Path of the vendor control directory for a virtual function.
pub fn vf_control_path(pf: &PciDevice, vf_index: u32) -> PathBuf {
    pf.sysfs_path.join(format!("virtfn{}", vf_index)).join("nvidia")
}

/// Backend driving per-VF vGPU selection.
#[derive(Debug, Clone)]
pub struct VfioBackend {
    bus: PciBus,
}

impl VfioBackend {
    pub fn new(bus: PciBus) -> Self {
        Self { bus }
    }

    fn parents(&self) -> Result<Vec<VfioParent>> {
        let gpus = self.bus.gpus().map_err(|e| {
            VgpuError::enumeration(format!("unable to get all NVIDIA GPU devices: {}", e))
        })?;

        let mut parents = Vec::new();
        for gpu in gpus {
            for vf_index in 0..gpu.num_vfs() {
                let path = vf_control_path(&gpu, vf_index);
                if !path.exists() {
                    return Err(VgpuError::enumeration(format!(
                        "virtual function {} at address {} does not exist",
                        vf_index,
                        path.display()
                    )));
                }

                let vf_link = gpu.sysfs_path.join(format!("virtfn{}", vf_index));
                let address = read_link_name(&vf_link)
                    .unwrap_or_else(|| format!("{}/virtfn{}", gpu.address, vf_index));

                parents.push(VfioParent {
                    physical_function: gpu.clone(),
                    vf_index,
                    address,
                    path,
                });
            }
        }

        Ok(parents)
    }
}

impl VgpuBackend for VfioBackend {
    fn name(&self) -> &str {
        "vfio"
    }

    fn mode(&self) -> BackendMode {
        BackendMode::Vfio
    }

    #[instrument(skip(self))]
    fn parent_devices(&self) -> Result<Vec<Arc<dyn ParentDevice>>> {
        let parents = self.parents()?;
        debug!(count = parents.len(), "Enumerated VFIO parent devices");
        Ok(parents.into_iter().map(|p| Arc::new(p) as Arc<dyn ParentDevice>).collect())
    }

    #[instrument(skip(self))]
    fn devices(&self) -> Result<Vec<Box<dyn Device>>> {
        let mut devices: Vec<Box<dyn Device>> = Vec::new();

        for parent in self.parents()? {
            let type_id = parent.current_type_id().map_err(|e| {
                VgpuError::enumeration(format!("unable to read current vGPU type: {}", e))
            })?;
            if type_id == 0 {
                continue;
            }

            // An unlisted id still has to be clearable, so it is reported by number.
            let vgpu_type = match parent.type_name(type_id)? {
                Some(name) => name,
                None => {
                    warn!(
                        vf = %parent.address,
                        type_id,
                        "vGPU type id is not listed in {} or {}",
                        CREATABLE_TYPES_FILE,
                        SUPPORTED_TYPES_FILE
                    );
                    type_id.to_string()
                }
            };

            devices.push(Box::new(VfioDevice {
                id: parent.path.to_string_lossy().to_string(),
                vgpu_type,
                type_id,
                parent,
            }));
        }

        debug!(count = devices.len(), "Enumerated VFIO vGPU devices");
        Ok(devices)
    }

    /// A virtual function has exactly one slot, so the id is only ever "0"
    /// when the engine stays within the reported capacity.
    fn instance_id(&self, slot: usize) -> String {
        slot.to_string()
    }
}

/// One SR-IOV virtual function of an NVIDIA GPU.
#[derive(Debug, Clone)]
pub struct VfioParent {
    physical_function: PciDevice,
    vf_index: u32,
    /// PCI address of the virtual function
    address: String,
    /// `<pf>/virtfn<N>/nvidia`
    path: PathBuf,
}

impl VfioParent {
    fn current_type_id(&self) -> Result<u32> {
        let path = self.path.join(CURRENT_TYPE_FILE);
        let value = read_sysfs_value(&path)?;
        value.parse().map_err(|_| {
            VgpuError::enumeration(format!(
                "unable to convert current vGPU type '{}' in {} to an integer",
                value,
                path.display()
            ))
        })
    }

    fn creatable_types(&self) -> Result<Vec<(u32, String)>> {
        let path = self.path.join(CREATABLE_TYPES_FILE);
        let content = fs::read_to_string(&path)
            .map_err(|e| VgpuError::IoError { path: path.clone(), source: e })?;
        Ok(parse_type_listing(&content))
    }

    /// The full listing, which is absent on some driver versions.
    fn listed_types(&self) -> Result<Vec<(u32, String)>> {
        let path = self.path.join(SUPPORTED_TYPES_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path)
            .map_err(|e| VgpuError::IoError { path: path.clone(), source: e })?;
        Ok(parse_type_listing(&content))
    }

    fn type_name(&self, type_id: u32) -> Result<Option<String>> {
        let lookup = |listing: Vec<(u32, String)>| {
            listing.into_iter().find(|(id, _)| *id == type_id).map(|(_, name)| name)
        };

        if let Some(name) = lookup(self.creatable_types()?) {
            return Ok(Some(name));
        }
        Ok(lookup(self.listed_types()?))
    }

    fn create_error(&self, vgpu_type: &str, reason: impl Into<String>) -> VgpuError {
        VgpuError::CreateFailed {
            vgpu_type: vgpu_type.to_string(),
            parent: self.address.clone(),
            reason: reason.into(),
        }
    }
}

impl ParentDevice for VfioParent {
    fn address(&self) -> &str {
        &self.address
    }

    fn physical_function(&self) -> &PciDevice {
        &self.physical_function
    }

    fn supported_types(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .creatable_types()?
            .into_iter()
            .chain(self.listed_types()?)
            .map(|(_, name)| name)
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn supports_type(&self, vgpu_type: &str) -> Result<bool> {
        Ok(self.supported_types()?.iter().any(|name| name == vgpu_type))
    }

    fn available_instances(&self, vgpu_type: &str) -> Result<Availability> {
        let creatable = self.creatable_types()?.iter().any(|(_, name)| name == vgpu_type);
        if !creatable {
            if self.listed_types()?.iter().any(|(_, name)| name == vgpu_type) {
                return Ok(Availability::Instances(0));
            }
            return Ok(Availability::Unsupported);
        }

        if self.current_type_id()? != 0 {
            return Ok(Availability::Instances(0));
        }
        Ok(Availability::Instances(1))
    }

    #[instrument(skip(self), fields(parent = %self.address, vf = self.vf_index))]
    fn create_instance(&self, vgpu_type: &str, id_hint: &str) -> Result<()> {
        if id_hint != "0" {
            return Err(self.create_error(
                vgpu_type,
                format!("a virtual function hosts a single vGPU, got slot {}", id_hint),
            ));
        }

        let current = self
            .current_type_id()
            .map_err(|e| self.create_error(vgpu_type, e.to_string()))?;
        if current != 0 {
            return Err(self.create_error(
                vgpu_type,
                format!("virtual function already has vGPU type {}", current),
            ));
        }

        let type_id = self
            .creatable_types()
            .map_err(|e| self.create_error(vgpu_type, e.to_string()))?
            .into_iter()
            .find(|(_, name)| name == vgpu_type)
            .map(|(id, _)| id)
            .ok_or_else(|| {
                self.create_error(
                    vgpu_type,
                    format!("vGPU type not found in {}", CREATABLE_TYPES_FILE),
                )
            })?;

        write_sysfs_value(&self.path.join(CURRENT_TYPE_FILE), &type_id.to_string())
            .map_err(|e| self.create_error(vgpu_type, e.to_string()))?;

        debug!(type_id = type_id, "Set vGPU type on virtual function");
        Ok(())
    }
}

/// A virtual function with a vGPU type selected.
#[derive(Debug, Clone)]
pub struct VfioDevice {
    id: String,
    vgpu_type: String,
    type_id: u32,
    parent: VfioParent,
}

impl Device for VfioDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn vgpu_type(&self) -> &str {
        &self.vgpu_type
    }

    fn parent_address(&self) -> &str {
        &self.parent.address
    }

    fn physical_function(&self) -> &PciDevice {
        &self.parent.physical_function
    }

    fn delete(&self) -> Result<()> {
        write_sysfs_value(&self.parent.path.join(CURRENT_TYPE_FILE), "0").map_err(|e| {
            VgpuError::DeleteFailed { device: self.id.clone(), reason: e.to_string() }
        })?;
        debug!(vf = %self.parent.address, type_id = self.type_id, "Cleared vGPU type");
        Ok(())
    }
}
