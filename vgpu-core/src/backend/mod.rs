//! vGPU device backends.
//!
//! NVIDIA exposes vGPU creation through two kernel interfaces:
//! - mdev: mediated devices created under `/sys/class/mdev_bus/<gpu>`
//! - VFIO: one vGPU per SR-IOV virtual function, selected through
//!   `/sys/bus/pci/devices/<pf>/virtfn<N>/nvidia/current_vgpu_type`
//!
//! Both are presented through the `VgpuBackend`, `ParentDevice` and `Device`
//! traits so the reconciliation engine never needs to know which one is active.

use crate::error::Result;
use crate::pci::PciDevice;
use std::fmt;
use std::sync::Arc;

pub mod mdev;
pub mod vfio;

pub use mdev::MdevBackend;
pub use vfio::VfioBackend;

/// Which kernel interface a backend drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendMode {
    Mdev,
    Vfio,
}

impl fmt::Display for BackendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendMode::Mdev => write!(f, "mdev"),
            BackendMode::Vfio => write!(f, "vfio"),
        }
    }
}

/// Remaining capacity of a parent device for one vGPU type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// The parent cannot host this type at all
    Unsupported,
    /// The parent supports the type and has room for this many more instances
    Instances(usize),
}

impl Availability {
    /// Number of instances that can be created right now.
    pub fn count(self) -> usize {
        match self {
            Availability::Unsupported => 0,
            Availability::Instances(n) => n,
        }
    }

    pub fn is_supported(self) -> bool {
        self != Availability::Unsupported
    }
}

/// A device that vGPU instances can be created on.
///
/// For mdev this is the GPU (or one of its virtual functions) registered on
/// the mdev bus. For VFIO it is a single virtual function.
pub trait ParentDevice: Send + Sync {
    /// PCI address of the parent itself.
    fn address(&self) -> &str;

    /// The physical GPU backing this parent.
    fn physical_function(&self) -> &PciDevice;

    /// Canonical names of every vGPU type the parent exposes.
    fn supported_types(&self) -> Result<Vec<String>>;

    /// Whether the parent exposes the type at all, regardless of capacity.
    fn supports_type(&self, vgpu_type: &str) -> Result<bool>;

    /// Query the live capacity for a type. Never cached.
    fn available_instances(&self, vgpu_type: &str) -> Result<Availability>;

    /// Whether at least one more instance of the type fits.
    fn is_type_available(&self, vgpu_type: &str) -> Result<bool> {
        Ok(self.available_instances(vgpu_type)?.count() > 0)
    }

    /// Create one vGPU instance. `id_hint` comes from `VgpuBackend::instance_id`.
    fn create_instance(&self, vgpu_type: &str, id_hint: &str) -> Result<()>;
}

/// A live vGPU instance.
pub trait Device: Send + Sync {
    /// UUID for mdev devices, control path for VFIO devices.
    fn id(&self) -> &str;

    /// Canonical vGPU type name.
    fn vgpu_type(&self) -> &str;

    /// PCI address of the parent device hosting the instance.
    fn parent_address(&self) -> &str;

    fn physical_function(&self) -> &PciDevice;

    fn delete(&self) -> Result<()>;
}

/// One kernel interface for enumerating, creating and deleting vGPUs.
pub trait VgpuBackend: Send + Sync {
    /// Backend name (for logging/metrics).
    fn name(&self) -> &str;

    fn mode(&self) -> BackendMode;

    /// All NVIDIA parent devices, grouped by physical GPU in address order.
    fn parent_devices(&self) -> Result<Vec<Arc<dyn ParentDevice>>>;

    /// All live vGPU instances on NVIDIA parents.
    fn devices(&self) -> Result<Vec<Box<dyn Device>>>;

    /// Identifier passed to `create_instance` for the `slot`-th instance
    /// created on a single parent in one pass.
    fn instance_id(&self, slot: usize) -> String;
}

/// Parse a `creatable_vgpu_types` / `supported_vgpu_types` listing.
///
/// Each line carries a numeric type id as its first field and the type name
/// as its last field (`557   : NVIDIA L4-1Q`). Header lines and anything
/// else without a numeric first field are skipped.
pub fn parse_type_listing(content: &str) -> Vec<(u32, String)> {
    content
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 2 {
                return None;
            }
            let id = fields[0].parse().ok()?;
            Some((id, fields[fields.len() - 1].to_string()))
        })
        .collect()
}
