//! vGPU Device Manager Core Library
//!
//! Type grammar, sysfs backends and the reconciliation engine for NVIDIA
//! vGPU devices.

pub mod backend;
pub mod config;
pub mod config_file;
pub mod engine;
pub mod error;
pub mod manager;
pub mod observability;
pub mod paths;
pub mod pci;
pub mod sync;
pub mod types;

// Re-export commonly used items
pub use backend::{Availability, BackendMode, Device, ParentDevice, VgpuBackend};
pub use config::ManagerConfig;
pub use engine::{ReconcilePhase, VgpuConfigManager};
pub use error::{Result, VgpuError};
pub use manager::{GpuTarget, VgpuManager};
pub use observability::init as init_observability;
pub use pci::{PciBus, PciDevice};
pub use types::{DeviceId, VgpuConfig, VgpuType};
