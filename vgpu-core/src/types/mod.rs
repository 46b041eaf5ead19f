//! Core domain types for the vGPU device manager.

pub mod device_id;
pub mod vgpu_config;
pub mod vgpu_type;

// Re-exports
pub use device_id::DeviceId;
pub use vgpu_config::VgpuConfig;
pub use vgpu_type::{strip_attribute_suffix, strip_product_prefix, Attribute, Series, VgpuType};
