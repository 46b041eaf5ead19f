//! Error types for the vGPU device manager.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for vGPU operations.
pub type Result<T> = std::result::Result<T, VgpuError>;

/// Main error type for the vGPU device manager.
#[derive(Error, Debug)]
pub enum VgpuError {
    // Grammar and validation errors
    #[error("Malformed vGPU type '{input}': {reason}")]
    Malformed { input: String, reason: String },

    #[error("Invalid count for '{vgpu_type}': {count}")]
    NonPositiveCount { vgpu_type: String, count: i64 },

    #[error("Cannot mix time-sliced and MIG-backed vGPU devices on the same GPU")]
    MixedBackingMode,

    #[error("All counts for all vGPU types are 0")]
    AllZero,

    // Kernel device tree errors
    #[error("Failed to enumerate vGPU devices: {reason}")]
    EnumerationFailed { reason: String },

    #[error("GPU not found: {target}")]
    GpuNotFound { target: String },

    #[error("No parent devices found for GPU at address '{gpu}'")]
    NoParentDevices { gpu: String },

    #[error(
        "Timed out after {waited:?} waiting for vGPU interfaces to appear under {path:?}"
    )]
    ModeDetectionTimeout { path: PathBuf, waited: Duration },

    // Reconciliation errors
    #[error("vGPU type {vgpu_type} is not supported on GPU ({gpu})")]
    TypeUnsupported { vgpu_type: String, gpu: String },

    #[error(
        "Failed to create {requested} {vgpu_type} vGPU devices on the GPU. \
         Ensure '{requested}' does not exceed the maximum supported instances for '{vgpu_type}'"
    )]
    CapacityExceeded { requested: usize, vgpu_type: String },

    #[error("Unable to create {vgpu_type} vGPU device on parent device {parent}: {reason}")]
    CreateFailed { vgpu_type: String, parent: String, reason: String },

    #[error("Unable to delete vGPU device {device}: {reason}")]
    DeleteFailed { device: String, reason: String },

    // File system errors
    #[error("I/O error at {path:?}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Configuration errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl VgpuError {
    /// Create a `Malformed` error for a type name.
    pub fn malformed(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed { input: input.into(), reason: reason.into() }
    }

    /// Create an `EnumerationFailed` error from any displayable cause.
    pub fn enumeration(reason: impl std::fmt::Display) -> Self {
        Self::EnumerationFailed { reason: reason.to_string() }
    }
}
