//! Core metrics definitions.
//!
//! All metrics follow Prometheus naming conventions:
//! - `_total` suffix for counters
//!
//! Only the `metrics` facade is used here. Without an installed recorder the
//! calls are no-ops, so embedding applications decide whether to export.

use metrics::{counter, describe_counter};

/// Register all core metrics with descriptions.
pub fn register_core_metrics() {
    describe_counter!(
        "vgpu_devices_created_total",
        "Total number of vGPU devices created (by backend, type)"
    );
    describe_counter!(
        "vgpu_devices_deleted_total",
        "Total number of vGPU devices deleted (by backend)"
    );
    describe_counter!(
        "vgpu_reconcile_failures_total",
        "Total number of failed vGPU config applications (by phase)"
    );
}

pub fn record_device_created(backend: &str, vgpu_type: &str) {
    counter!(
        "vgpu_devices_created_total",
        "backend" => backend.to_string(),
        "type" => vgpu_type.to_string()
    )
    .increment(1);
}

pub fn record_device_deleted(backend: &str) {
    counter!("vgpu_devices_deleted_total", "backend" => backend.to_string()).increment(1);
}

pub fn record_reconcile_failure(phase: &str) {
    counter!("vgpu_reconcile_failures_total", "phase" => phase.to_string()).increment(1);
}
