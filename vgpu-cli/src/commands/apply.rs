//! `vgpu-dm apply` command

use super::{build_engine, load_selected, ConfigArgs};
use anyhow::{Context, Result};
use tracing::{debug, info};
use vgpu_core::config_file::{assignments, VgpuConfigSpec};
use vgpu_core::{GpuTarget, ManagerConfig, VgpuConfigManager};

pub fn apply(settings: &ManagerConfig, args: &ConfigArgs) -> Result<()> {
    let (name, specs) = load_selected(&args.config_file, args.selected_config.as_deref())?;

    if args.valid_config {
        info!(config = %name, "Selected vGPU config is valid");
        return Ok(());
    }

    let engine = build_engine(settings)?;
    let changed = apply_specs(&engine, &specs)?;
    info!(config = %name, gpus_changed = changed, "vGPU config applied");
    Ok(())
}

/// Bring every GPU selected by `specs` to its desired config.
///
/// GPUs already matching are left alone. Returns how many GPUs were changed.
pub fn apply_specs(engine: &VgpuConfigManager, specs: &[VgpuConfigSpec]) -> Result<usize> {
    let gpus = engine.manager().gpus()?;
    let mut changed = 0;

    for assignment in assignments(specs, &gpus) {
        let target = GpuTarget::Address(assignment.gpu.address.clone());

        let current = engine.get_vgpu_config(&target)?;
        if &current == assignment.vgpu_devices {
            debug!(gpu = assignment.index, "Skipping -- already set to desired value");
            continue;
        }

        info!(
            gpu = assignment.index,
            address = %assignment.gpu.address,
            config = %assignment.vgpu_devices,
            "Updating vGPU config"
        );
        engine
            .set_vgpu_config(&target, assignment.vgpu_devices)
            .with_context(|| format!("Failed to apply vGPU config to GPU {}", assignment.index))?;
        changed += 1;
    }

    Ok(changed)
}
