//! `vgpu-dm assert` command

use super::{build_engine, load_selected, ConfigArgs};
use anyhow::{bail, Result};
use tracing::{debug, info, warn};
use vgpu_core::config_file::{assignments, VgpuConfigSpec};
use vgpu_core::{GpuTarget, ManagerConfig, VgpuConfigManager};

pub fn assert(settings: &ManagerConfig, args: &ConfigArgs) -> Result<()> {
    let (name, specs) = load_selected(&args.config_file, args.selected_config.as_deref())?;

    if args.valid_config {
        info!(config = %name, "Selected vGPU config is valid");
        return Ok(());
    }

    let engine = build_engine(settings)?;
    if !matches(&engine, &specs)? {
        bail!("Assertion failure: selected configuration not currently applied");
    }

    info!(config = %name, "Selected vGPU configuration is currently applied");
    Ok(())
}

/// Whether every GPU selected by `specs` already has its desired config.
///
/// GPUs no entry selects must not carry any vGPU devices.
pub fn matches(engine: &VgpuConfigManager, specs: &[VgpuConfigSpec]) -> Result<bool> {
    let gpus = engine.manager().gpus()?;
    let mut selected = vec![false; gpus.len()];
    let mut all_match = true;

    for assignment in assignments(specs, &gpus) {
        selected[assignment.index] = true;
        let target = GpuTarget::Address(assignment.gpu.address.clone());
        let current = engine.get_vgpu_config(&target)?;

        if &current == assignment.vgpu_devices {
            debug!(gpu = assignment.index, config = %current, "GPU matches");
        } else {
            warn!(
                gpu = assignment.index,
                address = %assignment.gpu.address,
                current = %current,
                desired = %assignment.vgpu_devices,
                "GPU does not match the selected config"
            );
            all_match = false;
        }
    }

    for (index, gpu) in gpus.iter().enumerate().filter(|(index, _)| !selected[*index]) {
        let current = engine.get_vgpu_config(&GpuTarget::Address(gpu.address.clone()))?;
        if !current.is_empty() {
            warn!(
                gpu = index,
                address = %gpu.address,
                current = %current,
                "GPU not selected by the config still has vGPU devices"
            );
            all_match = false;
        }
    }

    Ok(all_match)
}
