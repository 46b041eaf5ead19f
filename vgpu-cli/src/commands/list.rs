//! `vgpu-dm list` command

use anyhow::Result;
use vgpu_core::{ManagerConfig, VgpuManager};

/// Print the GPUs and the active backend's parents and devices.
pub fn list(settings: &ManagerConfig) -> Result<()> {
    let manager = VgpuManager::detect(settings)?;
    let gpus = manager.gpus()?;

    if gpus.is_empty() {
        println!("No NVIDIA GPUs detected");
        return Ok(());
    }

    println!("Mode: {}", manager.mode());
    println!();
    println!(
        "{:<6} {:<15} {:<12} {:<12} {:<6}",
        "INDEX", "PCI ADDRESS", "DEVICE ID", "DRIVER", "VFS"
    );
    println!("{}", "-".repeat(55));
    for (index, gpu) in gpus.iter().enumerate() {
        println!(
            "{:<6} {:<15} {:<12} {:<12} {:<6}",
            index,
            gpu.address,
            gpu.pci_device_id().to_string(),
            gpu.driver.as_deref().unwrap_or("-"),
            gpu.num_vfs()
        );
    }

    let parents = manager.parent_devices()?;
    println!();
    println!("{:<15} {:<15} {:<50}", "PARENT", "GPU", "TYPES");
    println!("{}", "-".repeat(82));
    for parent in &parents {
        let types = parent.supported_types()?.join(",");
        println!(
            "{:<15} {:<15} {:<50}",
            parent.address(),
            parent.physical_function().address,
            truncate(&types, 50)
        );
    }

    let devices = manager.devices()?;
    println!();
    println!("{:<40} {:<15} {:<15}", "DEVICE", "TYPE", "PARENT");
    println!("{}", "-".repeat(72));
    for device in &devices {
        println!(
            "{:<40} {:<15} {:<15}",
            truncate(device.id(), 40),
            device.vgpu_type(),
            device.parent_address()
        );
    }

    println!();
    println!(
        "Total: {} GPU(s), {} parent(s), {} vGPU device(s)",
        gpus.len(),
        parents.len(),
        devices.len()
    );

    Ok(())
}

/// Truncate string to max length with ellipsis.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{}...", kept)
    }
}
