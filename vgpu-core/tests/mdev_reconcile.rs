//! Integration tests for the mdev backend driven through the engine.
//!
//! The fake tree cannot spawn devices when a UUID is written to `create`,
//! so these tests check the control files the engine writes.

mod common;

use common::FakeSysfs;
use uuid::Uuid;
use vgpu_core::{
    BackendMode, GpuTarget, ManagerConfig, VgpuConfig, VgpuConfigManager, VgpuError, VgpuManager,
};

const GPU0: &str = "0000:3b:00.0";
const GPU1: &str = "0000:d8:00.0";
const EXISTING: &str = "3c2a7b1e-9d4f-4e8a-b0c1-2d3e4f5a6b7c";

fn fixture() -> FakeSysfs {
    let sysfs = FakeSysfs::new();
    sysfs.add_gpu(GPU0, "0x1eb8");
    sysfs.add_gpu(GPU1, "0x1eb8");
    for gpu in [GPU0, GPU1] {
        sysfs.add_mdev_parent(
            gpu,
            &[("nvidia-222", "GRID T4-1Q", 16), ("nvidia-223", "GRID T4-2Q", 8)],
        );
    }
    sysfs.add_mdev_device(GPU0, "nvidia-222", EXISTING);
    sysfs
}

fn engine(sysfs: &FakeSysfs) -> VgpuConfigManager {
    let config = ManagerConfig {
        mode_detect_timeout_secs: 0,
        ..ManagerConfig::with_root(sysfs.root())
    };
    let manager = VgpuManager::detect(&config).unwrap();
    assert_eq!(manager.mode(), BackendMode::Mdev);
    VgpuConfigManager::new(manager)
}

fn config(entries: &[(&str, i64)]) -> VgpuConfig {
    entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

#[test]
fn test_reads_existing_devices() {
    let sysfs = fixture();
    let engine = engine(&sysfs);

    assert_eq!(engine.get_vgpu_config(&GpuTarget::Index(0)).unwrap(), config(&[("T4-1Q", 1)]));
    assert!(engine.get_vgpu_config(&GpuTarget::Index(1)).unwrap().is_empty());
}

#[test]
fn test_apply_removes_then_creates() {
    let sysfs = fixture();
    let engine = engine(&sysfs);

    engine.set_vgpu_config(&GpuTarget::Index(0), &config(&[("T4-2Q", 2)])).unwrap();

    let removed = std::fs::read_to_string(sysfs.pci(GPU0).join(EXISTING).join("remove")).unwrap();
    assert_eq!(removed, "1");

    let created = sysfs.mdev_create_file(GPU0, "nvidia-223");
    assert!(Uuid::parse_str(&created).is_ok());
    assert!(sysfs.mdev_create_file(GPU1, "nvidia-223").is_empty());
}

#[test]
fn test_capacity_exceeded() {
    let sysfs = fixture();
    let engine = engine(&sysfs);

    match engine.set_vgpu_config(&GpuTarget::Index(1), &config(&[("T4-2Q", 9)])) {
        Err(VgpuError::CapacityExceeded { requested, vgpu_type }) => {
            assert_eq!(requested, 9);
            assert_eq!(vgpu_type, "T4-2Q");
        }
        other => panic!("Expected CapacityExceeded, got {:?}", other),
    }
}

#[test]
fn test_type_unsupported() {
    let sysfs = fixture();
    let engine = engine(&sysfs);

    match engine.set_vgpu_config(&GpuTarget::Index(0), &config(&[("T4-16Q", 1)])) {
        Err(VgpuError::TypeUnsupported { vgpu_type, gpu }) => {
            assert_eq!(vgpu_type, "T4-16Q");
            assert_eq!(gpu, GPU0);
        }
        other => panic!("Expected TypeUnsupported, got {:?}", other),
    }

    // Nothing was cleared
    let removed = std::fs::read_to_string(sysfs.pci(GPU0).join(EXISTING).join("remove")).unwrap();
    assert!(removed.is_empty());
}

#[test]
fn test_mig_attribute_suffix_is_dropped() {
    let sysfs = FakeSysfs::new();
    sysfs.add_gpu(GPU0, "0x2bb5");
    sysfs.add_mdev_parent(GPU0, &[("nvidia-1001", "NVIDIA RTX Pro 6000 Blackwell DC-1-24Q", 4)]);
    let engine = engine(&sysfs);

    engine.set_vgpu_config(&GpuTarget::Index(0), &config(&[("DC-1-24QGFX", 1)])).unwrap();

    assert!(Uuid::parse_str(&sysfs.mdev_create_file(GPU0, "nvidia-1001")).is_ok());
}
