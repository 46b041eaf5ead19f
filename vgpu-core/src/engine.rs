//! Reconciliation of live vGPU devices against a desired `VgpuConfig`.
//!
//! Applying a config to a GPU runs three phases:
//! 1. Sanitizing: map every requested type to a name the GPU's parent
//!    devices actually expose, before anything is touched.
//! 2. Clearing: delete every vGPU device backed by the GPU.
//! 3. Creating: fill parents in enumeration order, re-reading capacity
//!    before each parent.
//!
//! There is no rollback. A failure part-way leaves the GPU partially
//! configured and the next successful apply converges it.

use crate::backend::ParentDevice;
use crate::error::{Result, VgpuError};
use crate::manager::{GpuTarget, VgpuManager};
use crate::observability::metrics;
use crate::pci::PciDevice;
use crate::types::{strip_attribute_suffix, VgpuConfig};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};

/// Step of a config application, reported in logs and failure metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilePhase {
    Sanitizing,
    Clearing,
    Creating,
    Done,
    Failed,
}

impl ReconcilePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            ReconcilePhase::Sanitizing => "sanitizing",
            ReconcilePhase::Clearing => "clearing",
            ReconcilePhase::Creating => "creating",
            ReconcilePhase::Done => "done",
            ReconcilePhase::Failed => "failed",
        }
    }
}

impl fmt::Display for ReconcilePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reads, applies and clears per-GPU vGPU configs.
#[derive(Debug)]
pub struct VgpuConfigManager {
    manager: VgpuManager,
    /// Serialises clear+create sequences issued through this instance.
    apply_lock: Mutex<()>,
}

impl VgpuConfigManager {
    pub fn new(manager: VgpuManager) -> Self {
        Self { manager, apply_lock: Mutex::new(()) }
    }

    pub fn manager(&self) -> &VgpuManager {
        &self.manager
    }

    /// Tally the live devices backed by the GPU, by type.
    #[instrument(skip(self))]
    pub fn get_vgpu_config(&self, target: &GpuTarget) -> Result<VgpuConfig> {
        let gpu = self.manager.resolve_gpu(target)?;

        let mut config = VgpuConfig::new();
        for device in self.manager.devices_for_gpu(&gpu.address)? {
            config.add(device.vgpu_type(), 1)?;
        }

        debug!(gpu = %gpu.address, config = %config, "Read current vGPU config");
        Ok(config)
    }

    /// Make the GPU's live devices match `config`.
    #[instrument(skip(self, config), fields(config = %config))]
    pub fn set_vgpu_config(&self, target: &GpuTarget, config: &VgpuConfig) -> Result<()> {
        let _guard = self.apply_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let gpu = self.manager.resolve_gpu(target)?;
        let mut phase = ReconcilePhase::Sanitizing;

        match self.reconcile(&gpu, config, &mut phase) {
            Ok(()) => {
                info!(gpu = %gpu.address, phase = %ReconcilePhase::Done, "Applied vGPU config");
                Ok(())
            }
            Err(e) => {
                warn!(
                    gpu = %gpu.address,
                    phase = %ReconcilePhase::Failed,
                    failed_during = %phase,
                    error = %e,
                    "Failed to apply vGPU config"
                );
                metrics::record_reconcile_failure(phase.as_str());
                Err(e)
            }
        }
    }

    /// Delete every vGPU device backed by the GPU.
    #[instrument(skip(self))]
    pub fn clear_vgpu_config(&self, target: &GpuTarget) -> Result<()> {
        let _guard = self.apply_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let gpu = self.manager.resolve_gpu(target)?;
        self.clear_devices(&gpu)
    }

    fn reconcile(
        &self,
        gpu: &PciDevice,
        config: &VgpuConfig,
        phase: &mut ReconcilePhase,
    ) -> Result<()> {
        info!(gpu = %gpu.address, phase = %phase, "Checking requested vGPU types");
        let parents = self.manager.parents_for_gpu(&gpu.address)?;
        let sanitized = sanitize(&parents[0], &gpu.address, config)?;

        *phase = ReconcilePhase::Clearing;
        info!(gpu = %gpu.address, phase = %phase, "Removing existing vGPU devices");
        self.clear_devices(gpu)?;

        *phase = ReconcilePhase::Creating;
        info!(gpu = %gpu.address, phase = %phase, config = %sanitized, "Creating vGPU devices");
        for (vgpu_type, &count) in &sanitized {
            let requested = usize::try_from(count).map_err(|_| VgpuError::NonPositiveCount {
                vgpu_type: vgpu_type.clone(),
                count,
            })?;
            self.create_devices(&parents, vgpu_type, requested)?;
        }

        Ok(())
    }

    fn clear_devices(&self, gpu: &PciDevice) -> Result<()> {
        let devices = self.manager.devices_for_gpu(&gpu.address)?;
        let backend = self.manager.backend().name().to_string();

        for device in devices {
            debug!(
                gpu = %gpu.address,
                device = %device.id(),
                vgpu_type = %device.vgpu_type(),
                "Deleting vGPU device"
            );
            device.delete()?;
            metrics::record_device_deleted(&backend);
        }

        Ok(())
    }

    /// Spread `requested` instances of one type over the GPU's parents.
    fn create_devices(
        &self,
        parents: &[Arc<dyn ParentDevice>],
        vgpu_type: &str,
        requested: usize,
    ) -> Result<()> {
        let backend = self.manager.backend().name().to_string();
        let mut remaining = requested;

        for parent in parents {
            if remaining == 0 {
                break;
            }

            let available = parent.available_instances(vgpu_type)?.count();
            if available == 0 {
                continue;
            }

            let to_create = remaining.min(available);
            for slot in 0..to_create {
                parent.create_instance(vgpu_type, &self.manager.instance_id(slot))?;
                metrics::record_device_created(&backend, vgpu_type);
            }
            debug!(
                parent = %parent.address(),
                vgpu_type = %vgpu_type,
                count = to_create,
                "Created vGPU devices"
            );
            remaining -= to_create;
        }

        if remaining > 0 {
            return Err(VgpuError::CapacityExceeded {
                requested,
                vgpu_type: vgpu_type.to_string(),
            });
        }
        Ok(())
    }
}

/// Resolve requested type names against the GPU's representative parent.
///
/// A name is kept if the parent exposes it, otherwise its MIG attribute
/// suffix is dropped (`DC-1-24QGFX` is created as `DC-1-24Q`). Names that
/// collapse onto the same type have their counts summed. Counts must be
/// positive, since nothing has been cleared yet when this fails.
fn sanitize(
    parent: &Arc<dyn ParentDevice>,
    gpu: &str,
    config: &VgpuConfig,
) -> Result<VgpuConfig> {
    let mut sanitized = VgpuConfig::new();

    for (name, count) in config.iter() {
        if count <= 0 {
            return Err(VgpuError::NonPositiveCount { vgpu_type: name.to_string(), count });
        }

        if parent.supports_type(name)? {
            sanitized.add(name, count)?;
            continue;
        }

        let stripped = strip_attribute_suffix(name);
        if stripped != name && parent.supports_type(stripped)? {
            debug!(requested = %name, resolved = %stripped, "Dropped MIG attribute suffix");
            sanitized.add(stripped, count)?;
            continue;
        }

        return Err(VgpuError::TypeUnsupported {
            vgpu_type: name.to_string(),
            gpu: gpu.to_string(),
        });
    }

    Ok(sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Availability, BackendMode, Device, VgpuBackend};
    use crate::paths::SysfsPaths;
    use crate::pci::{PciBus, Sriov};
    use std::collections::HashMap;
    use std::fs;
    use std::path::Path;

    const GPU0: &str = "0000:3b:00.0";
    const GPU1: &str = "0000:af:00.0";

    #[derive(Debug, Clone)]
    struct FakeRecord {
        id: String,
        vgpu_type: String,
        parent: String,
        physical_function: PciDevice,
    }

    type Live = Arc<Mutex<Vec<FakeRecord>>>;

    /// Parent whose capacity per type shrinks as instances are created.
    struct FakeParent {
        address: String,
        physical_function: PciDevice,
        capacity: Mutex<HashMap<String, usize>>,
        live: Live,
        fail_create: bool,
    }

    impl ParentDevice for FakeParent {
        fn address(&self) -> &str {
            &self.address
        }

        fn physical_function(&self) -> &PciDevice {
            &self.physical_function
        }

        fn supported_types(&self) -> Result<Vec<String>> {
            let mut names: Vec<String> = self.capacity.lock().unwrap().keys().cloned().collect();
            names.sort();
            Ok(names)
        }

        fn supports_type(&self, vgpu_type: &str) -> Result<bool> {
            Ok(self.capacity.lock().unwrap().contains_key(vgpu_type))
        }

        fn available_instances(&self, vgpu_type: &str) -> Result<Availability> {
            Ok(match self.capacity.lock().unwrap().get(vgpu_type) {
                Some(n) => Availability::Instances(*n),
                None => Availability::Unsupported,
            })
        }

        fn create_instance(&self, vgpu_type: &str, id_hint: &str) -> Result<()> {
            if self.fail_create {
                return Err(VgpuError::CreateFailed {
                    vgpu_type: vgpu_type.to_string(),
                    parent: self.address.clone(),
                    reason: "write error".to_string(),
                });
            }
            let mut capacity = self.capacity.lock().unwrap();
            let slots = capacity.get_mut(vgpu_type).expect("unsupported type");
            assert!(*slots > 0, "created past capacity");
            *slots -= 1;

            self.live.lock().unwrap().push(FakeRecord {
                id: id_hint.to_string(),
                vgpu_type: vgpu_type.to_string(),
                parent: self.address.clone(),
                physical_function: self.physical_function.clone(),
            });
            Ok(())
        }
    }

    struct FakeDevice {
        record: FakeRecord,
        live: Live,
    }

    impl Device for FakeDevice {
        fn id(&self) -> &str {
            &self.record.id
        }

        fn vgpu_type(&self) -> &str {
            &self.record.vgpu_type
        }

        fn parent_address(&self) -> &str {
            &self.record.parent
        }

        fn physical_function(&self) -> &PciDevice {
            &self.record.physical_function
        }

        fn delete(&self) -> Result<()> {
            self.live.lock().unwrap().retain(|r| r.id != self.record.id);
            Ok(())
        }
    }

    struct FakeBackend {
        parents: Vec<Arc<FakeParent>>,
        live: Live,
        next_id: Mutex<usize>,
    }

    impl VgpuBackend for FakeBackend {
        fn name(&self) -> &str {
            "fake"
        }

        fn mode(&self) -> BackendMode {
            BackendMode::Mdev
        }

        fn parent_devices(&self) -> Result<Vec<Arc<dyn ParentDevice>>> {
            Ok(self.parents.iter().map(|p| p.clone() as Arc<dyn ParentDevice>).collect())
        }

        fn devices(&self) -> Result<Vec<Box<dyn Device>>> {
            Ok(self
                .live
                .lock()
                .unwrap()
                .iter()
                .map(|record| {
                    Box::new(FakeDevice { record: record.clone(), live: self.live.clone() })
                        as Box<dyn Device>
                })
                .collect())
        }

        fn instance_id(&self, _slot: usize) -> String {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            format!("fake-{}", next)
        }
    }

    fn pci_device(root: &Path, address: &str) -> PciDevice {
        PciDevice {
            address: address.to_string(),
            vendor_id: 0x10de,
            device_id: 0x1eb8,
            class: 0x030200,
            driver: Some("nvidia".to_string()),
            iommu_group: None,
            numa_node: -1,
            sysfs_path: root.join("sys/bus/pci/devices").join(address),
            sriov: Sriov::None,
        }
    }

    struct Harness {
        _tmp: tempfile::TempDir,
        engine: VgpuConfigManager,
        live: Live,
    }

    /// Build an engine over two GPUs. `layout` lists, per parent, the GPU it
    /// belongs to and its capacity per type.
    fn harness(layout: Vec<(&str, Vec<(&str, usize)>)>, fail_create: bool) -> Harness {
        let tmp = tempfile::tempdir().unwrap();
        for address in [GPU0, GPU1] {
            let dir = tmp.path().join("sys/bus/pci/devices").join(address);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("vendor"), "0x10de").unwrap();
            fs::write(dir.join("device"), "0x1eb8").unwrap();
            fs::write(dir.join("class"), "0x030200").unwrap();
        }

        let live: Live = Arc::new(Mutex::new(Vec::new()));
        let parents = layout
            .into_iter()
            .enumerate()
            .map(|(i, (gpu, types))| {
                Arc::new(FakeParent {
                    address: format!("{}#{}", gpu, i),
                    physical_function: pci_device(tmp.path(), gpu),
                    capacity: Mutex::new(
                        types.into_iter().map(|(t, n)| (t.to_string(), n)).collect(),
                    ),
                    live: live.clone(),
                    fail_create,
                })
            })
            .collect();

        let backend = FakeBackend { parents, live: live.clone(), next_id: Mutex::new(0) };
        let manager = VgpuManager::with_backend(
            PciBus::new(SysfsPaths::new(tmp.path())),
            Arc::new(backend),
        );

        Harness { _tmp: tmp, engine: VgpuConfigManager::new(manager), live }
    }

    fn config(entries: &[(&str, i64)]) -> VgpuConfig {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_spreads_over_parents() {
        let h = harness(vec![(GPU0, vec![("T4-1Q", 8)]), (GPU0, vec![("T4-1Q", 8)])], false);
        let gpu = GpuTarget::Index(0);

        h.engine.set_vgpu_config(&gpu, &config(&[("T4-1Q", 10)])).unwrap();

        assert_eq!(h.engine.get_vgpu_config(&gpu).unwrap(), config(&[("T4-1Q", 10)]));
        let live = h.live.lock().unwrap();
        assert_eq!(live.iter().filter(|r| r.parent.ends_with("#0")).count(), 8);
        assert_eq!(live.iter().filter(|r| r.parent.ends_with("#1")).count(), 2);
    }

    #[test]
    fn test_capacity_exceeded() {
        let h = harness(vec![(GPU0, vec![("T4-1Q", 8)]), (GPU0, vec![("T4-1Q", 8)])], false);

        match h.engine.set_vgpu_config(&GpuTarget::Index(0), &config(&[("T4-1Q", 20)])) {
            Err(VgpuError::CapacityExceeded { requested, vgpu_type }) => {
                assert_eq!(requested, 20);
                assert_eq!(vgpu_type, "T4-1Q");
            }
            other => panic!("Expected CapacityExceeded, got {:?}", other),
        }
        // No rollback: everything that fit was created
        assert_eq!(h.live.lock().unwrap().len(), 16);
    }

    #[test]
    fn test_clears_only_target_gpu() {
        let h = harness(
            vec![(GPU0, vec![("T4-1Q", 4), ("T4-2Q", 2)]), (GPU1, vec![("T4-1Q", 4)])],
            false,
        );
        let gpu0 = GpuTarget::Index(0);
        let gpu1 = GpuTarget::Address(GPU1.to_string());

        h.engine.set_vgpu_config(&gpu1, &config(&[("T4-1Q", 3)])).unwrap();
        h.engine.set_vgpu_config(&gpu0, &config(&[("T4-1Q", 2)])).unwrap();
        h.engine.set_vgpu_config(&gpu0, &config(&[("T4-2Q", 1)])).unwrap();

        assert_eq!(h.engine.get_vgpu_config(&gpu0).unwrap(), config(&[("T4-2Q", 1)]));
        assert_eq!(h.engine.get_vgpu_config(&gpu1).unwrap(), config(&[("T4-1Q", 3)]));

        h.engine.clear_vgpu_config(&gpu0).unwrap();
        assert!(h.engine.get_vgpu_config(&gpu0).unwrap().is_empty());
        assert_eq!(h.live.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_unsupported_type_leaves_devices_untouched() {
        let h = harness(vec![(GPU0, vec![("T4-1Q", 4)])], false);
        let gpu = GpuTarget::Index(0);
        h.engine.set_vgpu_config(&gpu, &config(&[("T4-1Q", 2)])).unwrap();

        match h.engine.set_vgpu_config(&gpu, &config(&[("T4-16Q", 1)])) {
            Err(VgpuError::TypeUnsupported { vgpu_type, gpu }) => {
                assert_eq!(vgpu_type, "T4-16Q");
                assert_eq!(gpu, GPU0);
            }
            other => panic!("Expected TypeUnsupported, got {:?}", other),
        }
        assert_eq!(h.live.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_attribute_suffix_fallback() {
        let h = harness(vec![(GPU0, vec![("DC-1-24Q", 4)])], false);
        let gpu = GpuTarget::Index(0);

        h.engine
            .set_vgpu_config(&gpu, &config(&[("DC-1-24Q", 1), ("DC-1-24QGFX", 2)]))
            .unwrap();

        assert_eq!(h.engine.get_vgpu_config(&gpu).unwrap(), config(&[("DC-1-24Q", 3)]));
    }

    #[test]
    fn test_unsupported_parent_is_skipped() {
        let h = harness(vec![(GPU0, vec![("T4-2Q", 2)]), (GPU0, vec![("T4-1Q", 2)])], false);
        let gpu = GpuTarget::Index(0);

        // Sanitizing checks the first parent only, so a type it lacks is rejected
        assert!(matches!(
            h.engine.set_vgpu_config(&gpu, &config(&[("T4-1Q", 1)])),
            Err(VgpuError::TypeUnsupported { .. })
        ));

        let h = harness(vec![(GPU0, vec![("T4-1Q", 0)]), (GPU0, vec![("T4-1Q", 2)])], false);
        h.engine.set_vgpu_config(&gpu, &config(&[("T4-1Q", 2)])).unwrap();
        assert!(h.live.lock().unwrap().iter().all(|r| r.parent.ends_with("#1")));
    }

    #[test]
    fn test_non_positive_count_keeps_existing_devices() {
        let h = harness(vec![(GPU0, vec![("T4-1Q", 4), ("T4-2Q", 2)])], false);
        let gpu = GpuTarget::Index(0);
        h.engine.set_vgpu_config(&gpu, &config(&[("T4-2Q", 2)])).unwrap();

        for count in [-1, 0] {
            match h.engine.set_vgpu_config(&gpu, &config(&[("T4-1Q", count)])) {
                Err(VgpuError::NonPositiveCount { vgpu_type, count: reported }) => {
                    assert_eq!(vgpu_type, "T4-1Q");
                    assert_eq!(reported, count);
                }
                other => panic!("Expected NonPositiveCount, got {:?}", other),
            }
            assert_eq!(h.engine.get_vgpu_config(&gpu).unwrap(), config(&[("T4-2Q", 2)]));
        }
    }

    #[test]
    fn test_merged_count_overflow_keeps_existing_devices() {
        let h = harness(vec![(GPU0, vec![("DC-1-24Q", 4)])], false);
        let gpu = GpuTarget::Index(0);
        h.engine.set_vgpu_config(&gpu, &config(&[("DC-1-24Q", 1)])).unwrap();

        let overflowing = config(&[("DC-1-24Q", i64::MAX), ("DC-1-24QGFX", 1)]);
        assert!(matches!(
            h.engine.set_vgpu_config(&gpu, &overflowing),
            Err(VgpuError::InvalidConfig { .. })
        ));
        assert_eq!(h.engine.get_vgpu_config(&gpu).unwrap(), config(&[("DC-1-24Q", 1)]));
    }

    #[test]
    fn test_create_failure_is_reported() {
        let h = harness(vec![(GPU0, vec![("T4-1Q", 4)])], true);
        assert!(matches!(
            h.engine.set_vgpu_config(&GpuTarget::Index(0), &config(&[("T4-1Q", 1)])),
            Err(VgpuError::CreateFailed { .. })
        ));
    }

    #[test]
    fn test_gpu_without_parents() {
        let h = harness(vec![(GPU0, vec![("T4-1Q", 4)])], false);
        assert!(matches!(
            h.engine.set_vgpu_config(&GpuTarget::Index(1), &config(&[("T4-1Q", 1)])),
            Err(VgpuError::NoParentDevices { .. })
        ));
        assert!(matches!(
            h.engine.get_vgpu_config(&GpuTarget::Index(5)),
            Err(VgpuError::GpuNotFound { .. })
        ));
    }

    #[test]
    fn test_empty_config_clears() {
        let h = harness(vec![(GPU0, vec![("T4-1Q", 4)])], false);
        let gpu = GpuTarget::Index(0);
        h.engine.set_vgpu_config(&gpu, &config(&[("T4-1Q", 4)])).unwrap();

        h.engine.set_vgpu_config(&gpu, &VgpuConfig::new()).unwrap();
        assert!(h.engine.get_vgpu_config(&gpu).unwrap().is_empty());
    }

    #[test]
    fn test_reconcile_phase_names() {
        assert_eq!(ReconcilePhase::Sanitizing.to_string(), "sanitizing");
        assert_eq!(ReconcilePhase::Done.as_str(), "done");
    }
}
