//! Fake sysfs trees for integration tests.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct FakeSysfs {
    pub dir: TempDir,
}

impl FakeSysfs {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sys/bus/pci/devices")).unwrap();
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn pci(&self, address: &str) -> PathBuf {
        self.root().join("sys/bus/pci/devices").join(address)
    }

    /// Add an NVIDIA 3D controller.
    pub fn add_gpu(&self, address: &str, device_id: &str) -> PathBuf {
        let dir = self.pci(address);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("vendor"), "0x10de\n").unwrap();
        fs::write(dir.join("device"), format!("{}\n", device_id)).unwrap();
        fs::write(dir.join("class"), "0x030200\n").unwrap();
        dir
    }

    /// Enable one virtual function per address in `functions` on a GPU. Each VF gets the
    /// vendor control directory with the given type listing.
    pub fn add_vfs(&self, pf: &str, functions: &[&str], listing: &str) {
        let pf_dir = self.pci(pf);
        fs::write(pf_dir.join("sriov_totalvfs"), "32\n").unwrap();
        fs::write(pf_dir.join("sriov_numvfs"), format!("{}\n", functions.len())).unwrap();

        let device_id = fs::read_to_string(pf_dir.join("device")).unwrap();
        for (index, address) in functions.iter().enumerate() {
            let vf_dir = self.add_gpu(address, device_id.trim());
            symlink(format!("../{}", pf), vf_dir.join("physfn")).unwrap();
            symlink(format!("../{}", address), pf_dir.join(format!("virtfn{}", index))).unwrap();

            let control = vf_dir.join("nvidia");
            fs::create_dir_all(&control).unwrap();
            fs::write(control.join("creatable_vgpu_types"), listing).unwrap();
            fs::write(control.join("current_vgpu_type"), "0\n").unwrap();
        }
    }

    pub fn current_vgpu_type(&self, vf: &str) -> String {
        let path = self.pci(vf).join("nvidia/current_vgpu_type");
        fs::read_to_string(path).unwrap().trim().to_string()
    }

    /// Register a GPU on the mdev bus with `(dir, name, available)` types.
    pub fn add_mdev_parent(&self, address: &str, types: &[(&str, &str, usize)]) {
        let dir = self.pci(address);
        for (type_dir, name, available) in types {
            let type_dir = dir.join("mdev_supported_types").join(type_dir);
            fs::create_dir_all(&type_dir).unwrap();
            fs::write(type_dir.join("name"), format!("{}\n", name)).unwrap();
            fs::write(type_dir.join("available_instances"), format!("{}\n", available)).unwrap();
            fs::write(type_dir.join("create"), "").unwrap();
        }

        let bus = self.root().join("sys/class/mdev_bus");
        fs::create_dir_all(&bus).unwrap();
        symlink(&dir, bus.join(address)).unwrap();
    }

    /// Add a live mdev device of the type in `type_dir` on a parent.
    pub fn add_mdev_device(&self, parent: &str, type_dir: &str, uuid: &str) -> PathBuf {
        let parent_dir = self.pci(parent);
        let mdev = parent_dir.join(uuid);
        fs::create_dir_all(&mdev).unwrap();
        fs::write(mdev.join("remove"), "").unwrap();
        symlink(parent_dir.join("mdev_supported_types").join(type_dir), mdev.join("mdev_type"))
            .unwrap();

        let devices = self.root().join("sys/bus/mdev/devices");
        fs::create_dir_all(&devices).unwrap();
        symlink(&mdev, devices.join(uuid)).unwrap();
        mdev
    }

    pub fn mdev_create_file(&self, parent: &str, type_dir: &str) -> String {
        let path = self.pci(parent).join("mdev_supported_types").join(type_dir).join("create");
        fs::read_to_string(path).unwrap()
    }
}
