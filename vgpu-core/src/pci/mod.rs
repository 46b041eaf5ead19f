//! PCI bus access for NVIDIA GPUs.
//!
//! Reads vendor, class, driver and SR-IOV linkage from sysfs so both vGPU
//! backends can tell which physical GPU a parent or vGPU device belongs to.

pub mod detect;
pub mod device;

pub use detect::PciBus;
pub use device::{address_sort_key, is_valid_pci_address, PciDevice, Sriov};
