//! Combined PCI device/vendor identifier used by device filters.

use crate::error::{Result, VgpuError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// PCI device ID and vendor ID, rendered as `0x{DEVICE}{VENDOR}`
/// (e.g. `0x20B510DE` for an A100 PCIe 40GB).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId {
    pub device: u16,
    pub vendor: u16,
}

impl DeviceId {
    pub fn new(device: u16, vendor: u16) -> Self {
        Self { device, vendor }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}{:04X}", self.device, self.vendor)
    }
}

impl FromStr for DeviceId {
    type Err = VgpuError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || VgpuError::InvalidConfig {
            reason: format!("Invalid device ID '{}' (expected: 0x20B510DE)", s),
        };

        let hex = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).ok_or_else(invalid)?;
        if hex.len() != 8 {
            return Err(invalid());
        }
        let raw = u32::from_str_radix(hex, 16).map_err(|_| invalid())?;

        Ok(Self { device: (raw >> 16) as u16, vendor: (raw & 0xffff) as u16 })
    }
}

impl Serialize for DeviceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeviceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
