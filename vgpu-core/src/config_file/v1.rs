//! Version `v1` of the vGPU configuration file.
//!
//! ```yaml
//! version: v1
//! vgpu-configs:
//!   A100-1-5C:
//!     - devices: all
//!       vgpu-devices:
//!         "A100-1-5C": 7
//!   mixed:
//!     - device-filter: ["0x20B010DE", "0x20B510DE"]
//!       devices: [0, 1]
//!       vgpu-devices:
//!         "A100-4C": 10
//! ```

use crate::error::{Result, VgpuError};
use crate::types::{DeviceId, VgpuConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const VERSION: &str = "v1";

/// A versioned set of named vGPU configs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Spec {
    pub version: String,
    #[serde(rename = "vgpu-configs", default)]
    pub vgpu_configs: BTreeMap<String, Vec<VgpuConfigSpec>>,
}

/// Desired vGPU devices for a set of GPUs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VgpuConfigSpec {
    #[serde(rename = "device-filter", default, skip_serializing_if = "DeviceFilter::is_empty")]
    pub device_filter: DeviceFilter,
    pub devices: Devices,
    #[serde(rename = "vgpu-devices")]
    pub vgpu_devices: VgpuConfig,
}

/// Which GPU indices a config applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DevicesRepr", into = "DevicesRepr")]
pub enum Devices {
    All,
    Indices(Vec<usize>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum DevicesRepr {
    Keyword(String),
    Indices(Vec<usize>),
}

impl TryFrom<DevicesRepr> for Devices {
    type Error = String;

    fn try_from(repr: DevicesRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            DevicesRepr::Keyword(s) if s == "all" => Ok(Devices::All),
            DevicesRepr::Keyword(s) => Err(format!("invalid string input for 'devices': {}", s)),
            DevicesRepr::Indices(indices) => Ok(Devices::Indices(indices)),
        }
    }
}

impl From<Devices> for DevicesRepr {
    fn from(devices: Devices) -> Self {
        match devices {
            Devices::All => DevicesRepr::Keyword("all".to_string()),
            Devices::Indices(indices) => DevicesRepr::Indices(indices),
        }
    }
}

impl fmt::Display for Devices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Devices::All => write!(f, "all"),
            Devices::Indices(indices) => write!(f, "{:?}", indices),
        }
    }
}

/// PCI device IDs a config is restricted to. Empty matches every GPU.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DeviceFilterRepr", into = "DeviceFilterRepr")]
pub struct DeviceFilter(pub Vec<DeviceId>);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum DeviceFilterRepr {
    One(String),
    Many(Vec<String>),
}

impl TryFrom<DeviceFilterRepr> for DeviceFilter {
    type Error = String;

    fn try_from(repr: DeviceFilterRepr) -> std::result::Result<Self, Self::Error> {
        let ids = match repr {
            DeviceFilterRepr::One(s) if s.is_empty() => Vec::new(),
            DeviceFilterRepr::One(s) => vec![s],
            DeviceFilterRepr::Many(ids) => ids,
        };
        ids.iter()
            .map(|id| id.parse::<DeviceId>().map_err(|e| e.to_string()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(DeviceFilter)
    }
}

impl From<DeviceFilter> for DeviceFilterRepr {
    fn from(filter: DeviceFilter) -> Self {
        DeviceFilterRepr::Many(filter.0.iter().map(DeviceId::to_string).collect())
    }
}

impl DeviceFilter {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Spec {
    /// Check the structural rules serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.version != VERSION {
            return Err(VgpuError::InvalidConfig {
                reason: format!("unknown version: {}", self.version),
            });
        }

        if self.vgpu_configs.is_empty() {
            return Err(VgpuError::InvalidConfig {
                reason: "at least one entry in 'vgpu-configs' is required".to_string(),
            });
        }

        for (name, specs) in &self.vgpu_configs {
            if specs.is_empty() {
                return Err(VgpuError::InvalidConfig {
                    reason: format!("at least one entry in '{}' is required", name),
                });
            }
            for spec in specs {
                spec.vgpu_devices.assert_valid().map_err(|e| VgpuError::InvalidConfig {
                    reason: format!(
                        "error validating values in 'vgpu-devices' field of '{}': {}",
                        name, e
                    ),
                })?;
            }
        }

        Ok(())
    }

    /// Pick a named config. With no name given, the only config is chosen.
    pub fn select(&self, name: Option<&str>) -> Result<(&str, &[VgpuConfigSpec])> {
        let name = match name {
            Some(name) => name,
            None if self.vgpu_configs.len() == 1 => {
                self.vgpu_configs.keys().next().map(String::as_str).unwrap_or_default()
            }
            None => {
                return Err(VgpuError::InvalidConfig {
                    reason: "a selected config is required when more than one config is available"
                        .to_string(),
                })
            }
        };

        self.vgpu_configs
            .get_key_value(name)
            .map(|(name, specs)| (name.as_str(), specs.as_slice()))
            .ok_or_else(|| VgpuError::InvalidConfig {
                reason: format!("selected vgpu-config not present: {}", name),
            })
    }
}

impl VgpuConfigSpec {
    pub fn matches_all_devices(&self) -> bool {
        self.devices == Devices::All
    }

    /// Whether the GPU at `index` is selected by `devices`.
    pub fn matches_devices(&self, index: usize) -> bool {
        match &self.devices {
            Devices::All => true,
            Devices::Indices(indices) => indices.contains(&index),
        }
    }

    /// Whether a GPU with this PCI ID passes the device filter.
    pub fn matches_device_filter(&self, device_id: DeviceId) -> bool {
        self.device_filter.is_empty() || self.device_filter.0.contains(&device_id)
    }
}
