//! Desired vGPU layout for a single GPU.

use crate::error::{Result, VgpuError};
use crate::types::vgpu_type::VgpuType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Mapping of vGPU type name to the number of devices of that type.
///
/// Keys are kept sorted so iteration, validation and creation order are
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VgpuConfig(BTreeMap<String, i64>);

impl VgpuConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the count for a vGPU type, replacing any previous value.
    pub fn insert(&mut self, vgpu_type: impl Into<String>, count: i64) {
        self.0.insert(vgpu_type.into(), count);
    }

    /// Add to the count for a vGPU type. Fails if the sum overflows.
    pub fn add(&mut self, vgpu_type: impl Into<String>, count: i64) -> Result<()> {
        let vgpu_type = vgpu_type.into();
        let current = self.0.entry(vgpu_type.clone()).or_insert(0);
        *current = current.checked_add(count).ok_or_else(|| VgpuError::InvalidConfig {
            reason: format!("count for '{}' overflows", vgpu_type),
        })?;
        Ok(())
    }

    pub fn get(&self, vgpu_type: &str) -> Option<i64> {
        self.0.get(vgpu_type).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check that the config describes a layout a GPU can actually host.
    ///
    /// Every key must parse as a vGPU type, every count must be positive and
    /// MIG-backed types cannot share a GPU with time-sliced types. Entries are
    /// visited in sorted key order, so the first reported failure is stable.
    /// The aggregate all-zero check can only trip if the per-entry check is
    /// ever relaxed; it is kept so the failure stays distinguishable.
    pub fn assert_valid(&self) -> Result<()> {
        let mut mig_backed = Vec::new();
        let mut time_sliced = Vec::new();
        let mut total = 0i64;

        for (name, &count) in &self.0 {
            let vgpu_type = VgpuType::parse(name)?;

            if count <= 0 {
                return Err(VgpuError::NonPositiveCount { vgpu_type: name.clone(), count });
            }
            total = total.saturating_add(count);

            if vgpu_type.is_mig_backed() {
                mig_backed.push(name.as_str());
            } else {
                time_sliced.push(name.as_str());
            }
        }

        if !mig_backed.is_empty() && !time_sliced.is_empty() {
            return Err(VgpuError::MixedBackingMode);
        }

        if !self.0.is_empty() && total == 0 {
            return Err(VgpuError::AllZero);
        }

        Ok(())
    }

    /// Whether the config asks for at least one device of the given type.
    pub fn contains(&self, vgpu_type: &str) -> bool {
        self.get(vgpu_type).is_some_and(|count| count > 0)
    }

    /// Whether any requested type is MIG-backed.
    pub fn is_mig_backed(&self) -> bool {
        self.0.keys().any(|name| VgpuType::parse(name).is_ok_and(|t| t.is_mig_backed()))
    }
}

impl FromIterator<(String, i64)> for VgpuConfig {
    fn from_iter<I: IntoIterator<Item = (String, i64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a VgpuConfig {
    type Item = (&'a String, &'a i64);
    type IntoIter = std::collections::btree_map::Iter<'a, String, i64>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for VgpuConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries: Vec<String> = self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        write!(f, "{{{}}}", entries.join(", "))
    }
}
