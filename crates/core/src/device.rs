//! Device identifiers and tier classification
//!
//! A device is named by an opaque identifier such as `CPU` or `GPU.1`. The
//! prefix of the identifier decides which tier the device competes in when
//! the selector picks an accelerator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};

/// Opaque device identifier, optionally carrying a sub-index (`GPU.1`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Build an identifier without validation. Prefer [`DeviceId::parse`]
    /// for untrusted input.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn parse(id: &str) -> Result<Self> {
        let id = id.trim();
        if id.is_empty() || id.contains(',') {
            return Err(CoreError::InvalidDeviceId(id.to_string()));
        }
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Family name: everything before the first `.`
    pub fn family(&self) -> &str {
        self.0.split('.').next().unwrap_or(&self.0)
    }

    pub fn starts_with(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Priority bucket a device competes in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceTier {
    /// General-purpose processor, the last-resort fallback
    Processor,
    /// Generic accelerator whose identity carries the discrete marker
    DiscreteAccelerator,
    /// Secondary accelerator family ranked just below discrete accelerators
    FamilyA,
    /// Generic accelerator whose identity carries the integrated marker
    IntegratedAccelerator,
    /// Secondary accelerator family ranked last among accelerators
    FamilyB,
}

/// Accelerator tiers in the order the selector walks them.
/// The processor tier is never part of the walk; it is the fallback.
pub const SELECTION_ORDER: [DeviceTier; 4] = [
    DeviceTier::DiscreteAccelerator,
    DeviceTier::FamilyA,
    DeviceTier::IntegratedAccelerator,
    DeviceTier::FamilyB,
];

impl fmt::Display for DeviceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceTier::Processor => "processor",
            DeviceTier::DiscreteAccelerator => "discrete-accelerator",
            DeviceTier::FamilyA => "family-a",
            DeviceTier::IntegratedAccelerator => "integrated-accelerator",
            DeviceTier::FamilyB => "family-b",
        };
        f.write_str(name)
    }
}

/// Result of matching a device identifier against the prefix rules.
///
/// Generic accelerators need a second look at their full name before they
/// land in a [`DeviceTier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixClass {
    Tier(DeviceTier),
    GenericAccelerator,
}

/// Prefix rules that partition a device list into tiers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierTable {
    pub processor_prefix: String,
    pub generic_prefixes: Vec<String>,
    pub family_a_prefixes: Vec<String>,
    pub family_b_prefixes: Vec<String>,
    pub discrete_marker: String,
    pub integrated_marker: String,
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            processor_prefix: "CPU".to_string(),
            generic_prefixes: vec!["GPU".to_string()],
            family_a_prefixes: vec!["VPUX".to_string()],
            family_b_prefixes: vec!["MYRIAD".to_string()],
            discrete_marker: "dGPU".to_string(),
            integrated_marker: "iGPU".to_string(),
        }
    }
}

impl TierTable {
    pub fn with_generic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.generic_prefixes.push(prefix.into());
        self
    }

    pub fn with_family_a_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.family_a_prefixes.push(prefix.into());
        self
    }

    pub fn with_family_b_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.family_b_prefixes.push(prefix.into());
        self
    }

    pub fn is_processor(&self, device: &DeviceId) -> bool {
        device.starts_with(&self.processor_prefix)
    }

    /// Match a device by prefix. Returns `None` for unknown families.
    pub fn classify(&self, device: &DeviceId) -> Option<PrefixClass> {
        let matches = |prefixes: &[String]| prefixes.iter().any(|p| device.starts_with(p));

        if self.is_processor(device) {
            Some(PrefixClass::Tier(DeviceTier::Processor))
        } else if matches(&self.family_b_prefixes) {
            Some(PrefixClass::Tier(DeviceTier::FamilyB))
        } else if matches(&self.family_a_prefixes) {
            Some(PrefixClass::Tier(DeviceTier::FamilyA))
        } else if matches(&self.generic_prefixes) {
            Some(PrefixClass::GenericAccelerator)
        } else {
            None
        }
    }

    /// Split a generic accelerator by its human-readable identity.
    /// The integrated marker is checked first.
    pub fn split_generic(&self, full_name: &str) -> Option<DeviceTier> {
        if full_name.contains(&self.integrated_marker) {
            Some(DeviceTier::IntegratedAccelerator)
        } else if full_name.contains(&self.discrete_marker) {
            Some(DeviceTier::DiscreteAccelerator)
        } else {
            None
        }
    }
}
