use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};

/// Well-known metric names understood by devices and by the dispatcher
pub mod metrics {
    pub const SUPPORTED_METRICS: &str = "SUPPORTED_METRICS";
    pub const FULL_DEVICE_NAME: &str = "FULL_DEVICE_NAME";
    pub const SUPPORTED_CONFIG_KEYS: &str = "SUPPORTED_CONFIG_KEYS";
    pub const OPTIMIZATION_CAPABILITIES: &str = "OPTIMIZATION_CAPABILITIES";
    pub const AVAILABLE_DEVICES: &str = "AVAILABLE_DEVICES";
}

/// Coarse numeric class of a model's dominant operators
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Precision {
    #[serde(rename = "INT8")]
    Int8,
    #[serde(rename = "FP16")]
    Fp16,
    #[default]
    #[serde(rename = "FP32")]
    Fp32,
}

impl Precision {
    /// Capability tag a device reports when it supports this class
    pub fn tag(&self) -> &'static str {
        match self {
            Precision::Int8 => "INT8",
            Precision::Fp16 => "FP16",
            Precision::Fp32 => "FP32",
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Precision {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INT8" => Ok(Precision::Int8),
            "FP16" => Ok(Precision::Fp16),
            "FP32" => Ok(Precision::Fp32),
            other => Err(CoreError::UnknownPrecision(other.to_string())),
        }
    }
}

/// Value returned by a metric query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Text(String),
    List(Vec<String>),
}

impl MetricValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MetricValue::Text(s) => Some(s),
            MetricValue::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            MetricValue::List(items) => Some(items),
            MetricValue::Text(_) => None,
        }
    }
}

impl From<&str> for MetricValue {
    fn from(s: &str) -> Self {
        MetricValue::Text(s.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(s: String) -> Self {
        MetricValue::Text(s)
    }
}

impl From<Vec<String>> for MetricValue {
    fn from(items: Vec<String>) -> Self {
        MetricValue::List(items)
    }
}

impl<'a> FromIterator<&'a str> for MetricValue {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        MetricValue::List(iter.into_iter().map(str::to_string).collect())
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Text(s) => f.write_str(s),
            MetricValue::List(items) => write!(f, "[{}]", items.join(", ")),
        }
    }
}

/// What a single device says it can do.
///
/// Built on demand from the device's metrics and never cached: the device
/// pool may change between two requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityManifest {
    /// Human-readable identity, e.g. `"Intel(R) Arc(TM) A770 Graphics (dGPU)"`
    pub full_name: String,
    /// Optimization capability tags, precision classes among them
    pub supported_precisions: BTreeSet<String>,
    pub config_keys: BTreeSet<String>,
}

impl CapabilityManifest {
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            ..Default::default()
        }
    }

    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.supported_precisions.insert(precision.tag().to_string());
        self
    }

    pub fn with_capability(mut self, tag: impl Into<String>) -> Self {
        self.supported_precisions.insert(tag.into());
        self
    }

    pub fn with_config_key(mut self, key: impl Into<String>) -> Self {
        self.config_keys.insert(key.into());
        self
    }

    pub fn supports(&self, precision: Precision) -> bool {
        self.supported_precisions.contains(precision.tag())
    }

    pub fn summary(&self) -> String {
        let tags: Vec<&str> = self.supported_precisions.iter().map(String::as_str).collect();
        format!(
            "{} | caps [{}] | {} config keys",
            self.full_name,
            tags.join(","),
            self.config_keys.len()
        )
    }
}
