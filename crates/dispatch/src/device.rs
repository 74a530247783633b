//! In-process device service with a fixed capability profile
//!
//! Stands in for a real compile engine in tests and in the command-line
//! environment file. Failures can be injected per service capability.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use cortex_core::{metrics, ConfigMap, DeviceId, MetricValue, ModelGraph, ModelSource, Precision};

use crate::catalog::{DeviceService, ExecutableModel};
use crate::error::DeviceError;

/// Result of a [`StaticDevice`] compile
#[derive(Debug, Clone)]
pub struct StaticExecutable {
    device: DeviceId,
    model_name: String,
}

impl ExecutableModel for StaticExecutable {
    fn device(&self) -> &DeviceId {
        &self.device
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// Which service calls a [`StaticDevice`] should fail
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureProfile {
    #[serde(default)]
    pub metrics: bool,
    #[serde(default)]
    pub queries: bool,
    /// Reason reported by every compile, if set
    #[serde(default)]
    pub compile: Option<String>,
}

#[derive(Debug)]
pub struct StaticDevice {
    full_name: String,
    capabilities: Vec<String>,
    config_keys: Vec<String>,
    indices: Vec<String>,
    /// Operator types this device runs; `None` means every type
    supported_types: Option<BTreeSet<String>>,
    compile_latency: Duration,
    failures: FailureProfile,
    compiles: AtomicUsize,
}

impl StaticDevice {
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            capabilities: Vec::new(),
            config_keys: Vec::new(),
            indices: Vec::new(),
            supported_types: None,
            compile_latency: Duration::ZERO,
            failures: FailureProfile::default(),
            compiles: AtomicUsize::new(0),
        }
    }

    pub fn with_precision(self, precision: Precision) -> Self {
        self.with_capability(precision.tag())
    }

    pub fn with_capability(mut self, tag: impl Into<String>) -> Self {
        self.capabilities.push(tag.into());
        self
    }

    pub fn with_config_key(mut self, key: impl Into<String>) -> Self {
        self.config_keys.push(key.into());
        self
    }

    /// Expose `FAMILY.<index>` devices instead of the bare family name
    pub fn with_indices<I, S>(mut self, indices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.indices = indices.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_supported_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_compile_latency(mut self, latency: Duration) -> Self {
        self.compile_latency = latency;
        self
    }

    pub fn with_failures(mut self, failures: FailureProfile) -> Self {
        self.failures = failures;
        self
    }

    pub fn failing_metrics(mut self) -> Self {
        self.failures.metrics = true;
        self
    }

    pub fn failing_queries(mut self) -> Self {
        self.failures.queries = true;
        self
    }

    pub fn failing_compile(mut self, reason: impl Into<String>) -> Self {
        self.failures.compile = Some(reason.into());
        self
    }

    /// Number of compile calls received so far
    pub fn compile_count(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }

    fn supports_type(&self, type_name: &str) -> bool {
        self.supported_types
            .as_ref()
            .map_or(true, |types| types.contains(type_name))
    }
}

#[async_trait]
impl DeviceService for StaticDevice {
    fn available_devices(&self, family: &DeviceId) -> Result<Vec<DeviceId>, DeviceError> {
        if self.indices.is_empty() {
            return Ok(vec![family.clone()]);
        }
        Ok(self
            .indices
            .iter()
            .map(|idx| DeviceId::new(format!("{}.{}", family, idx)))
            .collect())
    }

    fn metric(&self, device: &DeviceId, name: &str) -> Result<MetricValue, DeviceError> {
        if self.failures.metrics {
            return Err(DeviceError::QueryFailed {
                device: device.clone(),
                reason: format!("metric {} unavailable", name),
            });
        }

        match name {
            metrics::SUPPORTED_METRICS => Ok([
                metrics::SUPPORTED_METRICS,
                metrics::FULL_DEVICE_NAME,
                metrics::OPTIMIZATION_CAPABILITIES,
                metrics::SUPPORTED_CONFIG_KEYS,
                metrics::AVAILABLE_DEVICES,
            ]
            .into_iter()
            .collect()),
            metrics::FULL_DEVICE_NAME => Ok(MetricValue::from(self.full_name.as_str())),
            metrics::OPTIMIZATION_CAPABILITIES => Ok(MetricValue::List(self.capabilities.clone())),
            metrics::SUPPORTED_CONFIG_KEYS => Ok(MetricValue::List(self.config_keys.clone())),
            metrics::AVAILABLE_DEVICES => Ok(MetricValue::List(self.indices.clone())),
            _ => Err(DeviceError::UnsupportedMetric {
                device: device.clone(),
                metric: name.to_string(),
            }),
        }
    }

    fn query_operations(
        &self,
        device: &DeviceId,
        graph: &dyn ModelGraph,
    ) -> Result<BTreeSet<String>, DeviceError> {
        if self.failures.queries {
            return Err(DeviceError::QueryFailed {
                device: device.clone(),
                reason: "operation query refused".to_string(),
            });
        }

        Ok(graph
            .ordered_ops()
            .iter()
            .filter(|op| self.supports_type(&op.type_name))
            .map(|op| op.name.clone())
            .collect())
    }

    async fn compile(
        &self,
        device: &DeviceId,
        model: &ModelSource,
        _config: &ConfigMap,
    ) -> Result<Arc<dyn ExecutableModel>, DeviceError> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        debug!(device = %device, model = %model.describe(), "Compiling");

        if !self.compile_latency.is_zero() {
            tokio::time::sleep(self.compile_latency).await;
        }

        if let Some(reason) = &self.failures.compile {
            return Err(DeviceError::CompileFailed {
                device: device.clone(),
                reason: reason.clone(),
            });
        }

        let model_name = match model {
            ModelSource::Graph(graph) => graph.name().to_string(),
            ModelSource::Path(path) => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
        };

        Ok(Arc::new(StaticExecutable {
            device: device.clone(),
            model_name,
        }))
    }
}

/// Serializable description of a [`StaticDevice`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticDeviceSpec {
    pub full_name: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub config_keys: Vec<String>,
    #[serde(default)]
    pub indices: Vec<String>,
    #[serde(default)]
    pub supported_types: Option<Vec<String>>,
    #[serde(default)]
    pub compile_latency_ms: u64,
    #[serde(default)]
    pub failures: FailureProfile,
}

impl From<StaticDeviceSpec> for StaticDevice {
    fn from(spec: StaticDeviceSpec) -> Self {
        let mut device = StaticDevice::new(spec.full_name)
            .with_indices(spec.indices)
            .with_compile_latency(Duration::from_millis(spec.compile_latency_ms))
            .with_failures(spec.failures);
        device.capabilities = spec.capabilities;
        device.config_keys = spec.config_keys;
        if let Some(types) = spec.supported_types {
            device = device.with_supported_types(types);
        }
        device
    }
}
