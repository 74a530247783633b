//! Device catalog
//!
//! Owns one [`DeviceService`] per device family and answers enumeration,
//! metric, operation-support and compile requests by routing them to the
//! owning service. Nothing is cached: every manifest is rebuilt from fresh
//! metric queries because the device pool may change between requests.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use cortex_core::{
    metrics, CapabilityManifest, ConfigMap, DeviceId, MetricValue, ModelGraph, ModelSource,
};

use crate::error::{DeviceError, DispatchError};

type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// A compiled model owned by one device
pub trait ExecutableModel: Send + Sync + fmt::Debug {
    fn device(&self) -> &DeviceId;
    fn model_name(&self) -> &str;
}

/// Services a device family exposes to the dispatcher
#[async_trait]
pub trait DeviceService: Send + Sync {
    /// Concrete devices behind a registered family, e.g. `GPU` -> `GPU.0`, `GPU.1`
    fn available_devices(&self, family: &DeviceId) -> DeviceResult<Vec<DeviceId>> {
        Ok(vec![family.clone()])
    }

    fn metric(&self, device: &DeviceId, name: &str) -> DeviceResult<MetricValue>;

    /// Names of the graph operations the device can run
    fn query_operations(
        &self,
        device: &DeviceId,
        graph: &dyn ModelGraph,
    ) -> DeviceResult<BTreeSet<String>>;

    /// Compile `model` for `device`. May block for a full graph lowering.
    async fn compile(
        &self,
        device: &DeviceId,
        model: &ModelSource,
        config: &ConfigMap,
    ) -> DeviceResult<Arc<dyn ExecutableModel>>;
}

/// Source of per-device capability manifests
pub trait CapabilityLookup {
    fn capabilities_of(&self, device: &DeviceId) -> DeviceResult<CapabilityManifest>;

    fn full_name(&self, device: &DeviceId) -> DeviceResult<String> {
        self.capabilities_of(device).map(|m| m.full_name)
    }
}

impl CapabilityLookup for HashMap<DeviceId, CapabilityManifest> {
    fn capabilities_of(&self, device: &DeviceId) -> DeviceResult<CapabilityManifest> {
        self.get(device)
            .cloned()
            .ok_or_else(|| DeviceError::Unavailable(device.clone()))
    }
}

pub struct DeviceCatalog {
    families: RwLock<Vec<(DeviceId, Arc<dyn DeviceService>)>>,
    groups: DashMap<String, Vec<DeviceId>>,
}

impl DeviceCatalog {
    pub fn new() -> Self {
        Self {
            families: RwLock::new(Vec::new()),
            groups: DashMap::new(),
        }
    }

    /// Register (or replace) the service for a device family.
    /// Enumeration follows registration order.
    pub fn register(&self, family: impl Into<DeviceId>, service: Arc<dyn DeviceService>) {
        let family = family.into();
        let mut families = self.families.write();
        if let Some(entry) = families.iter_mut().find(|(f, _)| *f == family) {
            entry.1 = service;
        } else {
            debug!(family = %family, "Registered device family");
            families.push((family, service));
        }
    }

    pub fn unregister(&self, family: &DeviceId) -> bool {
        let mut families = self.families.write();
        let before = families.len();
        families.retain(|(f, _)| f != family);
        families.len() != before
    }

    /// Register a composite group name that expands to its members in an
    /// explicit device list
    pub fn register_group(&self, name: impl Into<String>, members: Vec<DeviceId>) {
        self.groups.insert(name.into(), members);
    }

    pub fn families(&self) -> Vec<DeviceId> {
        self.families.read().iter().map(|(f, _)| f.clone()).collect()
    }

    fn service_for(&self, device: &DeviceId) -> Option<Arc<dyn DeviceService>> {
        let families = self.families.read();
        families
            .iter()
            .find(|(f, _)| f == device)
            .or_else(|| families.iter().find(|(f, _)| f.as_str() == device.family()))
            .map(|(_, service)| Arc::clone(service))
    }

    /// Every device the registered services currently report.
    /// A family that fails to enumerate is skipped.
    pub fn available_devices(&self) -> Vec<DeviceId> {
        let snapshot: Vec<_> = self
            .families
            .read()
            .iter()
            .map(|(f, s)| (f.clone(), Arc::clone(s)))
            .collect();

        let mut seen = HashSet::new();
        let mut devices = Vec::new();
        for (family, service) in snapshot {
            match service.available_devices(&family) {
                Ok(found) => {
                    for device in found {
                        if seen.insert(device.clone()) {
                            devices.push(device);
                        }
                    }
                }
                Err(e) => warn!(family = %family, error = %e, "Device family failed to enumerate"),
            }
        }
        devices
    }

    /// Parse a comma-delimited device list, expanding registered groups
    pub fn parse_device_list(&self, raw: &str) -> Vec<DeviceId> {
        let mut seen = HashSet::new();
        let mut devices = Vec::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let expanded = match self.groups.get(entry) {
                Some(members) => members.value().clone(),
                None => vec![DeviceId::new(entry)],
            };
            for device in expanded {
                if seen.insert(device.clone()) {
                    devices.push(device);
                }
            }
        }
        devices
    }

    /// Devices a request should consider: the explicit `AUTO_DEVICE_LIST`
    /// when configured, otherwise everything available
    pub fn list_devices(&self, config: &ConfigMap) -> Result<Vec<DeviceId>, DispatchError> {
        let devices = match config.device_list() {
            Some(raw) => self.parse_device_list(raw),
            None => self.available_devices(),
        };

        if devices.is_empty() {
            return Err(DispatchError::NoDevicesAvailable);
        }
        Ok(devices)
    }

    pub fn metric(&self, device: &DeviceId, name: &str) -> DeviceResult<MetricValue> {
        let service = self
            .service_for(device)
            .ok_or_else(|| DeviceError::Unavailable(device.clone()))?;
        service.metric(device, name)
    }

    pub fn metric_text(&self, device: &DeviceId, name: &str) -> DeviceResult<String> {
        match self.metric(device, name)? {
            MetricValue::Text(text) => Ok(text),
            MetricValue::List(_) => Err(DeviceError::UnexpectedMetricType {
                device: device.clone(),
                metric: name.to_string(),
            }),
        }
    }

    pub fn metric_list(&self, device: &DeviceId, name: &str) -> DeviceResult<Vec<String>> {
        match self.metric(device, name)? {
            MetricValue::List(items) => Ok(items),
            MetricValue::Text(_) => Err(DeviceError::UnexpectedMetricType {
                device: device.clone(),
                metric: name.to_string(),
            }),
        }
    }

    pub fn query_operations(
        &self,
        device: &DeviceId,
        graph: &dyn ModelGraph,
    ) -> DeviceResult<BTreeSet<String>> {
        let service = self
            .service_for(device)
            .ok_or_else(|| DeviceError::Unavailable(device.clone()))?;
        service.query_operations(device, graph)
    }

    pub async fn compile(
        &self,
        device: &DeviceId,
        model: &ModelSource,
        config: &ConfigMap,
    ) -> DeviceResult<Arc<dyn ExecutableModel>> {
        let service = self
            .service_for(device)
            .ok_or_else(|| DeviceError::Unavailable(device.clone()))?;
        service.compile(device, model, config).await
    }
}

impl Default for DeviceCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityLookup for DeviceCatalog {
    fn capabilities_of(&self, device: &DeviceId) -> DeviceResult<CapabilityManifest> {
        let full_name = self.metric_text(device, metrics::FULL_DEVICE_NAME)?;
        let capabilities = self.metric_list(device, metrics::OPTIMIZATION_CAPABILITIES)?;

        // Optional: a device that does not report config keys just has none
        let config_keys = self
            .metric_list(device, metrics::SUPPORTED_CONFIG_KEYS)
            .unwrap_or_default();

        Ok(CapabilityManifest {
            full_name,
            supported_precisions: capabilities.into_iter().collect(),
            config_keys: config_keys.into_iter().collect(),
        })
    }

    fn full_name(&self, device: &DeviceId) -> DeviceResult<String> {
        self.metric_text(device, metrics::FULL_DEVICE_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::StaticDevice;
    use cortex_core::config::KEY_DEVICE_LIST;
    use cortex_core::Precision;

    fn catalog() -> DeviceCatalog {
        let catalog = DeviceCatalog::new();
        catalog.register(
            "CPU",
            Arc::new(StaticDevice::new("Test CPU").with_precision(Precision::Fp32)),
        );
        catalog.register(
            "GPU",
            Arc::new(
                StaticDevice::new("Test Graphics (dGPU)")
                    .with_precision(Precision::Fp16)
                    .with_indices(["0", "1"]),
            ),
        );
        catalog
    }

    #[test]
    fn test_available_devices_follow_registration_order() {
        let devices = catalog().available_devices();
        assert_eq!(
            devices,
            vec![DeviceId::new("CPU"), DeviceId::new("GPU.0"), DeviceId::new("GPU.1")]
        );
    }

    #[test]
    fn test_explicit_list_is_verbatim() {
        let config = ConfigMap::new().with(KEY_DEVICE_LIST, " GPU.1 , FPGA,,GPU.1");
        let devices = catalog().list_devices(&config).unwrap();
        assert_eq!(devices, vec![DeviceId::new("GPU.1"), DeviceId::new("FPGA")]);
    }

    #[test]
    fn test_group_expansion() {
        let catalog = catalog();
        catalog.register_group("ALL_GPU", vec!["GPU.0".into(), "GPU.1".into()]);
        let devices = catalog.parse_device_list("ALL_GPU,CPU");
        assert_eq!(
            devices,
            vec![DeviceId::new("GPU.0"), DeviceId::new("GPU.1"), DeviceId::new("CPU")]
        );
    }

    #[test]
    fn test_empty_device_list_is_fatal() {
        let empty = DeviceCatalog::new();
        assert!(matches!(
            empty.list_devices(&ConfigMap::new()),
            Err(DispatchError::NoDevicesAvailable)
        ));

        let config = ConfigMap::new().with(KEY_DEVICE_LIST, " , ");
        assert!(matches!(
            catalog().list_devices(&config),
            Err(DispatchError::NoDevicesAvailable)
        ));
    }

    #[test]
    fn test_capabilities_route_by_family() {
        let catalog = catalog();
        let manifest = catalog.capabilities_of(&"GPU.1".into()).unwrap();
        assert_eq!(manifest.full_name, "Test Graphics (dGPU)");
        assert!(manifest.supports(Precision::Fp16));

        let missing = catalog.capabilities_of(&"FPGA".into());
        assert!(matches!(missing, Err(DeviceError::Unavailable(_))));
    }

    #[test]
    fn test_manifest_comes_from_device_metrics() {
        let catalog = DeviceCatalog::new();
        catalog.register(
            "GPU",
            Arc::new(
                StaticDevice::new("Test Graphics (dGPU)")
                    .with_precision(Precision::Fp16)
                    .with_config_key("AUTO_STREAMS")
                    .with_supported_types(["Convolution"]),
            ),
        );
        let manifest = catalog.capabilities_of(&"GPU".into()).unwrap();
        assert_eq!(
            manifest,
            CapabilityManifest::new("Test Graphics (dGPU)")
                .with_precision(Precision::Fp16)
                .with_config_key("AUTO_STREAMS")
        );

        // Operation support is per graph and only answered by query_operations
        assert!(matches!(
            catalog.metric(&"GPU".into(), "SUPPORTED_OPERATIONS"),
            Err(DeviceError::UnsupportedMetric { .. })
        ));
    }

    #[test]
    fn test_metric_type_mismatch() {
        let err = catalog()
            .metric_text(&"CPU".into(), metrics::OPTIMIZATION_CAPABILITIES)
            .unwrap_err();
        assert!(matches!(err, DeviceError::UnexpectedMetricType { .. }));
    }

    #[test]
    fn test_register_replaces_existing_family() {
        let catalog = catalog();
        catalog.register("CPU", Arc::new(StaticDevice::new("Replacement CPU")));
        assert_eq!(catalog.families().len(), 2);
        assert_eq!(catalog.full_name(&"CPU".into()).unwrap(), "Replacement CPU");
        assert!(catalog.unregister(&"CPU".into()));
        assert_eq!(catalog.families(), vec![DeviceId::new("GPU")]);
    }
}
