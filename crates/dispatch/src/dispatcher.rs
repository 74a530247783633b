//! The AUTO dispatcher
//!
//! Merges and validates configuration, enumerates devices, picks an
//! accelerator and starts compiling on the processor and that accelerator at
//! the same time. The caller gets a [`CompiledWorkload`] straight away and
//! decides how long to wait on either slot.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use cortex_core::config::{self, supported_config_keys};
use cortex_core::{
    metrics, ConfigMap, CoreError, DeviceId, MetricValue, ModelGraph, ModelSource, Precision,
    TierTable,
};

use crate::catalog::DeviceCatalog;
use crate::classify::classify;
use crate::error::{DispatchError, Result, SlotKind};
use crate::handle::{CompileSlot, CompiledWorkload};
use crate::intersect;
use crate::select::DeviceSelector;

pub const DISPATCHER_NAME: &str = "AUTO";
pub const FULL_DEVICE_NAME: &str = "CortexOS AUTO device";

/// Metrics answered by [`AutoDispatcher::get_metric`]
pub const SUPPORTED_METRICS: [&str; 4] = [
    metrics::SUPPORTED_METRICS,
    metrics::FULL_DEVICE_NAME,
    metrics::SUPPORTED_CONFIG_KEYS,
    metrics::OPTIMIZATION_CAPABILITIES,
];

/// Heterogeneous-device dispatcher.
///
/// The stored default configuration is owned here rather than being global.
/// Writers go through the lock one at a time; every request works on its own
/// merged snapshot.
pub struct AutoDispatcher {
    name: String,
    catalog: RwLock<Option<Arc<DeviceCatalog>>>,
    config: RwLock<ConfigMap>,
    tiers: TierTable,
}

impl AutoDispatcher {
    /// A dispatcher with no device catalog attached yet
    pub fn new() -> Self {
        Self {
            name: DISPATCHER_NAME.to_string(),
            catalog: RwLock::new(None),
            config: RwLock::new(ConfigMap::new()),
            tiers: TierTable::default(),
        }
    }

    pub fn with_catalog(catalog: Arc<DeviceCatalog>) -> Self {
        let dispatcher = Self::new();
        dispatcher.attach(catalog);
        dispatcher
    }

    pub fn with_tier_table(mut self, tiers: TierTable) -> Self {
        self.tiers = tiers;
        self
    }

    pub fn attach(&self, catalog: Arc<DeviceCatalog>) {
        *self.catalog.write() = Some(catalog);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tier_table(&self) -> &TierTable {
        &self.tiers
    }

    fn catalog(&self) -> Result<Arc<DeviceCatalog>> {
        self.catalog
            .read()
            .as_ref()
            .map(Arc::clone)
            .ok_or(DispatchError::NotConfigured)
    }

    /// Snapshot of the stored default configuration
    pub fn config(&self) -> ConfigMap {
        self.config.read().clone()
    }

    pub fn get_config(&self, key: &str) -> Result<String> {
        self.config
            .read()
            .get(key)
            .map(str::to_string)
            .ok_or_else(|| CoreError::UnsupportedKey(key.to_string()).into())
    }

    /// Store settings. The whole map is validated before anything is applied.
    pub fn set_config(&self, settings: &ConfigMap) -> Result<()> {
        config::validate(settings)?;
        self.config.write().extend_from(settings);
        debug!(keys = settings.len(), "Stored configuration updated");
        Ok(())
    }

    pub async fn load_from_path(
        &self,
        path: impl Into<PathBuf>,
        config: &ConfigMap,
    ) -> Result<CompiledWorkload> {
        self.dispatch(ModelSource::Path(path.into()), config).await
    }

    pub async fn load_from_graph(
        &self,
        graph: Arc<dyn ModelGraph>,
        config: &ConfigMap,
    ) -> Result<CompiledWorkload> {
        self.dispatch(ModelSource::Graph(graph), config).await
    }

    /// Start compiling `model` on the processor and on the selected
    /// accelerator. Returns as soon as the tasks are spawned.
    pub async fn dispatch(&self, model: ModelSource, config: &ConfigMap) -> Result<CompiledWorkload> {
        let catalog = self.catalog()?;
        check_input(&model)?;

        let full_config = config::merge(&self.config(), config);
        config::validate(&full_config)?;
        let devices = catalog.list_devices(&full_config)?;
        debug!(model = %model.describe(), devices = ?devices, "Dispatching");

        let processor = devices
            .iter()
            .find(|device| self.tiers.is_processor(device))
            .map(|device| spawn_compile(&catalog, SlotKind::Processor, device, &model));

        // Path loads are selected without a precision constraint
        let precision = model.graph().map(|graph| classify(graph.as_ref()));
        let selector = DeviceSelector::new(&self.tiers, catalog.as_ref());
        let selected = selector.select(&devices, precision)?;

        let accelerator = (!self.tiers.is_processor(&selected))
            .then(|| spawn_compile(&catalog, SlotKind::Accelerator, &selected, &model));

        if processor.is_none() && accelerator.is_none() {
            return Err(DispatchError::NoCompileTarget);
        }

        let workload =
            CompiledWorkload::new(processor, accelerator, full_config.perf_count_enabled());
        info!(
            workload = %workload.id(),
            model = %model.describe(),
            processor = ?workload.processor().map(|s| s.device().to_string()),
            accelerator = ?workload.accelerator().map(|s| s.device().to_string()),
            "Compile tasks started"
        );
        Ok(workload)
    }

    /// Choose a device from `devices` the way a load would
    pub fn select(&self, devices: &[DeviceId], precision: Option<Precision>) -> Result<DeviceId> {
        let catalog = self.catalog()?;
        let selector = DeviceSelector::new(&self.tiers, catalog.as_ref());
        Ok(selector.select(devices, precision)?)
    }

    /// Operations of `graph` the device pool supports, each owned by this
    /// dispatcher
    pub fn query(
        &self,
        graph: &dyn ModelGraph,
        config: &ConfigMap,
    ) -> Result<BTreeMap<String, String>> {
        let catalog = self.catalog()?;
        if graph.ordered_ops().is_empty() {
            return Err(DispatchError::UnsupportedInput(format!(
                "graph {} has no operations",
                graph.name()
            )));
        }

        let full_config = config::merge(&self.config(), config);
        let devices = catalog.list_devices(&full_config)?;
        Ok(intersect::supported_operations(
            &catalog,
            &devices,
            graph,
            &self.name,
        ))
    }

    pub fn get_metric(&self, name: &str, options: &ConfigMap) -> Result<MetricValue> {
        match name {
            metrics::SUPPORTED_METRICS => Ok(SUPPORTED_METRICS.into_iter().collect()),
            metrics::FULL_DEVICE_NAME => Ok(MetricValue::from(FULL_DEVICE_NAME)),
            metrics::SUPPORTED_CONFIG_KEYS => Ok(MetricValue::List(supported_config_keys())),
            metrics::OPTIMIZATION_CAPABILITIES => {
                let catalog = self.catalog()?;
                let capabilities =
                    intersect::optimization_capabilities(&catalog, options, &self.config());
                Ok(MetricValue::List(capabilities.into_iter().collect()))
            }
            other => Err(DispatchError::UnsupportedMetric(other.to_string())),
        }
    }
}

impl Default for AutoDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn check_input(model: &ModelSource) -> Result<()> {
    match model {
        ModelSource::Path(path) if path.as_os_str().is_empty() => Err(
            DispatchError::UnsupportedInput("neither a model path nor a graph was given".to_string()),
        ),
        ModelSource::Graph(graph) if graph.ordered_ops().is_empty() => {
            Err(DispatchError::UnsupportedInput(format!(
                "graph {} has no operations",
                graph.name()
            )))
        }
        _ => Ok(()),
    }
}

fn spawn_compile(
    catalog: &Arc<DeviceCatalog>,
    kind: SlotKind,
    device: &DeviceId,
    model: &ModelSource,
) -> CompileSlot {
    let catalog = Arc::clone(catalog);
    let target = device.clone();
    let model = model.clone();
    CompileSlot::spawn(kind, device.clone(), async move {
        catalog.compile(&target, &model, &ConfigMap::new()).await
    })
}
