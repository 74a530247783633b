//! Operation-support and optimization-capability queries across devices

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use cortex_core::{metrics, ConfigMap, DeviceId, ModelGraph};

use crate::catalog::DeviceCatalog;

/// Devices asked for optimization capabilities when nothing is configured
pub const DEFAULT_CAPABILITY_CANDIDATES: [&str; 2] = ["CPU", "GPU"];

/// Operations the device pool supports, each attributed to `owner`.
///
/// Devices are asked in order and failures are skipped, but scanning stops
/// at the first device that answers. The "intersection" therefore only ever
/// holds that one device's set.
pub fn supported_operations(
    catalog: &DeviceCatalog,
    devices: &[DeviceId],
    graph: &dyn ModelGraph,
    owner: &str,
) -> BTreeMap<String, String> {
    let mut supported: BTreeSet<String> = BTreeSet::new();

    for device in devices {
        match catalog.query_operations(device, graph) {
            Ok(answer) => {
                supported = if supported.is_empty() {
                    answer
                } else if answer.is_empty() {
                    supported
                } else {
                    supported.intersection(&answer).cloned().collect()
                };
                debug!(device = %device, ops = supported.len(), "Operation query answered");
                break;
            }
            Err(e) => {
                debug!(device = %device, error = %e, "Operation query failed, trying next device");
            }
        }
    }

    supported
        .into_iter()
        .map(|op| (op, owner.to_string()))
        .collect()
}

/// Union of the optimization capabilities reported by the candidate devices.
///
/// Candidates come from `options`, then the stored configuration, then
/// [`DEFAULT_CAPABILITY_CANDIDATES`]. Devices that fail to answer are ignored.
pub fn optimization_capabilities(
    catalog: &DeviceCatalog,
    options: &ConfigMap,
    stored: &ConfigMap,
) -> BTreeSet<String> {
    let candidates: Vec<DeviceId> = match options.device_list().or_else(|| stored.device_list()) {
        Some(raw) => catalog.parse_device_list(raw),
        None => DEFAULT_CAPABILITY_CANDIDATES
            .iter()
            .map(|d| DeviceId::new(*d))
            .collect(),
    };

    let mut capabilities = BTreeSet::new();
    for device in &candidates {
        match catalog.metric_list(device, metrics::OPTIMIZATION_CAPABILITIES) {
            Ok(caps) => capabilities.extend(caps),
            Err(e) => debug!(device = %device, error = %e, "Ignoring capability query failure"),
        }
    }
    capabilities
}
