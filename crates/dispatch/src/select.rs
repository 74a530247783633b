//! Accelerator selection
//!
//! Priority of selecting a device: discrete accelerator > family A >
//! integrated accelerator > family B > processor. Only the first non-empty
//! accelerator tier is consulted; within it the first listed member that
//! advertises the wanted precision wins. An FP32 model may fall back to an
//! FP16-capable accelerator before the processor is chosen.

use tracing::{debug, info};

use cortex_core::{DeviceId, DeviceTier, Precision, PrefixClass, TierTable, SELECTION_ORDER};

use crate::catalog::CapabilityLookup;
use crate::error::SelectError;

/// Devices bucketed by tier, each bucket in input order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TierPartition {
    pub processor: Vec<DeviceId>,
    pub discrete: Vec<DeviceId>,
    pub family_a: Vec<DeviceId>,
    pub integrated: Vec<DeviceId>,
    pub family_b: Vec<DeviceId>,
}

impl TierPartition {
    pub fn tier(&self, tier: DeviceTier) -> &[DeviceId] {
        match tier {
            DeviceTier::Processor => &self.processor,
            DeviceTier::DiscreteAccelerator => &self.discrete,
            DeviceTier::FamilyA => &self.family_a,
            DeviceTier::IntegratedAccelerator => &self.integrated,
            DeviceTier::FamilyB => &self.family_b,
        }
    }

    fn tier_mut(&mut self, tier: DeviceTier) -> &mut Vec<DeviceId> {
        match tier {
            DeviceTier::Processor => &mut self.processor,
            DeviceTier::DiscreteAccelerator => &mut self.discrete,
            DeviceTier::FamilyA => &mut self.family_a,
            DeviceTier::IntegratedAccelerator => &mut self.integrated,
            DeviceTier::FamilyB => &mut self.family_b,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.processor.is_empty()
            && self.discrete.is_empty()
            && self.family_a.is_empty()
            && self.integrated.is_empty()
            && self.family_b.is_empty()
    }

    /// Tier the device landed in, if any
    pub fn tier_of(&self, device: &DeviceId) -> Option<DeviceTier> {
        [DeviceTier::Processor]
            .into_iter()
            .chain(SELECTION_ORDER)
            .find(|tier| self.tier(*tier).contains(device))
    }
}

pub struct DeviceSelector<'a> {
    table: &'a TierTable,
    lookup: &'a dyn CapabilityLookup,
}

impl<'a> DeviceSelector<'a> {
    pub fn new(table: &'a TierTable, lookup: &'a dyn CapabilityLookup) -> Self {
        Self { table, lookup }
    }

    /// Bucket devices by prefix. Generic accelerators are split by the
    /// discrete/integrated marker in their full name; a device whose name
    /// cannot be read or carries no marker is left out, as are unknown
    /// families.
    pub fn partition(&self, devices: &[DeviceId]) -> TierPartition {
        let mut partition = TierPartition::default();

        for device in devices {
            let tier = match self.table.classify(device) {
                Some(PrefixClass::Tier(tier)) => tier,
                Some(PrefixClass::GenericAccelerator) => match self.lookup.full_name(device) {
                    Ok(name) => match self.table.split_generic(&name) {
                        Some(tier) => tier,
                        None => {
                            debug!(device = %device, full_name = %name, "Accelerator has no tier marker");
                            continue;
                        }
                    },
                    Err(e) => {
                        debug!(device = %device, error = %e, "Skipping accelerator, name query failed");
                        continue;
                    }
                },
                None => continue,
            };
            partition.tier_mut(tier).push(device.clone());
        }

        partition
    }

    /// Pick the device that should serve a model of the given precision.
    /// `None` leaves precision unconstrained.
    pub fn select(
        &self,
        devices: &[DeviceId],
        precision: Option<Precision>,
    ) -> Result<DeviceId, SelectError> {
        match devices {
            [] => {
                return Err(SelectError::NotFound(
                    "No available device to select in AUTO plugin".to_string(),
                ))
            }
            [only] => return Ok(only.clone()),
            _ => {}
        }

        let partition = self.partition(devices);
        if partition.is_empty() {
            return Err(SelectError::NotFound("No available device found".to_string()));
        }

        if let Some(device) = self.walk(&partition, precision) {
            return Ok(device);
        }

        // An FP32 model with no FP32 accelerator may still run on an FP16 one
        if precision == Some(Precision::Fp32) {
            if let Some(device) = self.walk(&partition, Some(Precision::Fp16)) {
                info!(device = %device, "Offloading FP32 model to FP16 accelerator");
                return Ok(device);
            }
        }

        let fallback = partition
            .processor
            .first()
            .cloned()
            .ok_or(SelectError::NoEligibleDevice)?;
        info!(device = %fallback, "No accelerator matched, falling back to processor");
        Ok(fallback)
    }

    fn walk(&self, partition: &TierPartition, precision: Option<Precision>) -> Option<DeviceId> {
        let (tier, members) = SELECTION_ORDER
            .iter()
            .map(|tier| (*tier, partition.tier(*tier)))
            .find(|(_, members)| !members.is_empty())?;

        let chosen = members
            .iter()
            .find(|device| self.supports(device, precision))
            .cloned();

        if let Some(device) = &chosen {
            info!(
                device = %device,
                tier = %tier,
                precision = %precision.map_or("ANY", |p| p.tag()),
                "Selected accelerator"
            );
        }
        chosen
    }

    fn supports(&self, device: &DeviceId, precision: Option<Precision>) -> bool {
        match self.lookup.capabilities_of(device) {
            Ok(manifest) => precision.map_or(true, |p| manifest.supports(p)),
            Err(e) => {
                debug!(device = %device, error = %e, "Skipping device, capability query failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_core::CapabilityManifest;
    use std::collections::HashMap;

    fn manifest(name: &str, precisions: &[Precision]) -> CapabilityManifest {
        precisions
            .iter()
            .fold(CapabilityManifest::new(name), |m, p| m.with_precision(*p))
    }

    fn pool(entries: &[(&str, &str, &[Precision])]) -> HashMap<DeviceId, CapabilityManifest> {
        entries
            .iter()
            .map(|(id, name, precisions)| (DeviceId::new(*id), manifest(name, precisions)))
            .collect()
    }

    fn ids(names: &[&str]) -> Vec<DeviceId> {
        names.iter().map(|n| DeviceId::new(*n)).collect()
    }

    #[test]
    fn test_empty_list_not_found() {
        let table = TierTable::default();
        let lookup = pool(&[]);
        let selector = DeviceSelector::new(&table, &lookup);
        assert!(matches!(
            selector.select(&[], Some(Precision::Fp32)),
            Err(SelectError::NotFound(_))
        ));
    }

    #[test]
    fn test_single_device_returned_regardless_of_precision() {
        let table = TierTable::default();
        let lookup = pool(&[]);
        let selector = DeviceSelector::new(&table, &lookup);
        for precision in [Precision::Int8, Precision::Fp16, Precision::Fp32] {
            let chosen = selector.select(&ids(&["FPGA"]), Some(precision)).unwrap();
            assert_eq!(chosen.as_str(), "FPGA");
        }
    }

    #[test]
    fn test_discrete_beats_everything() {
        let table = TierTable::default();
        let lookup = pool(&[
            ("CPU", "cpu", &[Precision::Fp32]),
            ("MYRIAD", "myriad", &[Precision::Fp16]),
            ("GPU.0", "Iris (iGPU)", &[Precision::Fp32]),
            ("VPUX", "vpux", &[Precision::Fp32]),
            ("GPU.1", "Arc (dGPU)", &[Precision::Fp32, Precision::Fp16]),
        ]);
        let selector = DeviceSelector::new(&table, &lookup);
        let devices = ids(&["CPU", "MYRIAD", "GPU.0", "VPUX", "GPU.1"]);
        assert_eq!(selector.select(&devices, Some(Precision::Fp32)).unwrap().as_str(), "GPU.1");
    }

    #[test]
    fn test_tier_priority_without_discrete() {
        let table = TierTable::default();
        let lookup = pool(&[
            ("CPU", "cpu", &[Precision::Fp32]),
            ("GPU.0", "Iris (iGPU)", &[Precision::Fp32]),
            ("VPUX", "vpux", &[Precision::Fp32]),
        ]);
        let selector = DeviceSelector::new(&table, &lookup);
        let devices = ids(&["CPU", "GPU.0", "VPUX"]);
        assert_eq!(selector.select(&devices, Some(Precision::Fp32)).unwrap().as_str(), "VPUX");
    }

    #[test]
    fn test_first_listed_member_wins() {
        let table = TierTable::default();
        let lookup = pool(&[
            ("GPU.1", "B (dGPU)", &[Precision::Fp16]),
            ("GPU.0", "A (dGPU)", &[Precision::Fp16]),
            ("CPU", "cpu", &[Precision::Fp32]),
        ]);
        let selector = DeviceSelector::new(&table, &lookup);
        let devices = ids(&["GPU.1", "GPU.0", "CPU"]);
        assert_eq!(selector.select(&devices, Some(Precision::Fp16)).unwrap().as_str(), "GPU.1");
    }

    #[test]
    fn test_fp32_degrades_to_fp16() {
        let table = TierTable::default();
        let lookup = pool(&[
            ("CPU", "cpu", &[Precision::Fp32]),
            ("MYRIAD.0", "myriad", &[Precision::Fp16]),
        ]);
        let selector = DeviceSelector::new(&table, &lookup);
        let devices = ids(&["CPU", "MYRIAD.0"]);
        assert_eq!(
            selector.select(&devices, Some(Precision::Fp32)).unwrap().as_str(),
            "MYRIAD.0"
        );
    }

    #[test]
    fn test_no_degradation_for_int8() {
        let table = TierTable::default();
        let lookup = pool(&[
            ("CPU", "cpu", &[Precision::Int8]),
            ("GPU.0", "Arc (dGPU)", &[Precision::Fp16]),
        ]);
        let selector = DeviceSelector::new(&table, &lookup);
        let devices = ids(&["CPU", "GPU.0"]);
        assert_eq!(selector.select(&devices, Some(Precision::Int8)).unwrap().as_str(), "CPU");
    }

    #[test]
    fn test_only_first_non_empty_tier_is_consulted() {
        let table = TierTable::default();
        // The discrete accelerator cannot run INT8; family A could, but is never asked
        let lookup = pool(&[
            ("CPU", "cpu", &[Precision::Int8]),
            ("GPU.0", "Arc (dGPU)", &[Precision::Fp16]),
            ("VPUX", "vpux", &[Precision::Int8]),
        ]);
        let selector = DeviceSelector::new(&table, &lookup);
        let devices = ids(&["CPU", "GPU.0", "VPUX"]);
        assert_eq!(selector.select(&devices, Some(Precision::Int8)).unwrap().as_str(), "CPU");
    }

    #[test]
    fn test_unknown_families_only_fail() {
        let table = TierTable::default();
        let lookup = pool(&[]);
        let selector = DeviceSelector::new(&table, &lookup);
        let result = selector.select(&ids(&["FPGA", "HDDL"]), Some(Precision::Fp32));
        assert!(matches!(result, Err(SelectError::NotFound(_))));
    }

    #[test]
    fn test_no_processor_to_fall_back_on() {
        let table = TierTable::default();
        let lookup = pool(&[("GPU.0", "Arc (dGPU)", &[Precision::Fp16])]);
        let selector = DeviceSelector::new(&table, &lookup);
        let result = selector.select(&ids(&["GPU.0", "FPGA"]), Some(Precision::Int8));
        assert_eq!(result, Err(SelectError::NoEligibleDevice));
    }

    #[test]
    fn test_failed_queries_exclude_device() {
        let table = TierTable::default();
        // GPU.0 has no manifest: name query fails and it drops out of the tiers
        let lookup = pool(&[
            ("CPU", "cpu", &[Precision::Fp32]),
            ("GPU.1", "Iris (iGPU)", &[Precision::Fp32]),
        ]);
        let selector = DeviceSelector::new(&table, &lookup);
        let devices = ids(&["GPU.0", "GPU.1", "CPU"]);
        let partition = selector.partition(&devices);
        assert!(partition.discrete.is_empty());
        assert_eq!(partition.tier_of(&"GPU.1".into()), Some(DeviceTier::IntegratedAccelerator));
        assert_eq!(partition.tier_of(&"GPU.0".into()), None);
        assert_eq!(selector.select(&devices, Some(Precision::Fp32)).unwrap().as_str(), "GPU.1");
    }

    #[test]
    fn test_unconstrained_precision_takes_first_member() {
        let table = TierTable::default().with_generic_prefix("ACCEL");
        let lookup = pool(&[
            ("CPU", "cpu", &[]),
            ("ACCEL.0", "Accel (dGPU)", &[Precision::Int8]),
        ]);
        let selector = DeviceSelector::new(&table, &lookup);
        let devices = ids(&["CPU", "ACCEL.0"]);
        assert_eq!(selector.select(&devices, None).unwrap().as_str(), "ACCEL.0");
    }

    #[test]
    fn test_selection_is_deterministic() {
        let table = TierTable::default();
        let lookup = pool(&[
            ("CPU", "cpu", &[Precision::Fp32]),
            ("GPU.0", "A (iGPU)", &[Precision::Fp16]),
            ("GPU.1", "B (iGPU)", &[Precision::Fp16]),
        ]);
        let selector = DeviceSelector::new(&table, &lookup);
        let devices = ids(&["CPU", "GPU.0", "GPU.1"]);
        let first = selector.select(&devices, Some(Precision::Fp32)).unwrap();
        for _ in 0..10 {
            assert_eq!(selector.select(&devices, Some(Precision::Fp32)).unwrap(), first);
        }
        assert_eq!(first.as_str(), "GPU.0");
    }
}
