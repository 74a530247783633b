use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use cortex_core::{ConfigMap, CoreError, DeviceId, Precision, TierTable};
use cortex_dispatch::{DeviceCatalog, StaticDevice, StaticDeviceSpec};

#[derive(Error, Debug)]
pub enum EnvError {
    #[error("Cannot read environment file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid environment file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Device family {0} is declared twice")]
    DuplicateFamily(String),

    #[error("Invalid device in environment file: {0}")]
    Device(#[from] CoreError),
}

/// One device family of the simulated environment
#[derive(Debug, Clone, Deserialize)]
pub struct FamilyEntry {
    pub family: String,
    #[serde(flatten)]
    pub device: StaticDeviceSpec,
}

/// Simulated device pool the CLI dispatches against.
///
/// ```json
/// {
///   "devices": [
///     { "family": "CPU", "full_name": "Host CPU", "capabilities": ["FP32", "INT8"] },
///     { "family": "GPU", "full_name": "Arc A770 (dGPU)", "capabilities": ["FP16"], "indices": ["0"] }
///   ],
///   "groups": { "ALL_GPU": ["GPU.0"] },
///   "config": { "PERF_COUNT": "YES" }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceEnvironment {
    #[serde(default)]
    pub devices: Vec<FamilyEntry>,
    #[serde(default)]
    pub groups: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub tiers: Option<TierTable>,
    #[serde(default)]
    pub config: ConfigMap,
}

impl DeviceEnvironment {
    pub fn from_json(json: &str) -> Result<Self, EnvError> {
        let env: Self = serde_json::from_str(json)?;
        let mut seen = std::collections::HashSet::new();
        for entry in &env.devices {
            let family = DeviceId::parse(&entry.family)?;
            if !seen.insert(family) {
                return Err(EnvError::DuplicateFamily(entry.family.clone()));
            }
        }
        for member in env.groups.values().flatten() {
            DeviceId::parse(member)?;
        }
        Ok(env)
    }

    pub fn load(path: &Path) -> Result<Self, EnvError> {
        let json = std::fs::read_to_string(path).map_err(|source| EnvError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let env = Self::from_json(&json)?;
        debug!(path = %path.display(), families = env.devices.len(), "Loaded device environment");
        Ok(env)
    }

    /// `--env` if given, then `devices.json` in the user config directory,
    /// then the built-in processor + discrete accelerator pair
    pub fn resolve(explicit: Option<PathBuf>) -> Result<Self, EnvError> {
        if let Some(path) = explicit {
            return Self::load(&path);
        }

        let user_file = directories::ProjectDirs::from("com", "cortexos", "cortex-auto")
            .map(|dirs| dirs.config_dir().join("devices.json"));
        match user_file {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                info!("No device environment file, using the built-in CPU + GPU pair");
                Ok(Self::builtin())
            }
        }
    }

    pub fn builtin() -> Self {
        let cpu = StaticDeviceSpec {
            full_name: "Host CPU".to_string(),
            capabilities: vec![Precision::Fp32.tag().to_string(), Precision::Int8.tag().to_string()],
            ..Default::default()
        };
        let gpu = StaticDeviceSpec {
            full_name: "Discrete Graphics (dGPU)".to_string(),
            capabilities: vec![Precision::Fp32.tag().to_string(), Precision::Fp16.tag().to_string()],
            indices: vec!["0".to_string()],
            ..Default::default()
        };

        Self {
            devices: vec![
                FamilyEntry {
                    family: "CPU".to_string(),
                    device: cpu,
                },
                FamilyEntry {
                    family: "GPU".to_string(),
                    device: gpu,
                },
            ],
            ..Default::default()
        }
    }

    pub fn tier_table(&self) -> TierTable {
        self.tiers.clone().unwrap_or_default()
    }

    /// Register every family and group with a fresh catalog
    pub fn build_catalog(&self) -> Arc<DeviceCatalog> {
        let catalog = Arc::new(DeviceCatalog::new());
        for entry in &self.devices {
            let device: StaticDevice = entry.device.clone().into();
            catalog.register(entry.family.as_str(), Arc::new(device));
        }
        for (name, members) in &self.groups {
            let members = members.iter().map(|m| DeviceId::new(m.as_str())).collect();
            catalog.register_group(name.as_str(), members);
        }
        catalog
    }
}
