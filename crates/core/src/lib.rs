pub mod capability;
pub mod config;
pub mod device;
pub mod error;
pub mod graph;

pub use capability::{metrics, CapabilityManifest, MetricValue, Precision};
pub use config::{merge, validate, ConfigMap};
pub use device::{DeviceId, DeviceTier, PrefixClass, TierTable, SELECTION_ORDER};
pub use error::{CoreError, Result};
pub use graph::{ElementType, Graph, ModelGraph, ModelSource, Operation};
