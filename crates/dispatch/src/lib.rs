//! CortexOS AUTO device dispatcher
//!
//! Picks the device(s) that should run a model out of a pool of processors
//! and accelerators, and compiles on the processor and the chosen
//! accelerator concurrently.
//!
//! ## Flow
//!
//! ```text
//! load:  config merge+validate -> catalog enumerate -> classify precision
//!        -> select accelerator -> spawn compile(processor) + compile(accelerator)
//! query: config merge -> catalog enumerate -> operation-support query
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cortex_dispatch::{AutoDispatcher, DeviceCatalog, StaticDevice};
//!
//! let catalog = Arc::new(DeviceCatalog::new());
//! catalog.register("CPU", Arc::new(StaticDevice::new("Host CPU").with_precision(Precision::Fp32)));
//! catalog.register("GPU", Arc::new(StaticDevice::new("Arc A770 (dGPU)").with_precision(Precision::Fp16)));
//!
//! let dispatcher = AutoDispatcher::with_catalog(catalog);
//! let workload = dispatcher.load_from_graph(graph, &ConfigMap::new()).await?;
//! let model = workload.settle().await?;
//! ```

pub mod catalog;
pub mod classify;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod intersect;
pub mod select;

pub use catalog::{CapabilityLookup, DeviceCatalog, DeviceService, ExecutableModel};
pub use classify::classify;
pub use device::{FailureProfile, StaticDevice, StaticDeviceSpec};
pub use dispatcher::{AutoDispatcher, DISPATCHER_NAME};
pub use error::{DeviceError, DispatchError, Result, SelectError, SlotFailure, SlotKind};
pub use handle::{CompileSlot, CompiledWorkload};
pub use select::{DeviceSelector, TierPartition};
