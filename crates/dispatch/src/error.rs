use std::fmt;
use thiserror::Error;

use cortex_core::{CoreError, DeviceId};

/// Failure reported by a single device.
///
/// Query-phase failures are never fatal to a request; the device is just
/// left out of that decision.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// No service is registered for the device
    #[error("device unavailable: {0}")]
    Unavailable(DeviceId),

    /// Device does not know the metric
    #[error("unsupported metric {metric} on {device}")]
    UnsupportedMetric { device: DeviceId, metric: String },

    /// Metric returned a value of the wrong shape
    #[error("metric {metric} on {device} has unexpected type")]
    UnexpectedMetricType { device: DeviceId, metric: String },

    /// Device failed to answer a metric or operation query
    #[error("query failed on {device}: {reason}")]
    QueryFailed { device: DeviceId, reason: String },

    /// Device-specific compilation failed
    #[error("compile failed on {device}: {reason}")]
    CompileFailed { device: DeviceId, reason: String },
}

/// Errors from the device selector
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Not even the processor tier can serve the request
    #[error("cannot select any device")]
    NoEligibleDevice,
}

/// Which compile task a result belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    Processor,
    Accelerator,
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotKind::Processor => f.write_str("processor"),
            SlotKind::Accelerator => f.write_str("accelerator"),
        }
    }
}

/// A compile slot that resolved to an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotFailure {
    pub slot: SlotKind,
    pub device: DeviceId,
    pub reason: String,
}

impl fmt::Display for SlotFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} slot on {}: {}", self.slot, self.device, self.reason)
    }
}

/// Errors surfaced by the AUTO dispatcher
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Configuration rejected before any device work
    #[error("configuration error: {0}")]
    Config(#[from] CoreError),

    /// No device catalog attached
    #[error("Please, work with AUTO device via a device catalog")]
    NotConfigured,

    /// Neither a usable path nor a usable graph was supplied
    #[error("unsupported input: {0}")]
    UnsupportedInput(String),

    #[error("Please, check environment due to no supported devices can be used")]
    NoDevicesAvailable,

    #[error("selection failed: {0}")]
    Selection(#[from] SelectError),

    #[error("Unsupported metric key {0}")]
    UnsupportedMetric(String),

    /// Neither a processor nor an accelerator task could be started
    #[error("no compile target for the selected devices")]
    NoCompileTarget,

    /// The requested slot was never populated
    #[error("{0} slot does not exist")]
    SlotAbsent(SlotKind),

    #[error("compile failed in {slot} slot on {device}: {reason}")]
    CompileFailed {
        slot: SlotKind,
        device: DeviceId,
        reason: String,
    },

    #[error("all compile slots failed: {}", format_failures(.failures))]
    AllSlotsFailed { failures: Vec<SlotFailure> },

    #[error("device error: {0}")]
    Device(#[from] DeviceError),
}

impl DispatchError {
    pub fn from_failure(failure: SlotFailure) -> Self {
        DispatchError::CompileFailed {
            slot: failure.slot,
            device: failure.device,
            reason: failure.reason,
        }
    }
}

fn format_failures(failures: &[SlotFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Convenience Result type for dispatch operations
pub type Result<T> = std::result::Result<T, DispatchError>;
