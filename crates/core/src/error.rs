use thiserror::Error;

/// Errors raised by the core data model.
///
/// These cover configuration validation, device identifier parsing and
/// precision tag parsing. Device-level failures live in `cortex-dispatch`.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Key is neither in the reserved namespace nor a recognized toggle
    #[error("Unsupported config key: {0}")]
    UnsupportedKey(String),

    /// Recognized toggle key holds a value outside YES/NO
    #[error("Unsupported config value: {value} for key: {key}")]
    UnsupportedValue { key: String, value: String },

    /// Device identifier is empty or malformed
    #[error("Invalid device id: {0:?}")]
    InvalidDeviceId(String),

    /// Precision tag is not one of INT8, FP16, FP32
    #[error("Unknown precision tag: {0}")]
    UnknownPrecision(String),

    /// `KEY=VALUE` pair could not be split
    #[error("Malformed config pair: {0}")]
    MalformedPair(String),

    /// Failed to serialize or deserialize data
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
