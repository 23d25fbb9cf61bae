//! Layered error definitions
//!
//! Categorized by source: config / serialize / network / storage

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Serialization Errors =====
    /// Telemetry item could not be encoded
    #[error("serialize error: {message}")]
    Serialize { message: String },

    // ===== Output Errors =====
    /// Output send error
    #[error("output '{output}' send error: {message}")]
    OutputSend { output: String, message: String },

    /// Output connection error
    #[error("output '{output}' connection error: {message}")]
    OutputConnection { output: String, message: String },

    // ===== Storage Errors =====
    /// Persisted transmission could not be decoded
    #[error("corrupt transmission file '{path}': {message}")]
    CorruptTransmission { path: String, message: String },

    /// Storage budget cannot hold the transmission
    #[error("storage capacity exceeded: need {needed} bytes, capacity {capacity} bytes")]
    StorageCapacity { needed: u64, capacity: u64 },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create serialize error
    pub fn serialize(message: impl Into<String>) -> Self {
        Self::Serialize {
            message: message.into(),
        }
    }

    /// Create output send error
    pub fn output_send(output: impl Into<String>, message: impl Into<String>) -> Self {
        Self::OutputSend {
            output: output.into(),
            message: message.into(),
        }
    }

    /// Create corrupt transmission error
    pub fn corrupt_transmission(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CorruptTransmission {
            path: path.into(),
            message: message.into(),
        }
    }
}
