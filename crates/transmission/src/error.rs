//! Transmission error types

use std::path::PathBuf;
use thiserror::Error;

/// Transmission-pipeline errors
#[derive(Debug, Error)]
pub enum TransmissionError {
    /// Output creation error
    #[error("failed to create output '{name}': {message}")]
    OutputCreation { name: String, message: String },

    /// Storage directory could not be prepared
    #[error("storage directory '{}' unavailable: {source}", path.display())]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Output error (from contract)
    #[error("output error: {0}")]
    Contract(#[from] contracts::ContractError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransmissionError {
    /// Create an output creation error
    pub fn output_creation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::OutputCreation {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a storage error for `path`
    pub fn storage_unavailable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::StorageUnavailable {
            path: path.into(),
            source,
        }
    }
}
