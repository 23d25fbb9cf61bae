//! Error types for CLI operations.

use std::path::Path;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    #[error("Failed to load configuration from {path}: {source}")]
    ConfigLoad {
        path: String,
        #[source]
        source: contracts::ContractError,
    },

    /// Override produced an invalid configuration
    #[error("Configuration validation failed: {source}")]
    ConfigValidation {
        #[source]
        source: contracts::ContractError,
    },

    /// A line of input is not a telemetry item
    #[error("Invalid telemetry item on line {line}: {message}")]
    InvalidInput { line: usize, message: String },

    #[error("Failed to start telemetry channel: {0}")]
    Channel(#[from] channel::ChannelError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn config_not_found(path: &Path) -> Self {
        Self::ConfigNotFound {
            path: path.display().to_string(),
        }
    }

    pub fn config_load(path: &Path, source: contracts::ContractError) -> Self {
        Self::ConfigLoad {
            path: path.display().to_string(),
            source,
        }
    }

    pub fn invalid_input(line: usize, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            line,
            message: message.into(),
        }
    }
}

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
