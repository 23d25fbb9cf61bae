//! Channel error types

use thiserror::Error;
use transmission::TransmissionError;

/// Errors raised while building a channel
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Channel workers need a tokio runtime
    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),

    /// Rejected configuration value
    #[error("invalid channel configuration at '{field}': {message}")]
    InvalidConfig { field: String, message: String },

    /// Transmission pipeline error
    #[error("transmission error: {0}")]
    Transmission(#[from] TransmissionError),
}

impl ChannelError {
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }
}
