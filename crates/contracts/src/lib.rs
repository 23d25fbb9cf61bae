//! # Contracts
//!
//! Interface contracts shared by every crate of the telemetry channel.
//! Business crates depend on this crate only, never on each other in reverse.
//!
//! ## Ownership model
//! - A `TelemetryItem` is immutable once submitted
//! - A `Transmission` moves one way: buffer -> transmitter -> dispatcher -> output
//! - `TransmissionId` is assigned once and survives persistence to disk

mod config;
mod error;
mod handler;
mod output;
mod telemetry;
mod transmission;

pub use config::*;
pub use error::*;
pub use handler::*;
pub use output::*;
pub use telemetry::*;
pub use transmission::*;
