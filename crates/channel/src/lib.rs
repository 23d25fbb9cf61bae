//! # Channel
//!
//! Producer-facing side of the telemetry pipeline:
//! - `TelemetryBuffer` batches submitted items by size and time
//! - `ChannelTransmitter` fetches, serializes and dispatches batches on its
//!   own workers
//! - `TelemetryChannel` wires both to the transmission pipeline and owns the
//!   shutdown sequence

pub mod buffer;
pub mod channel;
pub mod error;
pub mod transmitter;

pub use buffer::{normalize_batch_limit, TelemetryBuffer};
pub use channel::{TelemetryChannel, TelemetryChannelBuilder};
pub use error::ChannelError;
pub use transmitter::{ChannelTransmitter, TelemetriesFetcher, TelemetriesTransmitter};
