//! TransmissionOutput trait - Dispatcher output interface
//!
//! Defines the abstract interface for outputs (network, file system).

use crate::{ContractError, Transmission};

/// Transmission output trait
///
/// Implementations are shared by every worker of their output handle, so all
/// methods take `&self`.
#[trait_variant::make(TransmissionOutput: Send)]
pub trait LocalTransmissionOutput {
    /// Output name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Deliver one transmission
    ///
    /// # Errors
    /// Returns an error only when the transmission could not be handed on at
    /// all; ordinary delivery failures are handled by the output itself.
    async fn send(&self, transmission: Transmission) -> Result<(), ContractError>;

    /// Release resources once the worker queue is drained
    async fn close(&self) -> Result<(), ContractError>;
}
