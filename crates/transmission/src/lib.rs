//! # Transmission
//!
//! Everything between a serialized batch and the ingestion endpoint:
//! - gzip serializer producing `Transmission`s
//! - network and file system outputs, each an active object
//!   (`OutputHandle` = bounded queue + worker pool)
//! - policy manager suspending network sends on throttling/quota/backoff
//! - dispatcher routing by policy state with an in-flight registry
//! - loader resubmitting persisted transmissions

pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod in_flight;
pub mod loader;
pub mod metrics;
pub mod outputs;
pub mod policy;
pub mod serializer;

#[cfg(test)]
mod test_support;

pub use contracts::{Transmission, TransmissionOutput};
pub use dispatcher::{
    create_pipeline, DispatchRoute, PipelineBuilder, TransmissionDispatcher, TransmissionPipeline,
};
pub use error::TransmissionError;
pub use handle::{OutputHandle, OutputSender};
pub use in_flight::{InFlightClaim, InFlightRegistry};
pub use loader::{LoadStep, LoaderHandle, TransmissionsLoader};
pub use metrics::{MetricsSnapshot, OutputMetrics};
pub use outputs::{
    FileSystemOutput, HttpIngestionClient, IngestionClient, IngestionResponse, NetworkOutput,
    StorageFallback, StorageStatus,
};
pub use policy::TransmissionPolicyManager;
pub use serializer::{decode_lines, GzipSerializer};
