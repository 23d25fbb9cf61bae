//! Output implementations

mod file_system;
mod network;

pub use file_system::{
    FileSystemOutput, StorageStatus, IN_FLIGHT_EXTENSION, TEMP_EXTENSION, TRANSMISSION_EXTENSION,
};
pub use network::{
    parse_retry_after, BackendResponse, HttpIngestionClient, IngestionClient, IngestionResponse,
    ItemError, LocalIngestionClient, NetworkOutput, StorageFallback,
};
