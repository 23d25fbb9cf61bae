//! Shared test doubles

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use contracts::{
    ContractError, Transmission, TransmissionId, TransmissionIdGenerator, TransmissionOutput,
    GZIP_CONTENT_ENCODING, JSON_STREAM_CONTENT_TYPE,
};

use crate::outputs::{IngestionClient, IngestionResponse};

pub fn transmission(id: u64) -> Transmission {
    Transmission::new(
        TransmissionId::new(id),
        vec![1u8; 16],
        JSON_STREAM_CONTENT_TYPE,
        GZIP_CONTENT_ENCODING,
    )
}

pub fn ids() -> Arc<TransmissionIdGenerator> {
    Arc::new(TransmissionIdGenerator::starting_at(1_000))
}

/// Output recording every id it receives
pub struct RecordingOutput {
    name: String,
    pub received: Arc<Mutex<Vec<TransmissionId>>>,
    pub delay: Duration,
}

impl RecordingOutput {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            received: Arc::new(Mutex::new(Vec::new())),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl TransmissionOutput for RecordingOutput {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, transmission: Transmission) -> Result<(), ContractError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.received.lock().unwrap().push(transmission.id());
        Ok(())
    }

    async fn close(&self) -> Result<(), ContractError> {
        Ok(())
    }
}

/// Client answering every request with the same status
pub struct StaticClient {
    pub status: u16,
    pub calls: Arc<AtomicUsize>,
}

impl StaticClient {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl IngestionClient for StaticClient {
    async fn post(&self, _transmission: &Transmission) -> Result<IngestionResponse, ContractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(IngestionResponse {
            status: self.status,
            retry_after: None,
            body: String::new(),
        })
    }
}
