//! NetworkOutput - HTTP POST to the ingestion endpoint

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, CONTENT_ENCODING, CONTENT_TYPE, RETRY_AFTER};
use serde::Deserialize;
use metrics::counter;
use tracing::{debug, error, info, instrument, warn};

use contracts::{
    is_retriable_status, ContractError, NetworkConfig, SendOutcome, Transmission,
    TransmissionHandlerArgs, TransmissionId, TransmissionOutput,
};

use crate::error::TransmissionError;
use crate::handle::OutputSender;
use crate::outputs::FileSystemOutput;
use crate::policy::TransmissionPolicyManager;
use crate::serializer::{decode_lines, GzipSerializer};

/// Redirect hops followed before the request counts as failed
const MAX_REDIRECTS: usize = 2;

/// What the endpoint answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionResponse {
    pub status: u16,
    pub retry_after: Option<Duration>,
    pub body: String,
}

/// Transport used by `NetworkOutput`
///
/// `Err` means no HTTP response was obtained at all.
#[trait_variant::make(IngestionClient: Send)]
pub trait LocalIngestionClient {
    async fn post(&self, transmission: &Transmission) -> Result<IngestionResponse, ContractError>;
}

/// reqwest-backed client
#[derive(Debug, Clone)]
pub struct HttpIngestionClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpIngestionClient {
    pub fn new(config: &NetworkConfig) -> Result<Self, TransmissionError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| TransmissionError::output_creation("network", e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint_url.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl IngestionClient for HttpIngestionClient {
    async fn post(&self, transmission: &Transmission) -> Result<IngestionResponse, ContractError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, transmission.content_type())
            .header(CONTENT_ENCODING, transmission.content_encoding())
            .body(transmission.content().clone())
            .send()
            .await
            .map_err(|e| ContractError::OutputConnection {
                output: "network".to_string(),
                message: e.to_string(),
            })?;

        let status = response.status().as_u16();
        let retry_after = parse_retry_after(response.headers());
        // The body only matters for 206 and diagnostics
        let body = response.text().await.unwrap_or_default();

        Ok(IngestionResponse {
            status,
            retry_after,
            body,
        })
    }
}

/// `Retry-After` in delta-seconds form
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Body of a 206 response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendResponse {
    pub items_received: usize,
    pub items_accepted: usize,
    #[serde(default)]
    pub errors: Vec<ItemError>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemError {
    pub index: usize,
    pub status_code: u16,
    #[serde(default)]
    pub message: String,
}

/// Where failed transmissions go
#[derive(Clone)]
pub struct StorageFallback {
    pub sender: OutputSender,
    pub storage: Arc<FileSystemOutput>,
}

/// Output that POSTs transmissions and routes failures to disk
pub struct NetworkOutput<C> {
    name: String,
    client: C,
    policy: Arc<TransmissionPolicyManager>,
    serializer: Arc<GzipSerializer>,
    fallback: Option<StorageFallback>,
    max_instant_retries: u32,
    credentials_warned: AtomicBool,
}

impl<C: IngestionClient + Sync> NetworkOutput<C> {
    pub fn new(
        name: impl Into<String>,
        client: C,
        policy: Arc<TransmissionPolicyManager>,
        serializer: Arc<GzipSerializer>,
        fallback: Option<StorageFallback>,
        max_instant_retries: u32,
    ) -> Self {
        Self {
            name: name.into(),
            client,
            policy,
            serializer,
            fallback,
            max_instant_retries,
            credentials_warned: AtomicBool::new(false),
        }
    }

    fn report(
        &self,
        transmission: &Transmission,
        outcome: SendOutcome,
        response_code: Option<u16>,
        retry_after: Option<Duration>,
        elapsed: Duration,
    ) {
        self.policy.on_transmission_sent(&TransmissionHandlerArgs {
            transmission,
            outcome,
            response_code,
            retry_after,
            elapsed,
        });
    }

    /// Hand a transmission to the file system output for a later resend
    fn persist(&self, transmission: Transmission) {
        let Some(fallback) = &self.fallback else {
            error!(
                output = %self.name,
                transmission_id = %transmission.id(),
                "No durable storage available, transmission dropped"
            );
            counter!("telemetry_channel_transmissions_dropped_total", "reason" => "no_storage")
                .increment(1);
            return;
        };

        if let Err(transmission) = fallback.sender.try_send(transmission) {
            error!(
                output = %self.name,
                transmission_id = %transmission.id(),
                "File system queue unavailable, transmission dropped"
            );
            counter!("telemetry_channel_transmissions_dropped_total", "reason" => "storage_queue")
                .increment(1);
        }
    }

    fn forget_stored(&self, id: TransmissionId) {
        if let Some(fallback) = &self.fallback {
            fallback.storage.delete_transmission(id);
        }
    }

    fn log_credentials_failure(&self, id: TransmissionId, status: u16) {
        if !self.credentials_warned.swap(true, Ordering::Relaxed) {
            warn!(
                output = %self.name,
                transmission_id = %id,
                status,
                "Ingestion endpoint rejected the credentials; transmissions are kept on disk"
            );
        } else {
            debug!(output = %self.name, transmission_id = %id, status, "Credentials rejected");
        }
    }

    fn handle_response(&self, transmission: Transmission, response: IngestionResponse, elapsed: Duration) {
        let id = transmission.id();
        let status = response.status;
        let outcome = SendOutcome::from_status(status);

        let mut retry_after = None;
        match outcome {
            SendOutcome::Delivered => {
                debug!(output = %self.name, transmission_id = %id, status, "Transmission delivered");
            }
            SendOutcome::PartiallyAccepted { .. } => {
                self.handle_partial(transmission, &response.body, elapsed);
                return;
            }
            SendOutcome::CredentialsRejected => {
                self.log_credentials_failure(id, status);
            }
            SendOutcome::Throttled | SendOutcome::QuotaExceeded => {
                warn!(
                    output = %self.name,
                    transmission_id = %id,
                    status,
                    retry_after_secs = response.retry_after.map(|d| d.as_secs()),
                    "Ingestion endpoint asked to slow down"
                );
                retry_after = response.retry_after;
            }
            SendOutcome::Rejected | SendOutcome::TransportError => {
                warn!(
                    output = %self.name,
                    transmission_id = %id,
                    status,
                    body = %response.body.lines().next().unwrap_or_default(),
                    "Ingestion endpoint rejected transmission"
                );
            }
        }

        self.report(&transmission, outcome, Some(status), retry_after, elapsed);
        if outcome.needs_retry() {
            self.persist(transmission);
        } else {
            self.forget_stored(id);
        }
    }

    /// 206: keep the retriable rejections, drop the rest
    fn handle_partial(&self, transmission: Transmission, body: &str, elapsed: Duration) {
        let id = transmission.id();
        let parsed = serde_json::from_str::<BackendResponse>(body).ok();
        let lines = decode_lines(&transmission).ok();

        let (Some(response), Some(lines)) = (parsed, lines) else {
            warn!(output = %self.name, transmission_id = %id, "Unreadable partial response, retrying whole transmission");
            self.report(&transmission, SendOutcome::PartiallyAccepted { received: 0, accepted: 0 }, Some(206), None, elapsed);
            self.persist(transmission);
            return;
        };

        if response.items_received != lines.len() {
            warn!(
                output = %self.name,
                transmission_id = %id,
                items_received = response.items_received,
                items_sent = lines.len(),
                "Partial response does not match transmission, retrying whole transmission"
            );
            self.report(&transmission, SendOutcome::PartiallyAccepted { received: response.items_received, accepted: response.items_accepted }, Some(206), None, elapsed);
            self.persist(transmission);
            return;
        }

        let outcome = SendOutcome::PartiallyAccepted {
            received: response.items_received,
            accepted: response.items_accepted,
        };
        self.report(&transmission, outcome, Some(206), None, elapsed);
        self.forget_stored(id);

        let (retriable, rejected): (Vec<&ItemError>, Vec<&ItemError>) = response
            .errors
            .iter()
            .filter(|item| item.index < lines.len())
            .partition(|item| is_retriable_status(item.status_code));

        for item in &rejected {
            warn!(
                output = %self.name,
                transmission_id = %id,
                index = item.index,
                status = item.status_code,
                message = %item.message,
                "Telemetry item rejected by ingestion endpoint, dropped"
            );
        }

        let retry_lines: Vec<&str> = retriable.iter().map(|item| lines[item.index].as_str()).collect();
        info!(
            output = %self.name,
            transmission_id = %id,
            accepted = response.items_accepted,
            retrying = retry_lines.len(),
            dropped = rejected.len(),
            "Transmission partially accepted"
        );

        // The retriable subset inherits the attempts already spent on it
        if let Some(retry) = self.serializer.serialize_lines(&retry_lines) {
            self.persist(retry.with_attempts(transmission.attempts()));
        }
    }
}

impl<C: IngestionClient + Sync> TransmissionOutput for NetworkOutput<C> {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "network_output_send",
        skip(self, transmission),
        fields(output = %self.name, transmission_id = %transmission.id())
    )]
    async fn send(&self, mut transmission: Transmission) -> Result<(), ContractError> {
        let mut instant_retries = 0;

        loop {
            transmission.record_attempt();
            let started = Instant::now();
            let result = self.client.post(&transmission).await;
            let elapsed = started.elapsed();

            match result {
                Ok(response) => {
                    self.handle_response(transmission, response, elapsed);
                    return Ok(());
                }
                Err(e) if instant_retries < self.max_instant_retries => {
                    instant_retries += 1;
                    debug!(
                        output = %self.name,
                        attempt = instant_retries,
                        error = %e,
                        "Transport error, retrying immediately"
                    );
                }
                Err(e) => {
                    warn!(
                        output = %self.name,
                        attempts = transmission.attempts(),
                        error = %e,
                        "Transport error, transmission kept for a later resend"
                    );
                    self.report(&transmission, SendOutcome::TransportError, None, None, elapsed);
                    self.persist(transmission);
                    return Ok(());
                }
            }
        }
    }

    async fn close(&self) -> Result<(), ContractError> {
        debug!(output = %self.name, "NetworkOutput closed");
        Ok(())
    }
}
