//! TransmissionDispatcher - routes each transmission to network or disk

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::counter;
use tracing::{debug, error, info, instrument, warn};

use contracts::{ChannelConfig, Transmission};

use crate::error::TransmissionError;
use crate::handle::{OutputHandle, OutputSender};
use crate::in_flight::InFlightRegistry;
use crate::loader::{LoaderHandle, TransmissionsLoader};
use crate::metrics::MetricsSnapshot;
use crate::outputs::{
    FileSystemOutput, HttpIngestionClient, IngestionClient, NetworkOutput, StorageFallback,
};
use crate::policy::TransmissionPolicyManager;
use crate::serializer::GzipSerializer;

/// Where `dispatch` sent a transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchRoute {
    Network,
    FileSystem,
    /// Another attempt with the same id is running; that attempt owns it
    AlreadyInFlight,
    /// No output could take it
    Dropped,
}

/// Routes transmissions according to the policy state
pub struct TransmissionDispatcher {
    policy: Arc<TransmissionPolicyManager>,
    network: OutputSender,
    file_system: Option<OutputSender>,
    in_flight: InFlightRegistry,
}

impl TransmissionDispatcher {
    pub fn new(
        policy: Arc<TransmissionPolicyManager>,
        network: OutputSender,
        file_system: Option<OutputSender>,
    ) -> Self {
        Self {
            policy,
            network,
            file_system,
            in_flight: InFlightRegistry::new(),
        }
    }

    pub fn policy(&self) -> &Arc<TransmissionPolicyManager> {
        &self.policy
    }

    pub fn in_flight(&self) -> &InFlightRegistry {
        &self.in_flight
    }

    /// Whether a file system output exists
    pub fn has_storage(&self) -> bool {
        self.file_system.is_some()
    }

    /// Route one transmission without waiting for I/O
    #[instrument(
        name = "dispatcher_dispatch",
        skip(self, transmission),
        fields(transmission_id = %transmission.id(), bytes = transmission.len())
    )]
    pub fn dispatch(&self, transmission: Transmission) -> DispatchRoute {
        let state = self.policy.current_state();
        if !state.allows_network() {
            debug!(state = %state, "Network suspended, routing to disk");
            return self.to_file_system(transmission);
        }

        let Some(claim) = self.in_flight.try_claim(transmission.id()) else {
            debug!("Transmission already in flight, skipping duplicate");
            return DispatchRoute::AlreadyInFlight;
        };

        match self.network.try_send_claimed(transmission, claim) {
            Ok(()) => DispatchRoute::Network,
            Err(transmission) => {
                warn!(
                    transmission_id = %transmission.id(),
                    "Network queue full, routing to disk"
                );
                self.to_file_system(transmission)
            }
        }
    }

    fn to_file_system(&self, transmission: Transmission) -> DispatchRoute {
        let Some(file_system) = &self.file_system else {
            error!(
                transmission_id = %transmission.id(),
                "No durable storage available, transmission dropped"
            );
            counter!("telemetry_channel_transmissions_dropped_total", "reason" => "no_storage")
                .increment(1);
            return DispatchRoute::Dropped;
        };

        match file_system.try_send(transmission) {
            Ok(()) => DispatchRoute::FileSystem,
            Err(transmission) => {
                error!(
                    transmission_id = %transmission.id(),
                    "File system queue unavailable, transmission dropped"
                );
                counter!("telemetry_channel_transmissions_dropped_total", "reason" => "storage_queue")
                    .increment(1);
                DispatchRoute::Dropped
            }
        }
    }
}

/// Builder wiring outputs, dispatcher and loader together
pub struct PipelineBuilder {
    config: ChannelConfig,
    policy: Arc<TransmissionPolicyManager>,
    serializer: Arc<GzipSerializer>,
}

impl PipelineBuilder {
    pub fn new(
        config: ChannelConfig,
        policy: Arc<TransmissionPolicyManager>,
        serializer: Arc<GzipSerializer>,
    ) -> Self {
        Self {
            config,
            policy,
            serializer,
        }
    }

    /// Build with the HTTP client for the configured endpoint
    pub fn build(self) -> Result<TransmissionPipeline, TransmissionError> {
        let client = HttpIngestionClient::new(&self.config.network)?;
        Ok(self.build_with_client(client))
    }

    /// Build with a custom transport; must run inside a tokio runtime
    #[instrument(name = "pipeline_builder_build", skip(self, client))]
    pub fn build_with_client<C>(self, client: C) -> TransmissionPipeline
    where
        C: IngestionClient + Sync + 'static,
    {
        let Self {
            config,
            policy,
            serializer,
        } = self;

        let storage = match FileSystemOutput::new("file_system", &config.storage) {
            Ok(storage) => {
                if let Some(max) = storage.max_stored_id() {
                    serializer.ids().observe(max);
                }
                Some(Arc::new(storage))
            }
            Err(e) => {
                error!(error = %e, "Transmission storage unavailable, continuing with network-only delivery");
                None
            }
        };

        let file_system = storage
            .as_ref()
            .map(|storage| OutputHandle::spawn(Arc::clone(storage), 1, config.storage.queue_capacity));

        let fallback = storage
            .as_ref()
            .zip(file_system.as_ref())
            .map(|(storage, handle)| StorageFallback {
                sender: handle.sender(),
                storage: Arc::clone(storage),
            });

        let network_output = NetworkOutput::new(
            "network",
            client,
            Arc::clone(&policy),
            Arc::clone(&serializer),
            fallback,
            config.network.max_instant_retries,
        );
        let network = OutputHandle::spawn(
            Arc::new(network_output),
            config.network.max_concurrent_sends,
            config.network.queue_capacity,
        );

        let dispatcher = Arc::new(TransmissionDispatcher::new(
            Arc::clone(&policy),
            network.sender(),
            file_system.as_ref().map(OutputHandle::sender),
        ));

        let loader = storage.as_ref().map(|storage| {
            TransmissionsLoader::new(
                Arc::clone(storage),
                Arc::clone(&dispatcher),
                Arc::clone(&policy),
                config.loader.clone(),
            )
            .spawn()
        });

        info!(
            endpoint = %config.network.endpoint_url,
            storage = storage.is_some(),
            network_workers = config.network.max_concurrent_sends,
            "Transmission pipeline started"
        );

        TransmissionPipeline {
            dispatcher,
            policy,
            storage,
            network,
            file_system,
            loader,
        }
    }
}

/// Running outputs plus the dispatcher that feeds them
pub struct TransmissionPipeline {
    dispatcher: Arc<TransmissionDispatcher>,
    policy: Arc<TransmissionPolicyManager>,
    storage: Option<Arc<FileSystemOutput>>,
    network: OutputHandle,
    file_system: Option<OutputHandle>,
    loader: Option<LoaderHandle>,
}

impl TransmissionPipeline {
    pub fn dispatcher(&self) -> &Arc<TransmissionDispatcher> {
        &self.dispatcher
    }

    pub fn policy(&self) -> &Arc<TransmissionPolicyManager> {
        &self.policy
    }

    pub fn storage(&self) -> Option<&Arc<FileSystemOutput>> {
        self.storage.as_ref()
    }

    /// Get metrics for all outputs
    pub fn metrics(&self) -> Vec<(String, MetricsSnapshot)> {
        std::iter::once(&self.network)
            .chain(self.file_system.as_ref())
            .map(|h| (h.name().to_string(), h.metrics().snapshot()))
            .collect()
    }

    /// Stop the loader, drain the network output, then the file system
    /// output, all within `timeout`
    ///
    /// Transmissions still queued for the network at its deadline are moved
    /// to disk. Returns how many transmissions could not be kept.
    #[instrument(name = "pipeline_shutdown", skip(self))]
    pub async fn shutdown(self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;

        if let Some(loader) = self.loader {
            loader.stop(remaining(deadline)).await;
        }

        let network_metrics = Arc::clone(self.network.metrics());
        let leftovers = self.network.shutdown(remaining(deadline)).await;
        let interrupted = network_metrics.in_progress();
        if interrupted > 0 {
            warn!(interrupted, "Network sends cut off by the shutdown deadline");
        }
        let mut lost = interrupted;

        // Past the network deadline the disk queue would get no time to
        // drain, so leftovers are written directly
        lost += persist_or_count(self.storage.as_deref(), leftovers);

        if let Some(file_system) = self.file_system {
            let file_system_metrics = Arc::clone(file_system.metrics());
            let leftovers = file_system.shutdown(remaining(deadline)).await;
            lost += file_system_metrics.in_progress();
            lost += persist_or_count(self.storage.as_deref(), leftovers);
        }

        if lost > 0 {
            error!(lost, "Transmissions lost at shutdown");
            counter!("telemetry_channel_transmissions_dropped_total", "reason" => "shutdown")
                .increment(lost as u64);
        }
        info!("Transmission pipeline stopped");
        lost
    }
}

/// Persist `transmissions` synchronously, returning how many could not be stored
fn persist_or_count(storage: Option<&FileSystemOutput>, transmissions: Vec<Transmission>) -> usize {
    let Some(storage) = storage else {
        return transmissions.len();
    };
    transmissions
        .iter()
        .filter(|transmission| storage.persist(transmission).is_err())
        .count()
}

pub(crate) fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

/// Convenience function to build a pipeline for `config`
pub fn create_pipeline(
    config: ChannelConfig,
    policy: Arc<TransmissionPolicyManager>,
    serializer: Arc<GzipSerializer>,
) -> Result<TransmissionPipeline, TransmissionError> {
    PipelineBuilder::new(config, policy, serializer).build()
}
