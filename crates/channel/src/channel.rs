//! TelemetryChannel - the facade producers talk to

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use metrics::counter;
use tokio::runtime::Handle;
use tracing::{debug, info, instrument, warn};

use contracts::{
    ChannelConfig, PolicyState, TelemetryItem, TransmissionHandler, TransmissionIdGenerator,
};
use transmission::{
    FileSystemOutput, GzipSerializer, HttpIngestionClient, IngestionClient, MetricsSnapshot,
    PipelineBuilder, StorageStatus, TransmissionPipeline, TransmissionPolicyManager,
};

use crate::buffer::TelemetryBuffer;
use crate::error::ChannelError;
use crate::transmitter::ChannelTransmitter;

/// Builder for creating a TelemetryChannel
pub struct TelemetryChannelBuilder {
    config: ChannelConfig,
    handlers: Vec<Arc<dyn TransmissionHandler>>,
}

impl TelemetryChannelBuilder {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            handlers: Vec::new(),
        }
    }

    /// Register an observer of network attempts
    pub fn with_handler(mut self, handler: Arc<dyn TransmissionHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Build and start the channel against the configured endpoint
    pub fn build(self) -> Result<TelemetryChannel, ChannelError> {
        let client = HttpIngestionClient::new(&self.config.network)?;
        self.build_with_client(client)
    }

    /// Build and start the channel with a custom transport
    #[instrument(name = "telemetry_channel_build", skip(self, client))]
    pub fn build_with_client<C>(self, client: C) -> Result<TelemetryChannel, ChannelError>
    where
        C: IngestionClient + Sync + 'static,
    {
        Handle::try_current().map_err(|e| ChannelError::NoRuntime(e.to_string()))?;
        if self.config.transmitter.max_pending_requests == 0 {
            return Err(ChannelError::invalid_config(
                "transmitter.max_pending_requests",
                "must be greater than 0",
            ));
        }

        let Self { config, handlers } = self;

        let policy = Arc::new(TransmissionPolicyManager::new(config.policy.clone()));
        for handler in handlers {
            policy.add_transmission_handler(handler);
        }

        let serializer = Arc::new(GzipSerializer::new(Arc::new(TransmissionIdGenerator::new())));
        let pipeline = PipelineBuilder::new(config.clone(), Arc::clone(&policy), Arc::clone(&serializer))
            .build_with_client(client);
        let storage = pipeline.storage().cloned();

        let transmitter = Arc::new(ChannelTransmitter::spawn(
            &config.transmitter,
            serializer,
            Arc::clone(pipeline.dispatcher()),
        )?);
        let buffer = TelemetryBuffer::new(
            transmitter.clone(),
            config.effective_max_telemetries_in_batch(),
            config.buffer.flush_interval(),
        );

        info!(
            developer_mode = config.developer_mode,
            max_telemetries_in_batch = buffer.max_telemetries_in_batch(),
            flush_interval_ms = config.buffer.flush_interval_ms,
            "Telemetry channel started"
        );

        Ok(TelemetryChannel {
            developer_mode: AtomicBool::new(config.developer_mode),
            config,
            buffer,
            transmitter,
            pipeline: Mutex::new(Some(pipeline)),
            policy,
            storage,
            stopped: AtomicBool::new(false),
        })
    }
}

/// Client-side telemetry channel
///
/// `submit` is cheap and callable from any thread; everything else runs on
/// the channel's workers.
pub struct TelemetryChannel {
    config: ChannelConfig,
    buffer: TelemetryBuffer,
    transmitter: Arc<ChannelTransmitter>,
    pipeline: Mutex<Option<TransmissionPipeline>>,
    policy: Arc<TransmissionPolicyManager>,
    storage: Option<Arc<FileSystemOutput>>,
    developer_mode: AtomicBool,
    stopped: AtomicBool,
}

impl TelemetryChannel {
    pub fn builder(config: ChannelConfig) -> TelemetryChannelBuilder {
        TelemetryChannelBuilder::new(config)
    }

    /// Build a channel posting to the configured endpoint
    pub fn new(config: ChannelConfig) -> Result<Self, ChannelError> {
        Self::builder(config).build()
    }

    /// Hand one item to the channel; never blocks on I/O, never fails
    pub fn submit(&self, item: TelemetryItem) {
        if self.stopped.load(Ordering::Acquire) {
            debug!(kind = %item.kind, "Channel stopped, telemetry ignored");
            counter!("telemetry_channel_items_discarded_total").increment(1);
            return;
        }
        counter!("telemetry_channel_items_submitted_total").increment(1);
        self.buffer.add(item);
    }

    /// Send whatever is buffered now
    pub fn flush(&self) {
        self.buffer.flush();
    }

    pub fn developer_mode(&self) -> bool {
        self.developer_mode.load(Ordering::Relaxed)
    }

    /// In developer mode every item is sent on its own, immediately
    pub fn set_developer_mode(&self, enabled: bool) {
        self.developer_mode.store(enabled, Ordering::Relaxed);
        let limit = if enabled {
            1
        } else {
            self.config.buffer.max_telemetries_in_batch
        };
        self.buffer.set_max_telemetries_in_batch(limit);
        info!(enabled, "Developer mode changed");
    }

    pub fn set_max_telemetries_in_batch(&self, limit: usize) {
        self.buffer.set_max_telemetries_in_batch(limit);
    }

    pub fn set_flush_interval(&self, interval: Duration) {
        self.buffer.set_flush_interval(interval);
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn policy(&self) -> &Arc<TransmissionPolicyManager> {
        &self.policy
    }

    pub fn policy_state(&self) -> PolicyState {
        self.policy.current_state()
    }

    pub fn add_transmission_handler(&self, handler: Arc<dyn TransmissionHandler>) {
        self.policy.add_transmission_handler(handler);
    }

    /// Pending files on disk; `None` when running without storage
    pub fn storage_status(&self) -> Option<StorageStatus> {
        let storage = self.storage.as_ref()?;
        match storage.status() {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(error = %e, "Failed to read storage status");
                None
            }
        }
    }

    /// Per-output counters; empty once stopped
    pub fn output_metrics(&self) -> Vec<(String, MetricsSnapshot)> {
        self.pipeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(TransmissionPipeline::metrics)
            .unwrap_or_default()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Flush, drain and shut down every stage within `timeout`
    ///
    /// Returns true when every batch was delivered or stored before the
    /// deadline. Later calls are no-ops.
    #[instrument(name = "telemetry_channel_stop", skip(self))]
    pub async fn stop(&self, timeout: Duration) -> bool {
        if self.stopped.swap(true, Ordering::AcqRel) {
            debug!("Telemetry channel already stopped");
            return true;
        }

        let started = Instant::now();
        let deadline = started + timeout;

        self.buffer.flush();
        let drained = self.transmitter.stop(remaining(deadline)).await;

        let pipeline = self
            .pipeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let lost = match pipeline {
            Some(pipeline) => pipeline.shutdown(remaining(deadline)).await,
            None => 0,
        };

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            drained,
            lost,
            "Telemetry channel stopped"
        );
        drained && lost == 0
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}
