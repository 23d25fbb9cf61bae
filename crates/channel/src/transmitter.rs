//! Transmitter - fetch, serialize and dispatch on dedicated channel workers

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_channel::{Receiver, Sender, TrySendError};
use tokio::runtime::Handle;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use contracts::{TelemetryItem, TransmitterConfig};
use transmission::{GzipSerializer, TransmissionDispatcher};

use crate::error::ChannelError;

/// Deferred source of a batch, called when a scheduled send fires
pub trait TelemetriesFetcher: Send {
    fn fetch(&self) -> Vec<TelemetryItem>;
}

/// Entry points the buffer uses to hand batches over
pub trait TelemetriesTransmitter: Send + Sync {
    /// Fetch a batch after `delay`; false when the request was not accepted
    fn schedule_send(&self, fetcher: Box<dyn TelemetriesFetcher>, delay: Duration) -> bool;

    /// Send a batch as soon as a worker is free; false when not accepted
    fn send_now(&self, telemetries: Vec<TelemetryItem>) -> bool;
}

enum SendRequest {
    Now(Vec<TelemetryItem>),
    Fetch(Box<dyn TelemetriesFetcher>),
}

/// Worker-pool transmitter
pub struct ChannelTransmitter {
    requests: Sender<SendRequest>,
    scheduled: Arc<Semaphore>,
    runtime: Handle,
    shutdown: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl ChannelTransmitter {
    /// Spawn the workers on the current tokio runtime
    pub fn spawn(
        config: &TransmitterConfig,
        serializer: Arc<GzipSerializer>,
        dispatcher: Arc<TransmissionDispatcher>,
    ) -> Result<Self, ChannelError> {
        let runtime = Handle::try_current().map_err(|e| ChannelError::NoRuntime(e.to_string()))?;
        if config.max_pending_requests == 0 {
            return Err(ChannelError::invalid_config(
                "transmitter.max_pending_requests",
                "must be greater than 0",
            ));
        }

        let (requests, rx) = async_channel::bounded(config.max_pending_requests);
        let (shutdown, _) = watch::channel(false);

        let workers = (0..config.workers.max(1))
            .map(|worker| {
                let rx = rx.clone();
                let serializer = Arc::clone(&serializer);
                let dispatcher = Arc::clone(&dispatcher);
                runtime.spawn(async move {
                    transmitter_worker(rx, serializer, dispatcher, worker).await;
                })
            })
            .collect();

        Ok(Self {
            requests,
            scheduled: Arc::new(Semaphore::new(config.max_pending_requests)),
            runtime,
            shutdown,
            workers: Mutex::new(workers),
            stopped: AtomicBool::new(false),
        })
    }

    /// Requests waiting for a worker
    pub fn pending(&self) -> usize {
        self.requests.len()
    }

    /// Stop accepting requests and drain the queue within `timeout`
    ///
    /// Returns false when the workers had to be aborted.
    #[instrument(name = "transmitter_stop", skip(self))]
    pub async fn stop(&self, timeout: Duration) -> bool {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return true;
        }

        self.shutdown.send_replace(true);
        self.requests.close();

        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        let aborts: Vec<_> = workers.iter().map(JoinHandle::abort_handle).collect();
        let join_all = async move {
            for worker in workers {
                if let Err(e) = worker.await {
                    error!(error = ?e, "Transmitter worker panicked");
                }
            }
        };

        match tokio::time::timeout(timeout, join_all).await {
            Ok(()) => {
                debug!("Transmitter drained");
                true
            }
            Err(_) => {
                warn!(
                    pending = self.requests.len(),
                    "Transmitter did not drain before the deadline, aborting workers"
                );
                for abort in aborts {
                    abort.abort();
                }
                false
            }
        }
    }
}

impl TelemetriesTransmitter for ChannelTransmitter {
    fn schedule_send(&self, fetcher: Box<dyn TelemetriesFetcher>, delay: Duration) -> bool {
        if self.stopped.load(Ordering::Acquire) {
            return false;
        }
        let Ok(permit) = Arc::clone(&self.scheduled).try_acquire_owned() else {
            warn!("Too many scheduled sends pending, request rejected");
            return false;
        };

        let requests = self.requests.clone();
        let mut shutdown = self.shutdown.subscribe();
        self.runtime.spawn(async move {
            let _permit = permit;
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                // The final flush at shutdown supersedes the timer
                _ = shutdown.changed() => return,
            }
            if requests.send(SendRequest::Fetch(fetcher)).await.is_err() {
                debug!("Transmitter stopped, scheduled send skipped");
            }
        });
        true
    }

    fn send_now(&self, telemetries: Vec<TelemetryItem>) -> bool {
        match self.requests.try_send(SendRequest::Now(telemetries)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Transmitter queue full, batch rejected");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Transmitter stopped, batch rejected");
                false
            }
        }
    }
}

#[instrument(name = "transmitter_worker_loop", skip(rx, serializer, dispatcher))]
async fn transmitter_worker(
    rx: Receiver<SendRequest>,
    serializer: Arc<GzipSerializer>,
    dispatcher: Arc<TransmissionDispatcher>,
    worker: usize,
) {
    debug!(worker, "Transmitter worker started");

    while let Ok(request) = rx.recv().await {
        let telemetries = match request {
            SendRequest::Now(telemetries) => telemetries,
            SendRequest::Fetch(fetcher) => fetcher.fetch(),
        };
        if telemetries.is_empty() {
            continue;
        }

        let count = telemetries.len();
        match serializer.serialize(&telemetries) {
            Some(transmission) => {
                let route = dispatcher.dispatch(transmission);
                debug!(items = count, route = ?route, "Batch dispatched");
            }
            None => warn!(items = count, "Batch produced no transmission"),
        }
    }

    debug!(worker, "Transmitter worker stopped");
}
