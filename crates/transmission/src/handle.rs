//! OutputHandle - runs an output as an active object (queue + worker pool)

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender, TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use contracts::{Transmission, TransmissionOutput};

use crate::in_flight::InFlightClaim;
use crate::metrics::OutputMetrics;

/// Queue entry: the transmission plus the in-flight claim it travels with
#[derive(Debug)]
pub(crate) struct Queued {
    transmission: Transmission,
    claim: Option<InFlightClaim>,
}

/// Cloneable producer side of an output queue
#[derive(Clone)]
pub struct OutputSender {
    name: Arc<str>,
    tx: Sender<Queued>,
    metrics: Arc<OutputMetrics>,
}

impl OutputSender {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> &Arc<OutputMetrics> {
        &self.metrics
    }

    /// Enqueue without waiting; the transmission comes back when the queue is
    /// full or closed
    pub fn try_send(&self, transmission: Transmission) -> Result<(), Transmission> {
        self.enqueue(Queued {
            transmission,
            claim: None,
        })
    }

    /// Enqueue a transmission whose in-flight claim is released once the
    /// output is done with it
    pub(crate) fn try_send_claimed(
        &self,
        transmission: Transmission,
        claim: InFlightClaim,
    ) -> Result<(), Transmission> {
        self.enqueue(Queued {
            transmission,
            claim: Some(claim),
        })
    }

    fn enqueue(&self, queued: Queued) -> Result<(), Transmission> {
        match self.tx.try_send(queued) {
            Ok(()) => {
                self.metrics.set_queue_len(self.tx.len());
                Ok(())
            }
            Err(TrySendError::Full(q)) => {
                self.metrics.inc_rejected_count();
                debug!(
                    output = %self.name,
                    transmission_id = %q.transmission.id(),
                    "Output queue full"
                );
                Err(q.transmission)
            }
            Err(TrySendError::Closed(q)) => {
                self.metrics.inc_rejected_count();
                debug!(
                    output = %self.name,
                    transmission_id = %q.transmission.id(),
                    "Output queue closed"
                );
                Err(q.transmission)
            }
        }
    }
}

/// Handle to a running output and its workers
pub struct OutputHandle {
    sender: OutputSender,
    rx: Receiver<Queued>,
    workers: Vec<JoinHandle<()>>,
}

impl OutputHandle {
    /// Spawn `workers` tasks draining a queue of `queue_capacity` entries
    pub fn spawn<O>(output: Arc<O>, workers: usize, queue_capacity: usize) -> Self
    where
        O: TransmissionOutput + Sync + 'static,
    {
        let name: Arc<str> = Arc::from(output.name());
        let (tx, rx) = async_channel::bounded(queue_capacity.max(1));
        let metrics = Arc::new(OutputMetrics::new());

        let worker_count = workers.max(1);
        let remaining = Arc::new(AtomicUsize::new(worker_count));
        let workers = (0..worker_count)
            .map(|worker| {
                let output = Arc::clone(&output);
                let rx = rx.clone();
                let metrics = Arc::clone(&metrics);
                let remaining = Arc::clone(&remaining);
                let name = name.to_string();
                tokio::spawn(async move {
                    output_worker(output, rx, metrics, remaining, name, worker).await;
                })
            })
            .collect();

        Self {
            sender: OutputSender { name, tx, metrics },
            rx,
            workers,
        }
    }

    pub fn name(&self) -> &str {
        self.sender.name()
    }

    pub fn metrics(&self) -> &Arc<OutputMetrics> {
        self.sender.metrics()
    }

    pub fn sender(&self) -> OutputSender {
        self.sender.clone()
    }

    /// Close the queue and wait up to `timeout` for the workers to drain it
    ///
    /// Workers still running at the deadline are aborted. Transmissions that
    /// never reached a worker are returned to the caller.
    #[instrument(name = "output_handle_shutdown", skip(self), fields(output = %self.sender.name))]
    pub async fn shutdown(self, timeout: Duration) -> Vec<Transmission> {
        self.sender.tx.close();

        let workers = self.workers;
        let aborts: Vec<_> = workers.iter().map(JoinHandle::abort_handle).collect();
        let name = Arc::clone(&self.sender.name);
        let join_all = async move {
            for worker in workers {
                if let Err(e) = worker.await {
                    error!(output = %name, error = ?e, "Worker task panicked");
                }
            }
        };

        if tokio::time::timeout(timeout, join_all).await.is_err() {
            warn!(
                output = %self.sender.name,
                timeout_ms = timeout.as_millis() as u64,
                "Output did not drain before the deadline, aborting workers"
            );
            for abort in aborts {
                abort.abort();
            }
        }

        let mut leftovers = Vec::new();
        while let Ok(queued) = self.rx.try_recv() {
            leftovers.push(queued.transmission);
        }
        self.sender.metrics.set_queue_len(0);

        debug!(
            output = %self.sender.name,
            leftovers = leftovers.len(),
            "OutputHandle shutdown complete"
        );
        leftovers
    }
}

/// Worker task that consumes transmissions and hands them to the output
#[instrument(
    name = "output_worker_loop",
    skip(output, rx, metrics, remaining),
    fields(output = %name)
)]
async fn output_worker<O: TransmissionOutput>(
    output: Arc<O>,
    rx: Receiver<Queued>,
    metrics: Arc<OutputMetrics>,
    remaining: Arc<AtomicUsize>,
    name: String,
    worker: usize,
) {
    debug!(output = %name, worker, "Output worker started");

    while let Ok(Queued {
        transmission,
        claim,
    }) = rx.recv().await
    {
        metrics.set_queue_len(rx.len());
        let id = transmission.id();

        metrics.start_send();
        let result = output.send(transmission).await;
        metrics.finish_send();
        match result {
            Ok(()) => metrics.inc_sent_count(),
            Err(e) => {
                metrics.inc_failure_count();
                error!(
                    output = %name,
                    transmission_id = %id,
                    error = %e,
                    "Send failed"
                );
            }
        }

        drop(claim);
    }

    // Last worker out closes the output
    if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
        if let Err(e) = output.close().await {
            error!(output = %name, error = %e, "Close failed on shutdown");
        }
    }

    debug!(output = %name, worker, "Output worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ContractError, TransmissionId, GZIP_CONTENT_ENCODING, JSON_STREAM_CONTENT_TYPE};
    use std::sync::atomic::{AtomicBool, AtomicU64};
    use tokio::time::sleep;

    use crate::in_flight::InFlightRegistry;

    /// Mock output for testing
    struct MockOutput {
        name: String,
        sent: Arc<AtomicU64>,
        closed: Arc<AtomicBool>,
        should_fail: bool,
        delay_ms: u64,
    }

    impl MockOutput {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                sent: Arc::new(AtomicU64::new(0)),
                closed: Arc::new(AtomicBool::new(false)),
                should_fail: false,
                delay_ms: 0,
            }
        }
    }

    impl TransmissionOutput for MockOutput {
        fn name(&self) -> &str {
            &self.name
        }

        async fn send(&self, _transmission: Transmission) -> Result<(), ContractError> {
            if self.delay_ms > 0 {
                sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if self.should_fail {
                return Err(ContractError::output_send(&self.name, "mock failure"));
            }
            self.sent.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        async fn close(&self) -> Result<(), ContractError> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    fn transmission(id: u64) -> Transmission {
        Transmission::new(
            TransmissionId::new(id),
            vec![0u8; 8],
            JSON_STREAM_CONTENT_TYPE,
            GZIP_CONTENT_ENCODING,
        )
    }

    #[tokio::test]
    async fn test_output_handle_basic() {
        let output = MockOutput::new("test");
        let sent = Arc::clone(&output.sent);
        let closed = Arc::clone(&output.closed);

        let handle = OutputHandle::spawn(Arc::new(output), 2, 10);
        let sender = handle.sender();
        for i in 0..5 {
            assert!(sender.try_send(transmission(i)).is_ok());
        }

        let leftovers = handle.shutdown(Duration::from_secs(1)).await;
        assert!(leftovers.is_empty());
        assert_eq!(sent.load(Ordering::Relaxed), 5);
        assert!(closed.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn test_output_handle_queue_full_returns_transmission() {
        let mut output = MockOutput::new("slow");
        output.delay_ms = 100;

        let handle = OutputHandle::spawn(Arc::new(output), 1, 2);
        let sender = handle.sender();

        let mut refused = Vec::new();
        for i in 0..10 {
            if let Err(t) = sender.try_send(transmission(i)) {
                refused.push(t.id());
            }
        }

        assert!(!refused.is_empty());
        assert_eq!(handle.metrics().rejected_count(), refused.len() as u64);

        handle.shutdown(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_output_handle_failure_isolation() {
        let mut output = MockOutput::new("failing");
        output.should_fail = true;

        let handle = OutputHandle::spawn(Arc::new(output), 1, 10);
        let sender = handle.sender();
        for i in 0..3 {
            let _ = sender.try_send(transmission(i));
        }

        // Give worker time to process
        sleep(Duration::from_millis(50)).await;

        assert_eq!(handle.metrics().failure_count(), 3);
        handle.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_shutdown_deadline_returns_leftovers() {
        let mut output = MockOutput::new("stuck");
        output.delay_ms = 10_000;

        let handle = OutputHandle::spawn(Arc::new(output), 1, 10);
        let metrics = Arc::clone(handle.metrics());
        let sender = handle.sender();
        for i in 0..4 {
            let _ = sender.try_send(transmission(i));
        }
        sleep(Duration::from_millis(20)).await;

        let started = std::time::Instant::now();
        let leftovers = handle.shutdown(Duration::from_millis(100)).await;

        assert!(started.elapsed() < Duration::from_secs(2));
        // One transmission was inside the aborted worker, the rest never left the queue
        assert_eq!(leftovers.len(), 3);
        assert_eq!(metrics.in_progress(), 1);
    }

    #[tokio::test]
    async fn test_send_after_shutdown_is_refused() {
        let handle = OutputHandle::spawn(Arc::new(MockOutput::new("closed")), 1, 4);
        let sender = handle.sender();
        handle.shutdown(Duration::from_secs(1)).await;

        assert!(sender.try_send(transmission(1)).is_err());
    }

    #[tokio::test]
    async fn test_claim_released_after_send() {
        let registry = InFlightRegistry::new();
        let handle = OutputHandle::spawn(Arc::new(MockOutput::new("claims")), 1, 4);

        let claim = registry.try_claim(TransmissionId::new(9)).unwrap();
        handle
            .sender()
            .try_send_claimed(transmission(9), claim)
            .unwrap();

        handle.shutdown(Duration::from_secs(1)).await;
        assert!(!registry.is_in_flight(TransmissionId::new(9)));
    }
}
