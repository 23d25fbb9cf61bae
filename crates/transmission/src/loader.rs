//! TransmissionsLoader - resubmits persisted transmissions

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use contracts::{LoaderConfig, PolicyState, TransmissionId};

use crate::dispatcher::{DispatchRoute, TransmissionDispatcher};
use crate::outputs::FileSystemOutput;
use crate::policy::TransmissionPolicyManager;

/// Result of one loader iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStep {
    Dispatched(TransmissionId, DispatchRoute),
    /// Nothing pending on disk
    Idle,
    /// Network sends suspended by the policy
    Suspended(PolicyState),
}

/// Background loop claiming the oldest stored transmission while the
/// policy allows network sends
pub struct TransmissionsLoader {
    storage: Arc<FileSystemOutput>,
    dispatcher: Arc<TransmissionDispatcher>,
    policy: Arc<TransmissionPolicyManager>,
    config: LoaderConfig,
}

impl TransmissionsLoader {
    pub fn new(
        storage: Arc<FileSystemOutput>,
        dispatcher: Arc<TransmissionDispatcher>,
        policy: Arc<TransmissionPolicyManager>,
        config: LoaderConfig,
    ) -> Self {
        Self {
            storage,
            dispatcher,
            policy,
            config,
        }
    }

    /// Claim and dispatch at most one stored transmission
    pub fn load_next(&self) -> LoadStep {
        let state = self.policy.current_state();
        if !state.allows_network() {
            return LoadStep::Suspended(state);
        }

        match self.storage.claim_oldest() {
            Some(transmission) => {
                let id = transmission.id();
                debug!(
                    transmission_id = %id,
                    attempts = transmission.attempts(),
                    "Resubmitting stored transmission"
                );
                let route = self.dispatcher.dispatch(transmission);
                if matches!(route, DispatchRoute::AlreadyInFlight | DispatchRoute::Dropped) {
                    // Nobody took ownership, put the file back for a later pass
                    self.storage.release_claim(id);
                }
                LoadStep::Dispatched(id, route)
            }
            None => LoadStep::Idle,
        }
    }

    fn pause_after(&self, step: LoadStep) -> Duration {
        match step {
            LoadStep::Dispatched(_, DispatchRoute::Network) => self.config.dispatch_interval(),
            _ => self.config.idle_interval(),
        }
    }

    /// Spawn the loop as a background task
    pub fn spawn(self) -> LoaderHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            self.run(shutdown_rx).await;
        });
        LoaderHandle { shutdown_tx, task }
    }

    #[instrument(name = "transmissions_loader_run", skip_all, fields(directory = %self.storage.directory().display()))]
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Transmissions loader started");
        let mut resubmitted: u64 = 0;

        loop {
            let step = self.load_next();
            if let LoadStep::Dispatched(id, route) = step {
                resubmitted += 1;
                if route != DispatchRoute::Network {
                    debug!(transmission_id = %id, route = ?route, "Stored transmission not sent to network");
                }
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(self.pause_after(step)) => {}
            }
        }

        info!(resubmitted, "Transmissions loader stopped");
    }
}

/// Handle to a running loader
pub struct LoaderHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl LoaderHandle {
    /// Signal the loop and wait up to `timeout` for it to finish
    pub async fn stop(self, timeout: Duration) {
        let _ = self.shutdown_tx.send(true);

        let abort = self.task.abort_handle();
        match tokio::time::timeout(timeout, self.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = ?e, "Loader task panicked"),
            Err(_) => {
                warn!("Loader did not stop before the deadline, aborting");
                abort.abort();
            }
        }
    }
}
