//! TransmissionPolicyManager - network suspension state machine
//!
//! `Active -> Throttled -> Active` on timer expiry and
//! `Active|Throttled -> Blocked -> Active`. Expiry is evaluated lazily when
//! the state is read, so there is no background timer.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use contracts::{PolicyConfig, PolicyState, SendOutcome, TransmissionHandler, TransmissionHandlerArgs};

/// Largest doubling exponent of the backoff schedule
const MAX_BACKOFF_EXPONENT: u32 = 16;

#[derive(Debug, Default)]
struct PolicyInner {
    state: PolicyState,
    suspended_until: Option<Instant>,
    backoff_step: u32,
}

impl PolicyInner {
    fn expire(&mut self, now: Instant) {
        if let Some(until) = self.suspended_until {
            if now >= until {
                debug!(from = %self.state, "Suspension window elapsed, resuming network sends");
                self.state = PolicyState::Active;
                self.suspended_until = None;
            }
        }
    }
}

/// Shared by the dispatcher, the network output and the loader
pub struct TransmissionPolicyManager {
    config: PolicyConfig,
    inner: Mutex<PolicyInner>,
    handlers: RwLock<Vec<Arc<dyn TransmissionHandler>>>,
}

impl TransmissionPolicyManager {
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(PolicyInner::default()),
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, PolicyInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state, after applying any elapsed window
    pub fn current_state(&self) -> PolicyState {
        let mut inner = self.lock();
        inner.expire(Instant::now());
        inner.state
    }

    /// End of the running suspension, if any
    pub fn suspended_until(&self) -> Option<Instant> {
        let mut inner = self.lock();
        inner.expire(Instant::now());
        inner.suspended_until
    }

    /// Suspend network sends for `duration`
    ///
    /// Returns whether the request changed anything: a suspension only
    /// replaces the running one if it ends later, and a running `Blocked` is
    /// never downgraded to `Throttled`.
    pub fn suspend(&self, state: PolicyState, duration: Duration) -> bool {
        let mut inner = self.lock();
        self.suspend_locked(&mut inner, state, duration)
    }

    fn suspend_locked(&self, inner: &mut PolicyInner, state: PolicyState, duration: Duration) -> bool {
        if !self.config.throttling_enabled || state == PolicyState::Active || duration.is_zero() {
            return false;
        }

        let now = Instant::now();
        inner.expire(now);
        let until = now + duration;

        let (next_state, next_until) = match (inner.state, inner.suspended_until) {
            (PolicyState::Active, _) | (_, None) => (state, until),
            (PolicyState::Blocked, Some(current)) if state == PolicyState::Throttled => {
                if until <= current {
                    return false;
                }
                // Blocked stays in charge until it runs out
                (PolicyState::Blocked, until)
            }
            (current_state, Some(current)) => {
                if state == current_state && until <= current {
                    return false;
                }
                (state, until.max(current))
            }
        };

        inner.state = next_state;
        inner.suspended_until = Some(next_until);
        info!(
            state = %next_state,
            duration_ms = next_until.saturating_duration_since(now).as_millis() as u64,
            "Network sends suspended"
        );
        true
    }

    /// Throttle for the next step of the exponential schedule
    pub fn backoff(&self) -> Duration {
        let mut inner = self.lock();
        let step = inner.backoff_step;
        inner.backoff_step = (step + 1).min(MAX_BACKOFF_EXPONENT);

        let delay = self
            .config
            .backoff_base()
            .saturating_mul(1u32 << step)
            .min(self.config.backoff_max());
        debug!(step, delay_ms = delay.as_millis() as u64, "Backing off network sends");
        self.suspend_locked(&mut inner, PolicyState::Throttled, delay);
        delay
    }

    /// Reset the backoff schedule after a success
    pub fn clear_backoff(&self) {
        self.lock().backoff_step = 0;
    }

    /// Register an observer notified after each network attempt
    pub fn add_transmission_handler(&self, handler: Arc<dyn TransmissionHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    /// Apply state transitions for `args`, then notify observers
    pub fn on_transmission_sent(&self, args: &TransmissionHandlerArgs<'_>) {
        self.apply_outcome(args);

        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        for handler in handlers.iter() {
            handler.on_transmission_sent(args);
        }
    }

    fn apply_outcome(&self, args: &TransmissionHandlerArgs<'_>) {
        match args.outcome {
            SendOutcome::Delivered | SendOutcome::PartiallyAccepted { .. } => self.clear_backoff(),
            SendOutcome::Throttled => {
                let window = args.retry_after.unwrap_or_else(|| self.config.default_throttle());
                self.suspend(PolicyState::Throttled, window);
            }
            SendOutcome::QuotaExceeded => {
                let window = args.retry_after.unwrap_or_else(|| self.config.quota_block());
                self.suspend(PolicyState::Blocked, window);
            }
            // Failures without a server-given window back off so stored
            // copies do not burn their retry budget in a tight loop
            SendOutcome::TransportError | SendOutcome::CredentialsRejected | SendOutcome::Rejected => {
                self.backoff();
            }
        }
    }
}

impl std::fmt::Debug for TransmissionPolicyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransmissionPolicyManager")
            .field("config", &self.config)
            .field("inner", &*self.lock())
            .finish_non_exhaustive()
    }
}
