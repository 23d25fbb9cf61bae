//! TelemetryBuffer - producer-facing batch accumulator
//!
//! `add` only appends under a short lock. A batch leaves the buffer when it
//! reaches the size limit (`send_now`) or when the timer armed by its first
//! item fires (`schedule_send`). Each handed-over batch bumps the generation,
//! so a timer armed for an already flushed batch fetches nothing.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use metrics::counter;
use tracing::{debug, error, warn};

use contracts::{TelemetryItem, MAX_TELEMETRIES_IN_BATCH_LIMIT};

use crate::transmitter::{TelemetriesFetcher, TelemetriesTransmitter};

#[derive(Debug)]
struct BufferState {
    items: Vec<TelemetryItem>,
    generation: u64,
    max_telemetries_in_batch: usize,
    flush_interval: Duration,
}

impl BufferState {
    /// Hand out the current batch and start a new generation
    fn take_batch(&mut self) -> Vec<TelemetryItem> {
        self.generation += 1;
        std::mem::replace(
            &mut self.items,
            Vec::with_capacity(self.max_telemetries_in_batch),
        )
    }
}

type SharedState = Arc<Mutex<BufferState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, BufferState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clamp a requested batch limit into `[1, 1000]`
pub fn normalize_batch_limit(requested: usize) -> usize {
    let normalized = requested.clamp(1, MAX_TELEMETRIES_IN_BATCH_LIMIT);
    if normalized != requested {
        warn!(requested, normalized, "max_telemetries_in_batch out of range, adjusted");
    }
    normalized
}

/// Fetcher bound to one batch generation
struct GenerationFetcher {
    state: SharedState,
    generation: u64,
}

impl TelemetriesFetcher for GenerationFetcher {
    fn fetch(&self) -> Vec<TelemetryItem> {
        let mut state = lock(&self.state);
        if state.generation != self.generation {
            return Vec::new();
        }
        state.take_batch()
    }
}

pub struct TelemetryBuffer {
    state: SharedState,
    transmitter: Arc<dyn TelemetriesTransmitter>,
}

impl TelemetryBuffer {
    pub fn new(
        transmitter: Arc<dyn TelemetriesTransmitter>,
        max_telemetries_in_batch: usize,
        flush_interval: Duration,
    ) -> Self {
        let max_telemetries_in_batch = normalize_batch_limit(max_telemetries_in_batch);
        Self {
            state: Arc::new(Mutex::new(BufferState {
                items: Vec::with_capacity(max_telemetries_in_batch),
                generation: 0,
                max_telemetries_in_batch,
                flush_interval,
            })),
            transmitter,
        }
    }

    /// Append one item; never performs I/O
    pub fn add(&self, item: TelemetryItem) {
        let mut state = lock(&self.state);
        state.items.push(item);
        let size = state.items.len();

        if size >= state.max_telemetries_in_batch {
            let batch = state.take_batch();
            self.hand_over(batch);
        } else if size == 1 {
            let fetcher = GenerationFetcher {
                state: Arc::clone(&self.state),
                generation: state.generation,
            };
            if !self
                .transmitter
                .schedule_send(Box::new(fetcher), state.flush_interval)
            {
                error!("Transmitter rejected the flush timer; batch will leave on size or shutdown");
            }
        }
    }

    /// Send the current batch now if it holds anything
    pub fn flush(&self) {
        let mut state = lock(&self.state);
        if state.items.is_empty() {
            return;
        }
        let batch = state.take_batch();
        self.hand_over(batch);
    }

    fn hand_over(&self, batch: Vec<TelemetryItem>) {
        let count = batch.len();
        if self.transmitter.send_now(batch) {
            debug!(items = count, "Batch handed to transmitter");
        } else {
            error!(items = count, "Transmitter rejected batch, telemetry discarded");
            counter!("telemetry_channel_items_discarded_total").increment(count as u64);
        }
    }

    pub fn max_telemetries_in_batch(&self) -> usize {
        lock(&self.state).max_telemetries_in_batch
    }

    /// Change the batch limit; flushes if the current batch already reaches it
    pub fn set_max_telemetries_in_batch(&self, requested: usize) {
        let normalized = normalize_batch_limit(requested);
        let mut state = lock(&self.state);
        state.max_telemetries_in_batch = normalized;
        if !state.items.is_empty() && state.items.len() >= normalized {
            let batch = state.take_batch();
            self.hand_over(batch);
        }
    }

    pub fn flush_interval(&self) -> Duration {
        lock(&self.state).flush_interval
    }

    /// Change the flush timer; a shorter interval flushes what is pending
    pub fn set_flush_interval(&self, interval: Duration) {
        let mut state = lock(&self.state);
        let shrinks = interval < state.flush_interval;
        state.flush_interval = interval;
        if shrinks && !state.items.is_empty() {
            let batch = state.take_batch();
            self.hand_over(batch);
        }
    }

    /// Items waiting in the current batch
    pub fn len(&self) -> usize {
        lock(&self.state).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
