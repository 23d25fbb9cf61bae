//! Transmission metrics
//!
//! Records `telemetry_channel_*` metrics from network attempt outcomes and
//! keeps an in-memory aggregate for end-of-run summaries.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use contracts::{PolicyState, SendOutcome, TransmissionHandler, TransmissionHandlerArgs};
use metrics::{counter, gauge, histogram};

/// Record one network attempt
///
/// Called once per network send, after any instant retries on transport
/// errors have run out.
pub fn record_transmission_attempt(args: &TransmissionHandlerArgs<'_>) {
    let outcome = args.outcome.as_str();
    counter!("telemetry_channel_send_attempts_total", "outcome" => outcome).increment(1);

    histogram!("telemetry_channel_send_latency_ms", "outcome" => outcome)
        .record(args.elapsed.as_secs_f64() * 1000.0);

    histogram!("telemetry_channel_transmission_bytes").record(args.transmission.len() as f64);

    if let Some(code) = args.response_code {
        counter!(
            "telemetry_channel_responses_total",
            "status" => code.to_string()
        )
        .increment(1);
    }

    match args.outcome {
        SendOutcome::Delivered => {
            counter!("telemetry_channel_transmissions_delivered_total").increment(1);
        }
        SendOutcome::PartiallyAccepted { received, accepted } => {
            counter!("telemetry_channel_transmissions_delivered_total").increment(1);
            counter!("telemetry_channel_items_rejected_total")
                .increment(received.saturating_sub(accepted) as u64);
        }
        _ => {}
    }
}

/// Record the policy state as a gauge (0 = active, 1 = throttled, 2 = blocked)
pub fn record_policy_state(state: PolicyState) {
    let value = match state {
        PolicyState::Active => 0.0,
        PolicyState::Throttled => 1.0,
        PolicyState::Blocked => 2.0,
    };
    gauge!("telemetry_channel_policy_state").set(value);
}

/// Record the pending transmissions in the storage directory
pub fn record_storage_pending(files: usize, bytes: u64) {
    gauge!("telemetry_channel_storage_pending_files").set(files as f64);
    gauge!("telemetry_channel_storage_pending_bytes").set(bytes as f64);
}

/// `TransmissionHandler` feeding the `metrics` facade
///
/// Register it on the policy manager; with no recorder installed the calls
/// are no-ops.
#[derive(Debug, Default)]
pub struct TransmissionMetricsHandler {
    stats: Mutex<TransmissionStatsAggregator>,
}

impl TransmissionMetricsHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Summary of everything observed so far
    pub fn summary(&self) -> MetricsSummary {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .summary()
    }
}

impl TransmissionHandler for TransmissionMetricsHandler {
    fn on_transmission_sent(&self, args: &TransmissionHandlerArgs<'_>) {
        record_transmission_attempt(args);
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .update(args);
    }
}

/// In-memory aggregate of network attempts
#[derive(Debug, Clone, Default)]
pub struct TransmissionStatsAggregator {
    pub attempts: u64,
    pub delivered: u64,
    pub partially_accepted: u64,
    pub transport_errors: u64,
    pub items_rejected: u64,
    pub latency_stats: RunningStats,
    pub bytes_stats: RunningStats,
    /// Attempts per outcome label
    pub outcome_counts: BTreeMap<&'static str, u64>,
    /// Responses per HTTP status
    pub status_counts: BTreeMap<u16, u64>,
}

impl TransmissionStatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, args: &TransmissionHandlerArgs<'_>) {
        self.attempts += 1;
        *self.outcome_counts.entry(args.outcome.as_str()).or_insert(0) += 1;

        match args.outcome {
            SendOutcome::Delivered => self.delivered += 1,
            SendOutcome::PartiallyAccepted { received, accepted } => {
                self.partially_accepted += 1;
                self.items_rejected += received.saturating_sub(accepted) as u64;
            }
            SendOutcome::TransportError => self.transport_errors += 1,
            _ => {}
        }

        if let Some(code) = args.response_code {
            *self.status_counts.entry(code).or_insert(0) += 1;
        }

        self.latency_stats.push(args.elapsed.as_secs_f64() * 1000.0);
        self.bytes_stats.push(args.transmission.len() as f64);
    }

    pub fn summary(&self) -> MetricsSummary {
        let successful = self.delivered + self.partially_accepted;
        MetricsSummary {
            attempts: self.attempts,
            delivered: self.delivered,
            partially_accepted: self.partially_accepted,
            transport_errors: self.transport_errors,
            items_rejected: self.items_rejected,
            success_rate: if self.attempts > 0 {
                successful as f64 / self.attempts as f64 * 100.0
            } else {
                0.0
            },
            latency_ms: StatsSummary::from(&self.latency_stats),
            transmission_bytes: StatsSummary::from(&self.bytes_stats),
            status_counts: self.status_counts.clone(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Snapshot of the aggregated attempts
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub attempts: u64,
    pub delivered: u64,
    pub partially_accepted: u64,
    pub transport_errors: u64,
    pub items_rejected: u64,
    pub success_rate: f64,
    pub latency_ms: StatsSummary,
    pub transmission_bytes: StatsSummary,
    pub status_counts: BTreeMap<u16, u64>,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Transmission Summary ===")?;
        writeln!(
            f,
            "Attempts: {} ({:.2}% successful)",
            self.attempts, self.success_rate
        )?;
        writeln!(f, "Delivered: {}", self.delivered)?;
        writeln!(
            f,
            "Partially accepted: {} ({} items rejected)",
            self.partially_accepted, self.items_rejected
        )?;
        writeln!(f, "Transport errors: {}", self.transport_errors)?;
        writeln!(f, "Latency (ms): {}", self.latency_ms)?;
        writeln!(f, "Payload (bytes): {}", self.transmission_bytes)?;

        if !self.status_counts.is_empty() {
            writeln!(f, "Responses:")?;
            for (status, count) in &self.status_counts {
                writeln!(f, "  {}: {}", status, count)?;
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.1}, max={:.1}, mean={:.1}, std={:.1} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online mean/variance (Welford)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            self.m2 += delta * (value - self.mean);
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}
