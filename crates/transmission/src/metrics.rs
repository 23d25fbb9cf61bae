//! Output metrics for observability

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Metrics for a single output
#[derive(Debug, Default)]
pub struct OutputMetrics {
    /// Current queue length
    queue_len: AtomicUsize,
    /// Transmissions the output handled without error
    sent_count: AtomicU64,
    /// Transmissions the output returned an error for
    failure_count: AtomicU64,
    /// Transmissions refused because the queue was full or closed
    rejected_count: AtomicU64,
    /// Transmissions a worker is currently sending
    in_progress: AtomicUsize,
}

impl OutputMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current queue length
    pub fn queue_len(&self) -> usize {
        self.queue_len.load(Ordering::Relaxed)
    }

    /// Set current queue length
    pub fn set_queue_len(&self, len: usize) {
        self.queue_len.store(len, Ordering::Relaxed);
    }

    pub fn sent_count(&self) -> u64 {
        self.sent_count.load(Ordering::Relaxed)
    }

    pub fn inc_sent_count(&self) {
        self.sent_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    pub fn inc_failure_count(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected_count.load(Ordering::Relaxed)
    }

    pub fn inc_rejected_count(&self) {
        self.rejected_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Sends still running; after an aborted shutdown, the sends that were cut off
    pub fn in_progress(&self) -> usize {
        self.in_progress.load(Ordering::Relaxed)
    }

    pub(crate) fn start_send(&self) {
        self.in_progress.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn finish_send(&self) {
        self.in_progress.fetch_sub(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_len: self.queue_len(),
            sent_count: self.sent_count(),
            failure_count: self.failure_count(),
            rejected_count: self.rejected_count(),
            in_progress: self.in_progress(),
        }
    }
}

/// Snapshot of output metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub queue_len: usize,
    pub sent_count: u64,
    pub failure_count: u64,
    pub rejected_count: u64,
    pub in_progress: usize,
}
