//! Channel configuration contracts
//!
//! Owned by the host application and passed in as a struct; every field has a
//! default so partial configuration files are accepted.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default ingestion endpoint
pub const DEFAULT_ENDPOINT_URL: &str = "https://dc.services.visualstudio.com/v2/track";

/// Upper bound for `max_telemetries_in_batch`
pub const MAX_TELEMETRIES_IN_BATCH_LIMIT: usize = 1000;

/// Upper bound (exclusive) for `max_instant_retries`
pub const MAX_INSTANT_RETRIES_LIMIT: u32 = 10;

/// Top-level channel configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Developer mode: every submitted item is sent immediately
    #[serde(default)]
    pub developer_mode: bool,

    #[serde(default)]
    pub buffer: BufferConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub loader: LoaderConfig,

    #[serde(default)]
    pub transmitter: TransmitterConfig,
}

impl ChannelConfig {
    /// Batch limit after applying developer mode
    pub fn effective_max_telemetries_in_batch(&self) -> usize {
        if self.developer_mode {
            1
        } else {
            self.buffer.max_telemetries_in_batch
        }
    }
}

/// Telemetry buffer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Items per batch before an immediate flush
    #[serde(default = "default_max_telemetries_in_batch")]
    pub max_telemetries_in_batch: usize,

    /// Flush timer, started by the first item of a batch
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

impl BufferConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_telemetries_in_batch: default_max_telemetries_in_batch(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

fn default_max_telemetries_in_batch() -> usize {
    128
}

fn default_flush_interval_ms() -> u64 {
    10_000
}

/// Network output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Ingestion endpoint
    #[serde(default = "default_endpoint_url")]
    pub endpoint_url: String,

    /// Per-request timeout
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Concurrent HTTP requests (network worker count)
    #[serde(default = "default_max_concurrent_sends")]
    pub max_concurrent_sends: usize,

    /// Pending transmissions waiting for a network worker
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Immediate re-attempts after a transport error
    #[serde(default = "default_max_instant_retries")]
    pub max_instant_retries: u32,
}

impl NetworkConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            endpoint_url: default_endpoint_url(),
            request_timeout_ms: default_request_timeout_ms(),
            max_concurrent_sends: default_max_concurrent_sends(),
            queue_capacity: default_queue_capacity(),
            max_instant_retries: default_max_instant_retries(),
        }
    }
}

fn default_endpoint_url() -> String {
    DEFAULT_ENDPOINT_URL.to_string()
}

fn default_request_timeout_ms() -> u64 {
    60_000
}

fn default_max_concurrent_sends() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    256
}

fn default_max_instant_retries() -> u32 {
    3
}

/// File system output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage directory (None = `<temp>/transmissions`)
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Size budget of the storage directory in bytes
    #[serde(default = "default_max_transmission_storage_capacity")]
    pub max_transmission_storage_capacity: u64,

    /// Pending transmissions waiting for the disk worker
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Network attempts after which a persisted transmission is discarded
    #[serde(default = "default_max_send_attempts")]
    pub max_send_attempts: u32,
}

impl StorageConfig {
    /// Resolve the storage directory
    pub fn resolved_directory(&self) -> PathBuf {
        self.directory
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("transmissions"))
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: None,
            max_transmission_storage_capacity: default_max_transmission_storage_capacity(),
            queue_capacity: default_queue_capacity(),
            max_send_attempts: default_max_send_attempts(),
        }
    }
}

fn default_max_transmission_storage_capacity() -> u64 {
    10 * 1024 * 1024
}

fn default_max_send_attempts() -> u32 {
    100
}

/// Transmission policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// When false the policy never leaves `Active`
    #[serde(default = "default_true")]
    pub throttling_enabled: bool,

    /// Throttle window when the server gives no `Retry-After`
    #[serde(default = "default_throttle_ms")]
    pub default_throttle_ms: u64,

    /// Block window for quota errors without `Retry-After`
    #[serde(default = "default_quota_block_ms")]
    pub quota_block_ms: u64,

    /// First step of the transport-error backoff
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Backoff ceiling
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl PolicyConfig {
    pub fn default_throttle(&self) -> Duration {
        Duration::from_millis(self.default_throttle_ms)
    }

    pub fn quota_block(&self) -> Duration {
        Duration::from_millis(self.quota_block_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            throttling_enabled: true,
            default_throttle_ms: default_throttle_ms(),
            quota_block_ms: default_quota_block_ms(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_throttle_ms() -> u64 {
    60_000
}

fn default_quota_block_ms() -> u64 {
    3_600_000
}

fn default_backoff_base_ms() -> u64 {
    5_000
}

fn default_backoff_max_ms() -> u64 {
    300_000
}

/// Transmissions loader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Pause when no persisted transmission is pending (or network suppressed)
    #[serde(default = "default_idle_interval_ms")]
    pub idle_interval_ms: u64,

    /// Pause after each resubmission
    #[serde(default = "default_dispatch_interval_ms")]
    pub dispatch_interval_ms: u64,
}

impl LoaderConfig {
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            idle_interval_ms: default_idle_interval_ms(),
            dispatch_interval_ms: default_dispatch_interval_ms(),
        }
    }
}

fn default_idle_interval_ms() -> u64 {
    2_000
}

fn default_dispatch_interval_ms() -> u64 {
    100
}

/// Transmitter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransmitterConfig {
    /// Channel workers running fetch/serialize/dispatch
    #[serde(default = "default_transmitter_workers")]
    pub workers: usize,

    /// Pending send requests before new ones are rejected
    #[serde(default = "default_max_pending_requests")]
    pub max_pending_requests: usize,
}

impl Default for TransmitterConfig {
    fn default() -> Self {
        Self {
            workers: default_transmitter_workers(),
            max_pending_requests: default_max_pending_requests(),
        }
    }
}

fn default_transmitter_workers() -> usize {
    2
}

fn default_max_pending_requests() -> usize {
    16384
}
