//! Transmission - one serialized batch on its way to an output

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Content type of newline-delimited JSON payloads
pub const JSON_STREAM_CONTENT_TYPE: &str = "application/x-json-stream";

/// Content encoding of gzip-compressed payloads
pub const GZIP_CONTENT_ENCODING: &str = "gzip";

/// Identifier of a transmission, stable across persistence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransmissionId(u64);

impl TransmissionId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:020}", self.0)
    }
}

impl FromStr for TransmissionId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(Self)
    }
}

/// Serialized (and compressed) batch plus the metadata needed to send it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transmission {
    id: TransmissionId,
    /// Network attempts made so far (persisted with the payload)
    attempts: u32,
    content_type: String,
    content_encoding: String,
    content: Bytes,
}

impl Transmission {
    /// Create a fresh transmission that has never been sent
    pub fn new(
        id: TransmissionId,
        content: impl Into<Bytes>,
        content_type: impl Into<String>,
        content_encoding: impl Into<String>,
    ) -> Self {
        Self {
            id,
            attempts: 0,
            content_type: content_type.into(),
            content_encoding: content_encoding.into(),
            content: content.into(),
        }
    }

    pub fn id(&self) -> TransmissionId {
        self.id
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn content_encoding(&self) -> &str {
        &self.content_encoding
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Carry over attempts already spent on the same payload
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Count one more network attempt
    pub fn record_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }
}

/// Process-scoped source of strictly increasing transmission ids
///
/// Seeded from the wall clock (microseconds) so ids from a previous run that are
/// still on disk do not collide; `observe` raises the floor above any such id.
#[derive(Debug)]
pub struct TransmissionIdGenerator {
    next: AtomicU64,
}

impl TransmissionIdGenerator {
    pub fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(1);
        Self::starting_at(seed)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Allocate the next id
    pub fn next_id(&self) -> TransmissionId {
        TransmissionId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Make sure future ids are greater than `existing`
    pub fn observe(&self, existing: TransmissionId) {
        self.next.fetch_max(existing.0.saturating_add(1), Ordering::Relaxed);
    }
}

impl Default for TransmissionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
