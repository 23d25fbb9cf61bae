//! TelemetryItem - collaborator input
//!
//! The pipeline never looks inside an item beyond encoding it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single telemetry record produced by a collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryItem {
    /// Logical type tag (e.g. "Event", "Request")
    pub kind: String,

    /// Time the item was produced
    pub time: DateTime<Utc>,

    /// Arbitrary key/value properties
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl TelemetryItem {
    /// Create an item stamped with the current time
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            time: Utc::now(),
            properties: BTreeMap::new(),
        }
    }

    /// Builder-style property setter
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}
