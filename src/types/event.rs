//! Bus event type

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A subscriber that failed while handling an event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryFailure {
    pub subscriber: String,
    pub error: String,
}

/// An immutable fact broadcast on the bus.
///
/// `delivery_failures` is filled in by the bus before the event is stored;
/// once in the ring buffer the event is never modified.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    /// Monotonic publish sequence number
    pub sequence: u64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub source_component: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub delivery_failures: Vec<DeliveryFailure>,
}

impl Event {
    /// Service id carried in the payload, if any.
    pub fn service_id(&self) -> Option<&str> {
        self.payload.get("serviceId").and_then(|v| v.as_str())
    }

    pub fn is_partial_failure(&self) -> bool {
        !self.delivery_failures.is_empty()
    }
}

/// Subscriber count for one event type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EventTypeSummary {
    #[serde(rename = "type")]
    pub event_type: String,
    pub subscribers: usize,
}
