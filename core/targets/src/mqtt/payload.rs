//! JSON documents published to the broker.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use scalesync_common::Measurement;

/// Timestamp layout used in every message, e.g. `2024-01-05T08:00+0100`.
pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M%z";

/// Literal payload of a clear message.
pub const CLEAR_PAYLOAD: &[u8] = b"true";

/// Format an instant in the publisher's zone.
pub fn format_timestamp(timestamp: DateTime<Utc>, zone: &FixedOffset) -> String {
    timestamp.with_timezone(zone).format(DATE_FORMAT).to_string()
}

/// Topic names derived from a prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topics {
    pub insert: String,
    pub update: String,
    pub delete: String,
    pub clear: String,
}

impl Topics {
    pub fn with_prefix(prefix: &str) -> Self {
        let prefix = prefix.trim_end_matches('/');
        Self {
            insert: format!("{}/insert", prefix),
            update: format!("{}/update", prefix),
            delete: format!("{}/delete", prefix),
            clear: format!("{}/clear", prefix),
        }
    }
}

/// Insert and update payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementMessage {
    pub id: Option<i64>,
    pub date: String,
    pub weight: f64,
    pub fat: f64,
    pub water: f64,
    pub muscle: f64,
}

impl MeasurementMessage {
    pub fn new(measurement: &Measurement, zone: &FixedOffset) -> Self {
        Self {
            id: measurement.id.map(|id| id.value()),
            date: format_timestamp(measurement.timestamp, zone),
            weight: measurement.weight,
            fat: measurement.fat,
            water: measurement.water,
            muscle: measurement.muscle,
        }
    }
}

/// Delete payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteMessage {
    #[serde(rename = "dateTime")]
    pub date_time: String,
}

impl DeleteMessage {
    pub fn new(timestamp: DateTime<Utc>, zone: &FixedOffset) -> Self {
        Self {
            date_time: format_timestamp(timestamp, zone),
        }
    }
}

/// Retained announcement describing what this publisher sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryMessage {
    pub name: String,
    pub version: String,
    pub date_format: String,
    pub topics: Topics,
}

impl DiscoveryMessage {
    pub fn new(name: &str, topics: &Topics) -> Self {
        Self {
            name: name.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            date_format: "yyyy-MM-ddTHH:mm+ZZZZ".to_string(),
            topics: topics.clone(),
        }
    }
}
