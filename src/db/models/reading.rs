//! Temperature reading data model.
//!
//! A `Reading` is immutable once created. Stored readings carry the row id
//! assigned by SQLite; synthetic readings produced for the live stream never
//! get one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::helpers::format_datetime;

/// A single temperature observation from one device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reading {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Degrees Celsius.
    #[serde(rename = "temperature")]
    pub value: f64,
    #[serde(rename = "device")]
    pub device_id: String,
    #[serde(rename = "timestamp")]
    pub observed_at: DateTime<Utc>,
}

impl Reading {
    pub fn new(value: f64, device_id: impl Into<String>, observed_at: DateTime<Utc>) -> Self {
        Self {
            id: None,
            value,
            device_id: device_id.into(),
            observed_at,
        }
    }

    pub fn to_payload(&self) -> ReadingPayload {
        ReadingPayload::from(self)
    }
}

/// Wire form of a reading pushed to stream subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReadingPayload {
    pub temperature: f64,
    pub device: String,
    pub timestamp: String,
}

impl From<&Reading> for ReadingPayload {
    fn from(reading: &Reading) -> Self {
        Self {
            temperature: reading.value,
            device: reading.device_id.clone(),
            timestamp: format_datetime(&reading.observed_at),
        }
    }
}
