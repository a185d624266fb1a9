//! Data models for stored data.

use serde::{Deserialize, Serialize};

use brego_types::Reading;

/// A reading stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    /// Database row ID.
    pub id: i64,
    /// Session the reading was captured in.
    pub session_id: i64,
    /// Device name.
    pub device: String,
    /// Capture time in seconds since the Unix epoch.
    pub time: f64,
    /// Measured value.
    pub value: Option<f64>,
}

impl StoredReading {
    /// Convert back to a bus reading.
    pub fn to_reading(&self) -> Reading {
        Reading::new(self.time, self.device.clone(), self.value)
    }
}

impl From<StoredReading> for Reading {
    fn from(stored: StoredReading) -> Self {
        Reading::new(stored.time, stored.device, stored.value)
    }
}
