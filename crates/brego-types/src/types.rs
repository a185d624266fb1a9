//! Core types for telemetry readings.

use core::fmt;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A single timestamped value captured from one device.
///
/// Readings are immutable once produced. The timestamp is expressed in
/// fractional seconds since the Unix epoch, and the value is `None` when the
/// device could not produce a measurement for this cycle.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Reading {
    /// Capture time in seconds since the Unix epoch.
    pub timestamp: f64,
    /// Name of the device that produced the value.
    pub device: String,
    /// The measured value, or `None` if the read failed.
    pub value: Option<f64>,
}

impl Reading {
    /// Create a reading stamped with an explicit capture time.
    pub fn new(timestamp: f64, device: impl Into<String>, value: Option<f64>) -> Self {
        Self {
            timestamp,
            device: device.into(),
            value,
        }
    }

    /// Create a reading stamped with the current wall-clock time.
    pub fn now(device: impl Into<String>, value: Option<f64>) -> Self {
        Self::new(now(), device, value)
    }

    /// The capture time as an `OffsetDateTime`, if it is representable.
    pub fn captured_at(&self) -> Option<OffsetDateTime> {
        from_timestamp(self.timestamp)
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Some(v) => write!(f, "{}@{:.3}={}", self.device, self.timestamp, v),
            None => write!(f, "{}@{:.3}=null", self.device, self.timestamp),
        }
    }
}

/// An ordered group of readings produced together by one producer cycle.
///
/// Batches are shared, not copied: the dispatcher hands the same allocation to
/// every subscriber, so identity can be checked with [`Arc::ptr_eq`].
pub type Batch = Arc<[Reading]>;

/// Build a [`Batch`] from owned readings.
pub fn batch(readings: Vec<Reading>) -> Batch {
    Arc::from(readings)
}

/// Declaration of a device a producer will report on.
///
/// Devices are keyed by name; registering the same name twice is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceSpec {
    /// Unique device name.
    pub name: String,
    /// Free-form device kind (e.g. `temperature`, `ADC`).
    pub kind: String,
}

impl DeviceSpec {
    /// Create a new device declaration.
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
        }
    }
}

/// A registered device.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Device {
    /// Storage-assigned identifier.
    pub id: i64,
    /// Unique device name.
    pub name: String,
    /// Device kind.
    pub kind: String,
}

/// A bounded time window during which persisted readings share one identifier.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Session {
    /// Storage-assigned identifier.
    pub id: i64,
    /// Session start, seconds since the Unix epoch.
    pub start: f64,
    /// Session end, `None` while the session is active.
    pub end: Option<f64>,
}

impl Session {
    /// Whether the session is still open.
    pub fn is_active(&self) -> bool {
        self.end.is_none()
    }

    /// Session duration in seconds, if it has ended.
    pub fn duration(&self) -> Option<f64> {
        self.end.map(|end| end - self.start)
    }
}

/// Current wall-clock time in fractional seconds since the Unix epoch.
pub fn now() -> f64 {
    OffsetDateTime::now_utc().unix_timestamp_nanos() as f64 / 1_000_000_000.0
}

/// Convert fractional epoch seconds into an `OffsetDateTime`.
pub fn from_timestamp(timestamp: f64) -> Option<OffsetDateTime> {
    if !timestamp.is_finite() {
        return None;
    }
    OffsetDateTime::from_unix_timestamp_nanos((timestamp * 1_000_000_000.0) as i128).ok()
}
