//! Mock sensor implementation for testing.
//!
//! [`MockSensor`] implements [`BlockingSensor`] so pollers can be exercised
//! without hardware.
//!
//! # Features
//!
//! - **Failure injection**: fail every read, or only the next N reads
//! - **Latency simulation**: block each read for a fixed duration
//! - **Read counting**: observe how often the poller touched the sensor

use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::producer::BlockingSensor;

/// A mock sensor for testing.
///
/// # Example
///
/// ```
/// use brego_core::{BlockingSensor, MockSensor};
///
/// let sensor = MockSensor::new("28-0001", 21.5);
/// assert_eq!(sensor.read().unwrap(), 21.5);
///
/// sensor.set_transient_failures(1);
/// assert!(sensor.read().is_err());
/// assert!(sensor.read().is_ok());
/// assert_eq!(sensor.read_count(), 3);
/// ```
pub struct MockSensor {
    name: String,
    kind: String,
    value: AtomicU64,
    read_count: AtomicU32,
    should_fail: AtomicBool,
    fail_message: Mutex<String>,
    /// Simulated read latency in milliseconds (0 = no delay).
    latency_ms: AtomicU64,
    /// Reads left to fail before succeeding again.
    remaining_failures: AtomicU32,
}

impl std::fmt::Debug for MockSensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSensor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("value", &self.value())
            .field("should_fail", &self.should_fail.load(Ordering::Relaxed))
            .finish()
    }
}

impl MockSensor {
    /// Create a mock sensor that always reads `value`.
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            kind: "mock".to_string(),
            value: AtomicU64::new(value.to_bits()),
            read_count: AtomicU32::new(0),
            should_fail: AtomicBool::new(false),
            fail_message: Mutex::new("Mock failure".to_string()),
            latency_ms: AtomicU64::new(0),
            remaining_failures: AtomicU32::new(0),
        }
    }

    /// Override the device kind.
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// The value the next successful read returns.
    pub fn value(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Relaxed))
    }

    /// Change the value returned by subsequent reads.
    pub fn set_value(&self, value: f64) {
        self.value.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Make every read fail (or succeed again).
    pub fn set_should_fail(&self, fail: bool, message: Option<&str>) {
        self.should_fail.store(fail, Ordering::Relaxed);
        if let Some(msg) = message {
            *self.fail_message.lock().unwrap_or_else(PoisonError::into_inner) = msg.to_string();
        }
    }

    /// Fail the next `count` reads, then recover.
    pub fn set_transient_failures(&self, count: u32) {
        self.remaining_failures.store(count, Ordering::Relaxed);
    }

    /// Block each read for `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Number of reads attempted so far.
    pub fn read_count(&self) -> u32 {
        self.read_count.load(Ordering::Relaxed)
    }

    /// Reset the read counter.
    pub fn reset_read_count(&self) {
        self.read_count.store(0, Ordering::Relaxed);
    }

    fn failure(&self) -> Error {
        let message = self
            .fail_message
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Error::sensor_read(&self.name, message)
    }
}

impl BlockingSensor for MockSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    fn read(&self) -> Result<f64> {
        self.read_count.fetch_add(1, Ordering::Relaxed);

        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            std::thread::sleep(Duration::from_millis(latency));
        }

        if self
            .remaining_failures
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(self.failure());
        }

        if self.should_fail.load(Ordering::Relaxed) {
            return Err(self.failure());
        }

        Ok(self.value())
    }
}
