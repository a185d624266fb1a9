//! Error types for brego-core.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the bus, producers and sensors.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A sensor could not produce a value.
    #[error("Failed to read {device}: {reason}")]
    SensorRead {
        /// The device that failed.
        device: String,
        /// Why the read failed.
        reason: String,
    },

    /// A device file held data that could not be parsed.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// The dispatcher is gone and the ingress queue no longer accepts batches.
    #[error("Ingress queue closed")]
    IngressClosed,

    /// A producer was asked to run twice.
    #[error("Producer '{0}' is already running")]
    AlreadyRunning(String),

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a sensor read error.
    pub fn sensor_read(device: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SensorRead {
            device: device.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias using brego-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::sensor_read("28-0001", "CRC check failed");
        assert_eq!(err.to_string(), "Failed to read 28-0001: CRC check failed");

        let err = Error::Timeout {
            operation: "read".to_string(),
            duration: Duration::from_millis(750),
        };
        assert!(err.to_string().contains("750ms"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "w1_slave");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
