//! Error types for brego-store.

use std::path::PathBuf;

/// Result type for brego-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in brego-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The database was written by a newer schema than this build knows.
    #[error("Unsupported schema version {found} (newest known is {supported})")]
    UnsupportedSchema { found: i32, supported: i32 },

    /// A session-scoped operation was attempted with no session open.
    #[error("No active session")]
    NoActiveSession,

    /// Readings referenced a device that was never registered.
    #[error("Device not registered: {0}")]
    DeviceNotRegistered(String),

    /// A reading carried a timestamp that cannot be stored.
    #[error("Invalid timestamp for {device}: {timestamp}")]
    InvalidTimestamp { device: String, timestamp: f64 },
}
