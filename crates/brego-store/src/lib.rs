//! Local persistence for brego readings.
//!
//! This crate provides SQLite-based storage for the telemetry server:
//! registered devices, recording sessions, and the readings captured during
//! each session.
//!
//! # Features
//!
//! - Idempotent device registration keyed by name
//! - One active session at a time, closed automatically when the store drops
//! - Batched, transactional reading inserts tagged with the active session
//! - Query by device, session and time range, with pagination
//!
//! # Example
//!
//! ```no_run
//! use brego_store::{ReadingStore, Store};
//! use brego_types::Reading;
//!
//! let mut store = Store::open_default()?;
//! store.register_device("28-0001", "temperature")?;
//! store.start_session()?;
//! store.insert_readings(&[Reading::now("28-0001", Some(21.5))])?;
//!
//! let readings = store.query_session_readings("28-0001")?;
//! # Ok::<(), brego_store::Error>(())
//! ```

mod error;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::StoredReading;
pub use queries::ReadingQuery;
pub use store::{ReadingStore, Store};

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/brego/data.db`
/// - macOS: `~/Library/Application Support/brego/data.db`
/// - Windows: `C:\Users\<user>\AppData\Local\brego\data.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("brego")
        .join("data.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_db_path_layout() {
        let path = default_db_path();
        assert!(path.ends_with("brego/data.db"));
    }
}
