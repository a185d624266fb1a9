//! Database schema.
//!
//! The schema version lives in SQLite's `user_version` pragma. Tables are
//! created idempotently; a database stamped with a newer version is refused
//! rather than written with an older layout.

use rusqlite::Connection;

use crate::error::{Error, Result};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Create missing tables and stamp the schema version.
pub fn initialize(conn: &Connection) -> Result<()> {
    let found = schema_version(conn)?;
    if found > SCHEMA_VERSION {
        return Err(Error::UnsupportedSchema {
            found,
            supported: SCHEMA_VERSION,
        });
    }

    conn.execute_batch(
        r#"
        -- One row per distinct device name
        CREATE TABLE IF NOT EXISTS devices (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            kind TEXT NOT NULL,
            registered_at REAL NOT NULL
        );

        -- Server runs; `end` stays NULL while the session is open
        CREATE TABLE IF NOT EXISTS sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            start REAL NOT NULL,
            "end" REAL
        );

        CREATE TABLE IF NOT EXISTS readings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id INTEGER NOT NULL REFERENCES sessions(id),
            device_id INTEGER NOT NULL REFERENCES devices(id),
            time REAL NOT NULL,
            value REAL
        );
        CREATE INDEX IF NOT EXISTS idx_readings_device_session_time
            ON readings(device_id, session_id, time);
        "#,
    )?;

    if found < SCHEMA_VERSION {
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    }
    Ok(())
}

fn schema_version(conn: &Connection) -> Result<i32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}
