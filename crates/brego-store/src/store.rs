//! Main store implementation.

use std::collections::HashMap;
use std::path::Path;

use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info, warn};

use brego_types::{Device, Reading, Session, now};

use crate::error::{Error, Result};
use crate::models::StoredReading;
use crate::queries::ReadingQuery;
use crate::schema;

/// The persistence operations the server needs from a storage backend.
///
/// [`Store`] is the SQLite implementation. Every session-scoped operation
/// fails with [`Error::NoActiveSession`] until [`start_session`] has been
/// called.
///
/// [`start_session`]: ReadingStore::start_session
pub trait ReadingStore: Send {
    /// Register a device by name. Idempotent: returns the existing id if the
    /// name is already known.
    fn register_device(&mut self, name: &str, kind: &str) -> Result<i64>;

    /// Open a new session, closing the active one first.
    fn start_session(&mut self) -> Result<Session>;

    /// Stamp the end time on the active session. No-op without one.
    fn end_session(&mut self) -> Result<Option<Session>>;

    /// The currently open session, if any.
    fn active_session(&self) -> Option<&Session>;

    /// Persist a batch of readings tagged with the active session.
    fn insert_readings(&mut self, readings: &[Reading]) -> Result<usize>;

    /// All readings of one device in the active session, oldest first.
    fn query_session_readings(&self, device: &str) -> Result<Vec<StoredReading>>;

    /// Every registered device, in registration order.
    fn list_devices(&self) -> Result<Vec<Device>>;

    /// Look up a session by id.
    fn get_session(&self, id: i64) -> Result<Option<Session>>;

    /// Log every registered device at `info` level.
    fn log_devices(&self) -> Result<()> {
        let devices = self.list_devices()?;
        info!("Registered devices: {}", devices.len());
        for device in devices {
            info!("  - {} id={} kind={}", device.name, device.id, device.kind);
        }
        Ok(())
    }
}

/// SQLite-based store for devices, sessions and readings.
pub struct Store {
    conn: Connection,
    known_devices: HashMap<String, i64>,
    session: Option<Session>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("known_devices", &self.known_devices.len())
            .field("session", &self.session)
            .finish()
    }
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        Self::from_connection(conn)
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        schema::initialize(&conn)?;

        let mut store = Self {
            conn,
            known_devices: HashMap::new(),
            session: None,
        };

        for device in store.list_devices()? {
            store.known_devices.insert(device.name, device.id);
        }
        debug!("Loaded {} registered device(s)", store.known_devices.len());

        Ok(store)
    }
}

// Device operations
impl Store {
    /// List all registered devices, in registration order.
    pub fn list_devices(&self) -> Result<Vec<Device>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, kind FROM devices ORDER BY id")?;

        let devices = stmt
            .query_map([], |row| {
                Ok(Device {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    kind: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(devices)
    }

    /// Look up a device id by name.
    pub fn device_id(&self, name: &str) -> Option<i64> {
        self.known_devices.get(name).copied()
    }
}

// Session operations
impl Store {
    /// Get a session by id.
    pub fn get_session(&self, id: i64) -> Result<Option<Session>> {
        let session = self
            .conn
            .query_row(
                r#"SELECT id, start, "end" FROM sessions WHERE id = ?"#,
                [id],
                |row| {
                    Ok(Session {
                        id: row.get(0)?,
                        start: row.get(1)?,
                        end: row.get(2)?,
                    })
                },
            )
            .optional()?;

        Ok(session)
    }

    fn check_session(&self) -> Result<&Session> {
        self.session.as_ref().ok_or(Error::NoActiveSession)
    }
}

// Reading operations
impl Store {
    /// Query readings with filters.
    pub fn query_readings(&self, query: &ReadingQuery) -> Result<Vec<StoredReading>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let readings = stmt
            .query_map(params_ref.as_slice(), |row| {
                Ok(StoredReading {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    device: row.get(2)?,
                    time: row.get(3)?,
                    value: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(readings)
    }

    /// Count readings, optionally for one device.
    pub fn count_readings(&self, device: Option<&str>) -> Result<u64> {
        let count: i64 = match device {
            Some(name) => self.conn.query_row(
                "SELECT COUNT(*) FROM readings r JOIN devices d ON d.id = r.device_id \
                 WHERE d.name = ?",
                [name],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM readings", [], |row| row.get(0))?,
        };

        Ok(count as u64)
    }
}

impl ReadingStore for Store {
    fn register_device(&mut self, name: &str, kind: &str) -> Result<i64> {
        if let Some(id) = self.device_id(name) {
            return Ok(id);
        }

        self.conn.execute(
            "INSERT OR IGNORE INTO devices (name, kind, registered_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![name, kind, now()],
        )?;

        let id: i64 =
            self.conn
                .query_row("SELECT id FROM devices WHERE name = ?", [name], |row| {
                    row.get(0)
                })?;

        self.known_devices.insert(name.to_string(), id);
        info!("Registered {}, id={}", name, id);
        Ok(id)
    }

    fn start_session(&mut self) -> Result<Session> {
        if self.session.is_some() {
            self.end_session()?;
        }

        let start = now();
        self.conn.execute(
            r#"INSERT INTO sessions (start, "end") VALUES (?1, NULL)"#,
            [start],
        )?;

        let session = Session {
            id: self.conn.last_insert_rowid(),
            start,
            end: None,
        };
        info!("Started session {}", session.id);
        self.session = Some(session.clone());
        Ok(session)
    }

    fn end_session(&mut self) -> Result<Option<Session>> {
        let Some(mut session) = self.session.take() else {
            return Ok(None);
        };

        let end = now();
        self.conn.execute(
            r#"UPDATE sessions SET "end" = ?1 WHERE id = ?2"#,
            rusqlite::params![end, session.id],
        )?;
        session.end = Some(end);

        info!(
            "Ended session {} after {:.1}s",
            session.id,
            session.duration().unwrap_or_default()
        );
        Ok(Some(session))
    }

    fn active_session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    fn insert_readings(&mut self, readings: &[Reading]) -> Result<usize> {
        let session_id = self.check_session()?.id;

        if readings.is_empty() {
            return Ok(0);
        }

        // Resolve everything up front so a bad batch writes nothing
        let mut rows = Vec::with_capacity(readings.len());
        for reading in readings {
            let device_id = self
                .device_id(&reading.device)
                .ok_or_else(|| Error::DeviceNotRegistered(reading.device.clone()))?;
            if !reading.timestamp.is_finite() {
                return Err(Error::InvalidTimestamp {
                    device: reading.device.clone(),
                    timestamp: reading.timestamp,
                });
            }
            rows.push((device_id, reading.timestamp, reading.value));
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO readings (session_id, device_id, time, value) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (device_id, time, value) in &rows {
                stmt.execute(rusqlite::params![session_id, device_id, time, value])?;
            }
        }
        tx.commit()?;

        debug!("Inserted {} reading(s) into session {}", rows.len(), session_id);
        Ok(rows.len())
    }

    fn query_session_readings(&self, device: &str) -> Result<Vec<StoredReading>> {
        let session_id = self.check_session()?.id;
        let query = ReadingQuery::new()
            .device(device)
            .session(session_id)
            .oldest_first();
        self.query_readings(&query)
    }

    fn list_devices(&self) -> Result<Vec<Device>> {
        Store::list_devices(self)
    }

    fn get_session(&self, id: i64) -> Result<Option<Session>> {
        Store::get_session(self, id)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if self.session.is_some()
            && let Err(e) = self.end_session()
        {
            warn!("Failed to end session while closing store: {}", e);
        }
    }
}
