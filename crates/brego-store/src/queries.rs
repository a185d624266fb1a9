//! Query builder for stored readings.
//!
//! # Example
//!
//! ```
//! use brego_store::{ReadingQuery, ReadingStore, Store};
//!
//! let mut store = Store::open_in_memory()?;
//! store.register_device("28-0001", "temperature")?;
//! let session = store.start_session()?;
//!
//! let query = ReadingQuery::new()
//!     .device("28-0001")
//!     .session(session.id)
//!     .oldest_first()
//!     .limit(100);
//!
//! let readings = store.query_readings(&query)?;
//! assert!(readings.is_empty());
//! # Ok::<(), brego_store::Error>(())
//! ```

/// Fluent query builder for stored readings.
///
/// By default, queries return results ordered by `time` descending
/// (newest first).
#[derive(Debug, Default, Clone)]
pub struct ReadingQuery {
    /// Filter by device name.
    pub device: Option<String>,
    /// Filter by session id.
    pub session_id: Option<i64>,
    /// Include only readings at or after this time (epoch seconds).
    pub since: Option<f64>,
    /// Include only readings at or before this time (epoch seconds).
    pub until: Option<f64>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
    /// Order by time descending (newest first).
    pub newest_first: bool,
}

impl ReadingQuery {
    /// Create a new query: all devices, all sessions, newest first.
    pub fn new() -> Self {
        Self {
            newest_first: true,
            ..Default::default()
        }
    }

    /// Filter by device name.
    pub fn device(mut self, name: &str) -> Self {
        self.device = Some(name.to_string());
        self
    }

    /// Filter by session.
    pub fn session(mut self, session_id: i64) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Filter to readings captured at or after this time.
    pub fn since(mut self, time: f64) -> Self {
        self.since = Some(time);
        self
    }

    /// Filter to readings captured at or before this time.
    pub fn until(mut self, time: f64) -> Self {
        self.until = Some(time);
        self
    }

    /// Limit the maximum number of results returned.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first N results.
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Order results chronologically.
    pub fn oldest_first(mut self) -> Self {
        self.newest_first = false;
        self
    }

    /// Build the SQL WHERE clause and parameters.
    pub(crate) fn build_where(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref device) = self.device {
            conditions.push("d.name = ?");
            params.push(Box::new(device.clone()));
        }

        if let Some(session_id) = self.session_id {
            conditions.push("r.session_id = ?");
            params.push(Box::new(session_id));
        }

        if let Some(since) = self.since {
            conditions.push("r.time >= ?");
            params.push(Box::new(since));
        }

        if let Some(until) = self.until {
            conditions.push("r.time <= ?");
            params.push(Box::new(until));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    /// Build the full SQL query.
    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        let mut sql = format!(
            "SELECT r.id, r.session_id, d.name, r.time, r.value \
             FROM readings r JOIN devices d ON d.id = r.device_id \
             {} ORDER BY r.time {}, r.id {}",
            where_clause, order, order
        );

        // SQLite only accepts OFFSET after a LIMIT
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => {
                sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset))
            }
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }

        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_query_new_defaults() {
        let query = ReadingQuery::new();
        assert!(query.device.is_none());
        assert!(query.session_id.is_none());
        assert!(query.limit.is_none());
        assert!(query.newest_first);
    }

    #[test]
    fn test_build_where_combines_filters() {
        let query = ReadingQuery::new().device("adc").session(3).since(1.0).until(2.0);
        let (clause, params) = query.build_where();

        assert_eq!(
            clause,
            "WHERE d.name = ? AND r.session_id = ? AND r.time >= ? AND r.time <= ?"
        );
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn test_build_sql_ordering_and_paging() {
        let sql = ReadingQuery::new().oldest_first().limit(10).offset(5).build_sql();
        assert!(sql.contains("ORDER BY r.time ASC"));
        assert!(sql.ends_with("LIMIT 10 OFFSET 5"));

        let sql = ReadingQuery::new().offset(5).build_sql();
        assert!(sql.contains("ORDER BY r.time DESC"));
        assert!(sql.ends_with("LIMIT -1 OFFSET 5"));
    }
}
