//! Query builder for stored readings.
//!
//! # Example
//!
//! ```
//! use airwatch_store::{Store, ReadingQuery};
//! use time::{OffsetDateTime, Duration};
//!
//! let store = Store::open_in_memory()?;
//! let yesterday = OffsetDateTime::now_utc() - Duration::hours(24);
//!
//! let query = ReadingQuery::new()
//!     .sensor("KP-002")
//!     .since(yesterday)
//!     .limit(50);
//!
//! let readings = store.query_readings(&query)?;
//! assert!(readings.is_empty());
//! # Ok::<(), airwatch_store::Error>(())
//! ```

use time::OffsetDateTime;

/// Fluent query builder for readings.
///
/// By default, queries return results ordered by `timestamp` descending
/// (newest first).
#[derive(Debug, Default, Clone)]
pub struct ReadingQuery {
    /// Filter by stable sensor id.
    pub sensor_id: Option<String>,
    /// Filter by device slave id.
    pub slave_id: Option<u32>,
    /// When both `sensor_id` and `slave_id` are set, match either instead of both.
    pub match_either: bool,
    /// Filter readings at or after this time.
    pub since: Option<OffsetDateTime>,
    /// Filter readings at or before this time.
    pub until: Option<OffsetDateTime>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
    /// Order by timestamp descending (newest first).
    pub newest_first: bool,
}

impl ReadingQuery {
    /// Create a new query: all sensors, no time range, no limit, newest first.
    pub fn new() -> Self {
        Self {
            newest_first: true,
            ..Default::default()
        }
    }

    /// Only include readings of the given sensor.
    pub fn sensor(mut self, sensor_id: &str) -> Self {
        self.sensor_id = Some(sensor_id.to_string());
        self
    }

    /// Match a free-form identifier against the sensor id, or against the
    /// slave id when it parses as a number.
    pub fn sensor_or_slave(mut self, key: &str) -> Self {
        self.sensor_id = Some(key.to_string());
        self.slave_id = key.parse().ok();
        self.match_either = true;
        self
    }

    /// Filter to readings taken at or after this time.
    pub fn since(mut self, time: OffsetDateTime) -> Self {
        self.since = Some(time);
        self
    }

    /// Filter to readings taken at or before this time.
    pub fn until(mut self, time: OffsetDateTime) -> Self {
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
        let mut conditions: Vec<&str> = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        match (&self.sensor_id, self.slave_id) {
            (Some(sensor_id), Some(slave_id)) if self.match_either => {
                conditions.push("(sensor_id = ? OR slave_id = ?)");
                params.push(Box::new(sensor_id.clone()));
                params.push(Box::new(slave_id));
            }
            (sensor_id, slave_id) => {
                if let Some(sensor_id) = sensor_id {
                    conditions.push("sensor_id = ?");
                    params.push(Box::new(sensor_id.clone()));
                }
                if let Some(slave_id) = slave_id {
                    conditions.push("slave_id = ?");
                    params.push(Box::new(slave_id));
                }
            }
        }

        if let Some(since) = self.since {
            conditions.push("timestamp >= ?");
            params.push(Box::new(since.unix_timestamp()));
        }

        if let Some(until) = self.until {
            conditions.push("timestamp <= ?");
            params.push(Box::new(until.unix_timestamp()));
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
            "SELECT {} FROM readings {} ORDER BY timestamp {}, id {}",
            crate::store::READING_COLUMNS,
            where_clause,
            order,
            order
        );

        // SQLite only accepts OFFSET after a LIMIT
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset)),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }

        sql
    }
}
