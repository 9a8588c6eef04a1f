//! Error types for airwatch-store.

use std::path::PathBuf;

/// Result type for airwatch-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in airwatch-store.
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

    /// Sensor not found in database.
    #[error("Sensor not found: {0}")]
    SensorNotFound(String),

    /// Reading not found in database.
    #[error("Reading not found: {0}")]
    ReadingNotFound(i64),

    /// Blog post not found in database.
    #[error("Post not found: {0}")]
    PostNotFound(i64),

    /// A reading with the same (sensor, timestamp, slave id) already exists.
    #[error("Duplicate reading for sensor {sensor:?} at {timestamp} (slave {slave_id:?})")]
    DuplicateReading {
        sensor: Option<String>,
        timestamp: i64,
        slave_id: Option<u32>,
    },

    /// Another post already uses this slug.
    #[error("Slug already in use: {0}")]
    DuplicateSlug(String),

    /// Invalid timestamp.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}
