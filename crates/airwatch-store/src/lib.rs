//! Local persistence for air-quality sensors, readings and blog posts.
//!
//! This crate provides SQLite-based storage for the dashboard backend.
//!
//! # Features
//!
//! - Sensors keyed by their stable id, created on first sight
//! - Readings deduplicated on `(sensor, timestamp, slave id)`
//! - Query by sensor, time range, with pagination
//! - Blog posts with unique slugs and publication status
//!
//! # Example
//!
//! ```no_run
//! use airwatch_store::{Store, ReadingQuery};
//!
//! let store = Store::open_default()?;
//!
//! // Query recent readings
//! let query = ReadingQuery::new()
//!     .sensor("KP-002")
//!     .limit(10);
//! let readings = store.query_readings(&query)?;
//! # Ok::<(), airwatch_store::Error>(())
//! ```

mod error;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::{
    BlogPost, NewReading, NewSensor, PostInput, PostStatus, StoredReading, StoredSensor,
};
pub use queries::ReadingQuery;
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/airwatch/data.db`
/// - macOS: `~/Library/Application Support/airwatch/data.db`
/// - Windows: `C:\Users\<user>\AppData\Local\airwatch\data.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("airwatch")
        .join("data.db")
}
