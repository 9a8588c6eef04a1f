//! Error types for data parsing in airwatch-types.

use thiserror::Error;

/// Errors that can occur when parsing sensor data.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// Timestamp in neither RFC 3339 nor `YYYY-MM-DD HH:MM:SS` form.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// AQI category label that is not one of the known bands.
    #[error("Unknown AQI category: {0}")]
    UnknownCategory(String),
}

/// Result type alias using airwatch-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
