//! Platform-agnostic types for air-quality sensor dashboards.
//!
//! This crate provides the types shared by the store and the service:
//!
//! - AQI bands derived from PM2.5 ([`Aqi`], [`AqiCategory`], [`AqiColor`])
//! - The fixed sensor roster driven by the simulator ([`ROSTER`])
//! - Raw readings as written to the history file ([`RawReading`])
//! - Error types for data parsing
//!
//! # Example
//!
//! ```
//! use airwatch_types::{Aqi, AqiCategory, RawReading, ROSTER};
//!
//! let aqi = Aqi::from_pm25(72.4);
//! assert_eq!(aqi.category, AqiCategory::Moderate);
//!
//! let reading = RawReading::generate(&ROSTER[0], &mut rand::rng(), time::OffsetDateTime::now_utc());
//! assert_eq!(reading.name, "KP-002");
//! ```

pub mod aqi;
pub mod error;
pub mod reading;
pub mod sensor;

pub use aqi::{Aqi, AqiCategory, AqiColor, MAX_AQI};
pub use error::{ParseError, ParseResult};
pub use reading::{RawReading, parse_timestamp, round_to};
pub use sensor::{MAX_ACTIVE_SENSORS, ROSTER, SensorDescriptor, active_roster, clamp_sensor_count};
