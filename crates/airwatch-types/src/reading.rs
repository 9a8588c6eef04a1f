//! Raw sensor readings as produced by the simulator and kept in the history file.

use rand::Rng;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::aqi::{Aqi, AqiCategory, AqiColor};
use crate::error::{ParseError, ParseResult};
use crate::sensor::SensorDescriptor;

/// One raw reading, in the shape written to the history file.
///
/// `seq` is assigned by the simulation loop when the reading is appended
/// to the history; a freshly generated reading has `seq == 0`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RawReading {
    #[cfg_attr(feature = "serde", serde(default))]
    pub seq: u64,
    #[cfg_attr(feature = "serde", serde(with = "timestamp"))]
    pub timestamp: OffsetDateTime,
    pub slave_id: u32,
    /// Stable sensor id (the roster name, e.g. `KP-002`).
    pub name: String,
    pub location: String,
    /// Temperature in degrees Celsius.
    pub temperature: f64,
    /// Relative humidity percentage.
    pub humidity: f64,
    /// PM2.5 concentration in µg/m³.
    pub pm25: f64,
    /// NO2 concentration in ppb.
    pub no2: f64,
    /// CO concentration in ppm.
    pub co: f64,
    pub aqi: u16,
    pub aqi_category: AqiCategory,
    pub aqi_color: AqiColor,
    pub latitude: f64,
    pub longitude: f64,
}

impl RawReading {
    /// Generate a synthetic reading for `sensor` at time `at`.
    ///
    /// Values are drawn uniformly: temperature 20-35 °C, humidity 40-80 %,
    /// PM2.5 10-150, NO2 5-50 (one decimal each) and CO 0.1-2.0 (two
    /// decimals). The AQI is derived from PM2.5. Sub-second precision is
    /// dropped from the timestamp.
    pub fn generate<R: Rng>(
        sensor: &SensorDescriptor,
        rng: &mut R,
        at: OffsetDateTime,
    ) -> Self {
        let temperature = round_to(rng.random_range(20.0..=35.0), 1);
        let humidity = round_to(rng.random_range(40.0..=80.0), 1);
        let pm25 = round_to(rng.random_range(10.0..=150.0), 1);
        let no2 = round_to(rng.random_range(5.0..=50.0), 1);
        let co = round_to(rng.random_range(0.1..=2.0), 2);

        let aqi = Aqi::from_pm25(pm25);

        Self {
            seq: 0,
            timestamp: truncate_to_second(at),
            slave_id: sensor.slave_id,
            name: sensor.id.to_string(),
            location: sensor.location.to_string(),
            temperature,
            humidity,
            pm25,
            no2,
            co,
            aqi: aqi.value,
            aqi_category: aqi.category,
            aqi_color: aqi.color(),
            latitude: sensor.latitude,
            longitude: sensor.longitude,
        }
    }
}

/// Round `value` to `decimals` decimal places.
#[must_use]
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn truncate_to_second(at: OffsetDateTime) -> OffsetDateTime {
    at.replace_nanosecond(0).unwrap_or(at)
}

/// Parse a timestamp as found in history files and API query strings.
///
/// Accepted forms, tried in order:
/// - RFC 3339 (`2024-01-31T12:00:00Z`)
/// - `YYYY-MM-DD HH:MM:SS`, interpreted as UTC
/// - `YYYY-MM-DD`, interpreted as midnight UTC
///
/// ```
/// use airwatch_types::parse_timestamp;
///
/// let a = parse_timestamp("2024-01-31T12:00:00Z").unwrap();
/// let b = parse_timestamp("2024-01-31 12:00:00").unwrap();
/// assert_eq!(a, b);
/// assert!(parse_timestamp("yesterday").is_err());
/// ```
pub fn parse_timestamp(s: &str) -> ParseResult<OffsetDateTime> {
    let s = s.trim();

    if let Ok(dt) = OffsetDateTime::parse(s, &Rfc3339) {
        return Ok(dt);
    }

    let naive = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    if let Ok(dt) = PrimitiveDateTime::parse(s, naive) {
        return Ok(dt.assume_utc());
    }

    let date_only = format_description!("[year]-[month]-[day]");
    if let Ok(date) = Date::parse(s, date_only) {
        return Ok(date.midnight().assume_utc());
    }

    Err(ParseError::InvalidTimestamp(s.to_string()))
}

/// Serde helpers writing RFC 3339 and reading any form [`parse_timestamp`] accepts.
#[cfg(feature = "serde")]
pub mod timestamp {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::OffsetDateTime;

    pub fn serialize<S: Serializer>(value: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        time::serde::rfc3339::serialize(value, serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<OffsetDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}
