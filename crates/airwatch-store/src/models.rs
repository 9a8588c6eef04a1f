//! Data models for stored data.

use core::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use airwatch_types::RawReading;

/// A sensor stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSensor {
    /// Stable sensor identifier (e.g. `KP-002`).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Area or street the sensor is mounted in.
    pub area: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Inactive sensors are hidden from the sensor listing.
    pub is_active: bool,
    /// First time this sensor was seen.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Values used when a sensor has to be created.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSensor {
    pub id: String,
    pub name: String,
    pub area: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl NewSensor {
    /// A bare sensor known only by its id; the id doubles as its name.
    pub fn with_id(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            area: String::new(),
            latitude: None,
            longitude: None,
        }
    }

    /// Sensor details carried by a raw history record.
    pub fn from_raw(raw: &RawReading) -> Self {
        Self {
            id: raw.name.clone(),
            name: raw.name.clone(),
            area: raw.location.clone(),
            latitude: Some(raw.latitude),
            longitude: Some(raw.longitude),
        }
    }
}

/// A reading stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    /// Database row ID.
    pub id: i64,
    /// Owning sensor, if linked.
    pub sensor_id: Option<String>,
    /// Raw slave id reported by the device.
    pub slave_id: Option<u32>,
    /// When this reading was taken.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Temperature in Celsius.
    pub temperature: Option<f64>,
    /// Humidity percentage.
    pub humidity: Option<f64>,
    /// PM2.5 concentration in µg/m³.
    pub air_quality: Option<f64>,
    /// Derived AQI, when known.
    pub aqi: Option<u16>,
    pub aqi_category: String,
    pub aqi_color: String,
    pub co_level: Option<f64>,
    pub no_level: Option<f64>,
    pub smoke: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl StoredReading {
    /// AQI value used for trend analysis: the stored AQI, falling back to PM2.5.
    pub fn aqi_value(&self) -> Option<f64> {
        self.aqi.map(f64::from).or(self.air_quality)
    }
}

/// A reading to be inserted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewReading {
    pub sensor_id: Option<String>,
    pub slave_id: Option<u32>,
    pub timestamp: Option<OffsetDateTime>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub air_quality: Option<f64>,
    pub aqi: Option<u16>,
    pub aqi_category: String,
    pub aqi_color: String,
    pub co_level: Option<f64>,
    pub no_level: Option<f64>,
    pub smoke: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl NewReading {
    /// Map a raw history record onto the readings table.
    pub fn from_raw(raw: &RawReading) -> Self {
        Self {
            sensor_id: Some(raw.name.clone()),
            slave_id: Some(raw.slave_id),
            timestamp: Some(raw.timestamp),
            temperature: Some(raw.temperature),
            humidity: Some(raw.humidity),
            air_quality: Some(raw.pm25),
            aqi: Some(raw.aqi),
            aqi_category: raw.aqi_category.to_string(),
            aqi_color: raw.aqi_color.to_string(),
            co_level: Some(raw.co),
            no_level: Some(raw.no2),
            smoke: Some(0.0),
            latitude: Some(raw.latitude),
            longitude: Some(raw.longitude),
        }
    }
}

/// Publication status of a blog post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    #[default]
    Draft,
    Published,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Published => "published",
        }
    }

    pub(crate) fn parse(s: &str) -> Self {
        match s {
            "published" => PostStatus::Published,
            _ => PostStatus::Draft,
        }
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A blog post stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlogPost {
    pub id: i64,
    pub title: String,
    pub slug: String,
    /// Author display name; `None` for anonymous posts.
    pub author: Option<String>,
    pub content: String,
    pub excerpt: String,
    /// Image URL, if any.
    pub image: Option<String>,
    pub status: PostStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub published_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Fields of a blog post as supplied by a client.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct PostInput {
    pub title: String,
    pub slug: String,
    #[serde(default)]
    pub author: Option<String>,
    pub content: String,
    #[serde(default)]
    pub excerpt: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub status: PostStatus,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub published_at: Option<OffsetDateTime>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use airwatch_types::ROSTER;
    use time::macros::datetime;

    #[test]
    fn test_new_reading_from_raw() {
        let raw = sample_raw();
        let reading = NewReading::from_raw(&raw);

        assert_eq!(reading.sensor_id.as_deref(), Some("KP-002"));
        assert_eq!(reading.slave_id, Some(1));
        assert_eq!(reading.air_quality, Some(72.4));
        assert_eq!(reading.aqi, Some(72));
        assert_eq!(reading.aqi_category, "Moderate");
        assert_eq!(reading.aqi_color, "Yellow");
        assert_eq!(reading.no_level, Some(12.0));
        assert_eq!(reading.co_level, Some(0.55));
    }

    #[test]
    fn test_new_sensor_from_raw() {
        let sensor = NewSensor::from_raw(&sample_raw());
        assert_eq!(sensor.id, "KP-002");
        assert_eq!(sensor.name, "KP-002");
        assert_eq!(sensor.area, "Ormes Road");
        assert_eq!(sensor.latitude, Some(ROSTER[0].latitude));
    }

    #[test]
    fn test_aqi_value_fallback() {
        let mut reading = StoredReading {
            id: 1,
            sensor_id: None,
            slave_id: None,
            timestamp: datetime!(2024-01-01 00:00 UTC),
            temperature: None,
            humidity: None,
            air_quality: Some(33.3),
            aqi: Some(40),
            aqi_category: String::new(),
            aqi_color: String::new(),
            co_level: None,
            no_level: None,
            smoke: None,
            latitude: None,
            longitude: None,
        };
        assert_eq!(reading.aqi_value(), Some(40.0));

        reading.aqi = None;
        assert_eq!(reading.aqi_value(), Some(33.3));

        reading.air_quality = None;
        assert_eq!(reading.aqi_value(), None);
    }

    #[test]
    fn test_post_status_serde() {
        assert_eq!(
            serde_json::to_string(&PostStatus::Published).unwrap(),
            "\"published\""
        );
        assert_eq!(PostStatus::parse("published"), PostStatus::Published);
        assert_eq!(PostStatus::parse("unknown"), PostStatus::Draft);
    }

    fn sample_raw() -> RawReading {
        let sensor = &ROSTER[0];
        RawReading {
            seq: 0,
            timestamp: datetime!(2024-01-31 12:00:00 UTC),
            slave_id: sensor.slave_id,
            name: sensor.id.to_string(),
            location: sensor.location.to_string(),
            temperature: 27.1,
            humidity: 61.0,
            pm25: 72.4,
            no2: 12.0,
            co: 0.55,
            aqi: 72,
            aqi_category: airwatch_types::AqiCategory::Moderate,
            aqi_color: airwatch_types::AqiColor::Yellow,
            latitude: sensor.latitude,
            longitude: sensor.longitude,
        }
    }
}
