//! Short-horizon AQI forecast by linear trend projection.
//!
//! The trend compares the mean of the newest values with the mean of the
//! oldest ones and spreads the difference over the whole sample. Each hourly
//! step extends the last observed value along that trend, is boosted during
//! commute hours and clamped into a plausible band. Confidence decays with
//! the distance from the present.

use serde::Serialize;
use time::{Duration, OffsetDateTime, UtcOffset};

use airwatch_store::{ReadingQuery, Store};
use airwatch_types::round_to;

use crate::config::ForecastConfig;

/// Minimum number of AQI values needed for a projection.
pub const MIN_POINTS: usize = 5;
/// Values averaged at each end of the sample.
pub const TREND_WINDOW: usize = 10;
/// Number of hourly steps projected.
pub const HORIZON_HOURS: i64 = 24;

const COMMUTE_FACTOR: f64 = 1.15;
const MIN_VALUE: f64 = 10.0;
const MAX_VALUE: f64 = 200.0;
const CONFIDENCE_DECAY: f64 = 0.02;
const MIN_CONFIDENCE: f64 = 0.5;

/// Reasons a forecast could not be produced.
#[derive(Debug, thiserror::Error)]
pub enum ForecastError {
    #[error("Sensor not found: {0}")]
    SensorNotFound(String),

    #[error("No readings for sensor {sensor} in the last {hours} hours")]
    NoData { sensor: String, hours: u32 },

    #[error("Insufficient data: {available} AQI values, at least {required} required")]
    InsufficientData { available: usize, required: usize },

    #[error(transparent)]
    Store(#[from] airwatch_store::Error),
}

impl ForecastError {
    /// Machine-readable error code returned to clients.
    pub fn code(&self) -> &'static str {
        match self {
            ForecastError::SensorNotFound(_) => "sensor_not_found",
            ForecastError::NoData { .. } => "no_data",
            ForecastError::InsufficientData { .. } => "insufficient_data",
            ForecastError::Store(_) => "store_error",
        }
    }
}

/// Direction of the projected trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

impl Trend {
    fn from_slope(slope: f64) -> Self {
        if slope > 0.0 {
            Trend::Increasing
        } else if slope < 0.0 {
            Trend::Decreasing
        } else {
            Trend::Stable
        }
    }
}

/// One projected hour.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastPoint {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub value: f64,
    pub confidence: f64,
}

/// A complete projection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Forecast {
    pub trend: Trend,
    /// Change in AQI per step.
    pub slope: f64,
    pub points_used: usize,
    pub last_value: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
    pub forecast: Vec<ForecastPoint>,
}

/// Project the next [`HORIZON_HOURS`] hours from chronologically ordered AQI values.
///
/// `offset` is the local clock used to detect commute hours.
pub fn estimate(
    values: &[f64],
    now: OffsetDateTime,
    offset: UtcOffset,
) -> Result<Forecast, ForecastError> {
    let Some(&last_value) = values.last().filter(|_| values.len() >= MIN_POINTS) else {
        return Err(ForecastError::InsufficientData {
            available: values.len(),
            required: MIN_POINTS,
        });
    };

    let window = TREND_WINDOW.min(values.len());
    let recent = mean(&values[values.len() - window..]);
    let older = mean(&values[..window]);
    let slope = (recent - older) / values.len() as f64;

    let now = now.replace_nanosecond(0).unwrap_or(now);
    let forecast = (1..=HORIZON_HOURS)
        .map(|step| {
            let timestamp = now + Duration::hours(step);
            let mut value = last_value + slope * step as f64;
            if is_commute_hour(timestamp.to_offset(offset).hour()) {
                value *= COMMUTE_FACTOR;
            }
            ForecastPoint {
                timestamp,
                value: round_to(value.clamp(MIN_VALUE, MAX_VALUE), 1),
                confidence: round_to(
                    (1.0 - CONFIDENCE_DECAY * step as f64).max(MIN_CONFIDENCE),
                    2,
                ),
            }
        })
        .collect();

    Ok(Forecast {
        trend: Trend::from_slope(slope),
        slope: round_to(slope, 3),
        points_used: values.len(),
        last_value,
        generated_at: now,
        forecast,
    })
}

/// Forecast for a stored sensor from its readings in the configured lookback window.
///
/// Preconditions are checked in order: the sensor must exist, it must have
/// readings in the window, and enough of them must carry an AQI value.
pub fn forecast_sensor(
    store: &Store,
    sensor_id: &str,
    now: OffsetDateTime,
    config: &ForecastConfig,
) -> Result<Forecast, ForecastError> {
    if store.get_sensor(sensor_id)?.is_none() {
        return Err(ForecastError::SensorNotFound(sensor_id.to_string()));
    }

    let mut query = ReadingQuery::new().sensor(sensor_id).oldest_first();
    // A window reaching past the earliest representable date covers everything
    if let Some(since) = now.checked_sub(Duration::hours(i64::from(config.lookback_hours))) {
        query = query.since(since);
    }
    let readings = store.query_readings(&query)?;

    if readings.is_empty() {
        return Err(ForecastError::NoData {
            sensor: sensor_id.to_string(),
            hours: config.lookback_hours,
        });
    }

    let values: Vec<f64> = readings.iter().filter_map(|r| r.aqi_value()).collect();
    let offset =
        UtcOffset::from_whole_seconds(config.utc_offset_minutes * 60).unwrap_or(UtcOffset::UTC);

    estimate(&values, now, offset)
}

fn is_commute_hour(hour: u8) -> bool {
    matches!(hour, 7..=9 | 17..=19)
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use airwatch_store::{NewReading, NewSensor};
    use proptest::prelude::*;
    use time::macros::{datetime, offset};

    // 00:00 UTC, so steps 7-9 and 17-19 fall in commute hours
    const MIDNIGHT: OffsetDateTime = datetime!(2024-03-01 00:00:00 UTC);

    #[test]
    fn test_insufficient_data() {
        let err = estimate(&[50.0, 60.0, 70.0, 80.0], MIDNIGHT, UtcOffset::UTC).unwrap_err();
        assert!(matches!(
            err,
            ForecastError::InsufficientData {
                available: 4,
                required: 5
            }
        ));
        assert_eq!(err.code(), "insufficient_data");
    }

    #[test]
    fn test_flat_series_is_stable() {
        let forecast = estimate(&[80.0; 12], MIDNIGHT, UtcOffset::UTC).unwrap();

        assert_eq!(forecast.trend, Trend::Stable);
        assert_eq!(forecast.slope, 0.0);
        assert_eq!(forecast.points_used, 12);
        assert_eq!(forecast.forecast.len(), 24);
        assert_eq!(forecast.forecast[0].value, 80.0);
        // 07:00 is a commute hour
        assert_eq!(forecast.forecast[6].value, 92.0);
        assert_eq!(forecast.forecast[9].value, 80.0);
        assert_eq!(forecast.forecast[16].value, 92.0);
        assert_eq!(forecast.forecast[19].value, 80.0);
    }

    #[test]
    fn test_increasing_trend() {
        // Up to ten points both windows cover the same values
        let values: Vec<f64> = (0..20).map(|i| 50.0 + i as f64).collect();
        let forecast = estimate(&values, MIDNIGHT, UtcOffset::UTC).unwrap();

        // recent mean 64.5, older mean 54.5, over 20 points
        assert_eq!(forecast.slope, 0.5);
        assert_eq!(forecast.trend, Trend::Increasing);
        assert_eq!(forecast.last_value, 69.0);
        assert_eq!(forecast.forecast[0].value, 69.5);
        assert_eq!(
            forecast.forecast[0].timestamp,
            datetime!(2024-03-01 01:00:00 UTC)
        );
    }

    #[test]
    fn test_decreasing_trend_clamps_low() {
        let values: Vec<f64> = (0..20).map(|i| 200.0 - i as f64 * 10.0).collect();
        let forecast = estimate(&values, MIDNIGHT, UtcOffset::UTC).unwrap();

        assert_eq!(forecast.trend, Trend::Decreasing);
        assert!(forecast.forecast.iter().all(|p| p.value >= MIN_VALUE));
        assert_eq!(forecast.forecast[23].value, MIN_VALUE);
    }

    #[test]
    fn test_confidence_decay() {
        let forecast = estimate(&[100.0; 5], MIDNIGHT, UtcOffset::UTC).unwrap();
        let confidence: Vec<_> = forecast.forecast.iter().map(|p| p.confidence).collect();

        assert_eq!(confidence[0], 0.98);
        assert_eq!(confidence[9], 0.8);
        assert_eq!(confidence[23], 0.52);
        assert!(confidence.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_commute_hours_use_local_offset() {
        // Midnight UTC is 05:30 local
        let forecast = estimate(&[80.0; 5], MIDNIGHT, offset!(+5:30)).unwrap();
        let boosted: Vec<_> = forecast
            .forecast
            .iter()
            .enumerate()
            .filter(|(_, p)| p.value > 80.0)
            .map(|(i, _)| i + 1)
            .collect();
        // Local hours 07, 08, 09 at steps 2-4 and 17, 18, 19 at steps 12-14
        assert_eq!(boosted, vec![2, 3, 4, 12, 13, 14]);
    }

    #[test]
    fn test_forecast_sensor_preconditions() {
        let store = Store::open_in_memory().unwrap();
        let config = ForecastConfig::default();
        let now = datetime!(2024-03-02 12:00:00 UTC);

        let err = forecast_sensor(&store, "KP-002", now, &config).unwrap_err();
        assert_eq!(err.code(), "sensor_not_found");

        store
            .get_or_create_sensor(&NewSensor::with_id("KP-002"))
            .unwrap();
        let err = forecast_sensor(&store, "KP-002", now, &config).unwrap_err();
        assert_eq!(err.code(), "no_data");

        // A reading older than the lookback window does not count
        let add = |hours_ago: i64, aqi: Option<u16>| {
            store
                .insert_reading(&NewReading {
                    sensor_id: Some("KP-002".to_string()),
                    slave_id: Some(1),
                    timestamp: Some(now - Duration::hours(hours_ago)),
                    aqi,
                    ..Default::default()
                })
                .unwrap();
        };
        add(72, Some(90));
        let err = forecast_sensor(&store, "KP-002", now, &config).unwrap_err();
        assert_eq!(err.code(), "no_data");

        for h in 1..=4 {
            add(h, Some(60));
        }
        add(5, None);
        let err = forecast_sensor(&store, "KP-002", now, &config).unwrap_err();
        assert!(matches!(
            err,
            ForecastError::InsufficientData { available: 4, .. }
        ));

        add(6, Some(60));
        let forecast = forecast_sensor(&store, "KP-002", now, &config).unwrap();
        assert_eq!(forecast.points_used, 5);
        assert_eq!(forecast.trend, Trend::Stable);
    }

    #[test]
    fn test_forecast_sensor_with_unbounded_lookback() {
        let store = Store::open_in_memory().unwrap();
        let now = datetime!(2024-03-02 12:00:00 UTC);
        let config = ForecastConfig {
            lookback_hours: u32::MAX,
            ..Default::default()
        };

        store
            .get_or_create_sensor(&NewSensor::with_id("KP-002"))
            .unwrap();
        for h in 1..=5 {
            store
                .insert_reading(&NewReading {
                    sensor_id: Some("KP-002".to_string()),
                    slave_id: Some(1),
                    timestamp: Some(now - Duration::hours(h * 1000)),
                    aqi: Some(70),
                    ..Default::default()
                })
                .unwrap();
        }

        // The window starts before the earliest date, so every reading counts
        let forecast = forecast_sensor(&store, "KP-002", now, &config).unwrap();
        assert_eq!(forecast.points_used, 5);
    }

    proptest! {
        #[test]
        fn prop_projection_within_bounds(
            values in prop::collection::vec(0.0f64..500.0, 5..200),
            offset_minutes in -720i32..=720,
        ) {
            let offset = UtcOffset::from_whole_seconds(offset_minutes * 60).unwrap();
            let forecast = estimate(&values, MIDNIGHT, offset).unwrap();

            prop_assert_eq!(forecast.forecast.len(), 24);
            for point in &forecast.forecast {
                prop_assert!((MIN_VALUE..=MAX_VALUE).contains(&point.value));
                prop_assert!((MIN_CONFIDENCE..=1.0).contains(&point.confidence));
            }
        }

        #[test]
        fn prop_short_series_rejected(values in prop::collection::vec(0.0f64..500.0, 0..5)) {
            let is_insufficient = matches!(
                estimate(&values, MIDNIGHT, UtcOffset::UTC),
                Err(ForecastError::InsufficientData { .. })
            );
            prop_assert!(is_insufficient);
        }
    }
}
