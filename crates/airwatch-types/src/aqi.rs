//! Air Quality Index bands derived from PM2.5 concentration.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Upper bound of the AQI scale.
pub const MAX_AQI: u16 = 500;

/// Upper PM2.5 bound (inclusive, µg/m³) of the [`AqiCategory::Excellent`] band.
pub const EXCELLENT_PM25_MAX: f64 = 50.0;

/// Upper PM2.5 bound (inclusive, µg/m³) of the [`AqiCategory::Moderate`] band.
pub const MODERATE_PM25_MAX: f64 = 100.0;

/// Qualitative AQI category.
///
/// Categories are ordered by severity, so threshold checks such as
/// `category >= AqiCategory::Moderate` read naturally.
///
/// ```
/// use airwatch_types::AqiCategory;
///
/// assert!(AqiCategory::Unhealthy > AqiCategory::Moderate);
/// assert_eq!(AqiCategory::Moderate.color().to_string(), "Yellow");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AqiCategory {
    /// PM2.5 at or below 50 µg/m³.
    Excellent,
    /// PM2.5 above 50 and at or below 100 µg/m³.
    Moderate,
    /// PM2.5 above 100 µg/m³.
    Unhealthy,
}

impl AqiCategory {
    /// Dashboard color associated with this category.
    #[must_use]
    pub fn color(&self) -> AqiColor {
        match self {
            AqiCategory::Excellent => AqiColor::Green,
            AqiCategory::Moderate => AqiColor::Yellow,
            AqiCategory::Unhealthy => AqiColor::Red,
        }
    }

    /// Label as stored in the database.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AqiCategory::Excellent => "Excellent",
            AqiCategory::Moderate => "Moderate",
            AqiCategory::Unhealthy => "Unhealthy",
        }
    }
}

impl fmt::Display for AqiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for AqiCategory {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Excellent" => Ok(AqiCategory::Excellent),
            "Moderate" => Ok(AqiCategory::Moderate),
            "Unhealthy" => Ok(AqiCategory::Unhealthy),
            other => Err(ParseError::UnknownCategory(other.to_string())),
        }
    }
}

/// Color band shown next to an AQI value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AqiColor {
    Green,
    Yellow,
    Red,
}

impl fmt::Display for AqiColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AqiColor::Green => write!(f, "Green"),
            AqiColor::Yellow => write!(f, "Yellow"),
            AqiColor::Red => write!(f, "Red"),
        }
    }
}

/// An AQI value together with its category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Aqi {
    /// Index value, always within `0..=MAX_AQI`.
    pub value: u16,
    /// Category band the PM2.5 level falls in.
    pub category: AqiCategory,
}

impl Aqi {
    /// Derive the AQI from a PM2.5 concentration in µg/m³.
    ///
    /// - `pm25 <= 50`: index equals the concentration (Excellent)
    /// - `50 < pm25 <= 100`: `50 + (pm25 - 50)` (Moderate)
    /// - `pm25 > 100`: `100 + (pm25 - 100) * 2` (Unhealthy)
    ///
    /// The index is clamped to `0..=500` and truncated toward zero.
    ///
    /// ```
    /// use airwatch_types::{Aqi, AqiCategory};
    ///
    /// assert_eq!(Aqi::from_pm25(50.0).category, AqiCategory::Excellent);
    /// assert_eq!(Aqi::from_pm25(100.0).category, AqiCategory::Moderate);
    /// assert_eq!(Aqi::from_pm25(120.7).value, 141);
    /// ```
    #[must_use]
    pub fn from_pm25(pm25: f64) -> Self {
        let (raw, category) = if pm25 <= EXCELLENT_PM25_MAX {
            (pm25, AqiCategory::Excellent)
        } else if pm25 <= MODERATE_PM25_MAX {
            (50.0 + (pm25 - 50.0), AqiCategory::Moderate)
        } else {
            (100.0 + (pm25 - 100.0) * 2.0, AqiCategory::Unhealthy)
        };

        // `as` truncates toward zero and maps NaN to 0
        let value = raw.clamp(0.0, f64::from(MAX_AQI)) as u16;

        Self { value, category }
    }

    /// Color associated with this AQI's category.
    #[must_use]
    pub fn color(&self) -> AqiColor {
        self.category.color()
    }
}
