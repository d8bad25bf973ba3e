use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GeolapseError, Result};

/// Catalog metadata for one acquisition. Carries no pixels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SceneDescriptor {
    pub id: String,
    pub acquired: DateTime<Utc>,
    pub product: String,
    #[serde(default)]
    pub sat_id: Option<String>,
    #[serde(default)]
    pub cloud_fraction: Option<f64>,
    #[serde(default)]
    pub fill_fraction: Option<f64>,
    #[serde(default)]
    pub valid_fraction: Option<f64>,
    #[serde(default)]
    pub solar_azimuth_angle: Option<f64>,
    #[serde(default)]
    pub solar_elevation_angle: Option<f64>,
}

impl SceneDescriptor {
    pub fn new(id: impl Into<String>, acquired: DateTime<Utc>, product: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            acquired,
            product: product.into(),
            sat_id: None,
            cloud_fraction: None,
            fill_fraction: None,
            valid_fraction: None,
            solar_azimuth_angle: None,
            solar_elevation_angle: None,
        }
    }
}

/// Half-open interval `[start, end)` of acquisition instants.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Build a range, rejecting empty or inverted intervals.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        let range = Self { start, end };
        range.check()?;
        Ok(range)
    }

    pub fn check(&self) -> Result<()> {
        if self.start >= self.end {
            return Err(GeolapseError::config(format!(
                "time range is empty or inverted: {} .. {}",
                self.start, self.end
            )));
        }
        Ok(())
    }

    pub fn contains(&self, instant: &DateTime<Utc>) -> bool {
        *instant >= self.start && *instant < self.end
    }
}

/// Parse a user-supplied instant.
///
/// Accepts RFC 3339 (with offset), `YYYY-MM-DDTHH:MM:SS` and `YYYY-MM-DD`;
/// the last two are read as UTC.
pub fn parse_instant(text: &str) -> Result<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    if text.contains('T') {
        return NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S")
            .map(|naive| naive.and_utc())
            .map_err(|e| GeolapseError::config(format!("failed to parse datetime {text:?}: {e}")));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map_err(|e| GeolapseError::config(format!("failed to parse date {text:?}: {e}")))
        .and_then(|date| {
            date.and_hms_opt(0, 0, 0)
                .map(|naive| naive.and_utc())
                .ok_or_else(|| GeolapseError::config(format!("invalid date {text:?}")))
        })
}

/// Descriptor field used to order scenes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    Acquired,
    CloudFraction,
    FillFraction,
    ValidFraction,
    SolarAzimuthAngle,
    SolarElevationAngle,
    SatId,
    Product,
    Id,
}

impl SortField {
    pub const ALL: [SortField; 9] = [
        Self::Acquired,
        Self::CloudFraction,
        Self::FillFraction,
        Self::ValidFraction,
        Self::SolarAzimuthAngle,
        Self::SolarElevationAngle,
        Self::SatId,
        Self::Product,
        Self::Id,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Acquired => "acquired",
            Self::CloudFraction => "cloud_fraction",
            Self::FillFraction => "fill_fraction",
            Self::ValidFraction => "valid_fraction",
            Self::SolarAzimuthAngle => "solar_azimuth_angle",
            Self::SolarElevationAngle => "solar_elevation_angle",
            Self::SatId => "sat_id",
            Self::Product => "product",
            Self::Id => "id",
        }
    }
}

impl std::str::FromStr for SortField {
    type Err = GeolapseError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|field| field.name() == s)
            .ok_or_else(|| {
                GeolapseError::config(format!(
                    "sort field {s:?} does not exist on scene descriptors"
                ))
            })
    }
}

impl std::fmt::Display for SortField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl std::str::FromStr for SortOrder {
    type Err = GeolapseError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(GeolapseError::config(format!(
                "sort order must be \"asc\" or \"desc\", got {other:?}"
            ))),
        }
    }
}

impl std::fmt::Display for SortOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Asc => write!(f, "asc"),
            Self::Desc => write!(f, "desc"),
        }
    }
}
