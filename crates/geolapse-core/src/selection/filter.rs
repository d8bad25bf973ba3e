use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GeolapseError, Result};
use crate::scene::SceneDescriptor;

/// Secondary metadata filters. Every active filter must pass; a scene missing
/// the metadata a filter needs is dropped.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneFilter {
    /// Maximum cloud fraction.
    #[serde(default)]
    pub cloud_fraction: Option<f64>,
    /// Minimum fill fraction.
    #[serde(default)]
    pub fill_fraction: Option<f64>,
    /// Minimum valid fraction.
    #[serde(default)]
    pub valid_fraction: Option<f64>,
    /// Inclusive [min, max] solar azimuth in degrees.
    #[serde(default)]
    pub solar_azimuth: Option<[f64; 2]>,
    /// Inclusive [min, max] solar elevation in degrees.
    #[serde(default)]
    pub solar_elevation: Option<[f64; 2]>,
    #[serde(default)]
    pub sat_id: Option<String>,
}

impl SceneFilter {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("cloud fraction", self.cloud_fraction),
            ("fill fraction", self.fill_fraction),
            ("valid fraction", self.valid_fraction),
        ] {
            if let Some(v) = value {
                if !(0.0..=1.0).contains(&v) {
                    return Err(GeolapseError::config(format!("{name} {v} is invalid")));
                }
            }
        }
        for (name, bounds) in [
            ("solar azimuth", self.solar_azimuth),
            ("solar elevation", self.solar_elevation),
        ] {
            if let Some([lo, hi]) = bounds {
                if !(0.0..=360.0).contains(&lo) || !(0.0..=360.0).contains(&hi) {
                    return Err(GeolapseError::config(format!(
                        "{name} angles must be between 0 and 360 deg, got [{lo}, {hi}]"
                    )));
                }
                if lo > hi {
                    return Err(GeolapseError::config(format!(
                        "{name} range [{lo}, {hi}] is inverted"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Whether a scene passes every active filter.
    pub fn accepts(&self, scene: &SceneDescriptor) -> bool {
        at_most(self.cloud_fraction, scene.cloud_fraction)
            && at_least(self.fill_fraction, scene.fill_fraction)
            && at_least(self.valid_fraction, scene.valid_fraction)
            && within(self.solar_azimuth, scene.solar_azimuth_angle)
            && within(self.solar_elevation, scene.solar_elevation_angle)
            && match &self.sat_id {
                None => true,
                Some(want) => scene.sat_id.as_deref() == Some(want.as_str()),
            }
    }
}

fn at_most(limit: Option<f64>, value: Option<f64>) -> bool {
    match limit {
        None => true,
        Some(limit) => value.is_some_and(|v| v <= limit),
    }
}

fn at_least(limit: Option<f64>, value: Option<f64>) -> bool {
    match limit {
        None => true,
        Some(limit) => value.is_some_and(|v| v >= limit),
    }
}

fn within(bounds: Option<[f64; 2]>, value: Option<f64>) -> bool {
    match bounds {
        None => true,
        Some([lo, hi]) => value.is_some_and(|v| (lo..=hi).contains(&v)),
    }
}

/// Keep the scenes that pass `filter`, preserving order.
pub fn apply_filters(scenes: Vec<SceneDescriptor>, filter: &SceneFilter) -> Vec<SceneDescriptor> {
    let before = scenes.len();
    let kept: Vec<SceneDescriptor> = scenes.into_iter().filter(|s| filter.accepts(s)).collect();
    debug!(before, after = kept.len(), "Applied scene filters");
    kept
}
