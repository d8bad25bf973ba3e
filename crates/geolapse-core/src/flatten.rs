use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GeolapseError, Result};
use crate::scene::SceneDescriptor;

/// Timestamp truncation unit used to merge scenes into one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlattenGranularity {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
}

impl FlattenGranularity {
    /// Drop every calendar component finer than this unit.
    pub fn truncate(&self, instant: &DateTime<Utc>) -> DateTime<Utc> {
        let g = *self;
        let month = if g >= Self::Month { instant.month() } else { 1 };
        let day = if g >= Self::Day { instant.day() } else { 1 };
        let hour = if g >= Self::Hour { instant.hour() } else { 0 };
        let minute = if g >= Self::Minute { instant.minute() } else { 0 };
        let second = if g >= Self::Second { instant.second() } else { 0 };
        Utc.with_ymd_and_hms(instant.year(), month, day, hour, minute, second)
            .single()
            .unwrap_or(*instant)
    }
}

impl std::str::FromStr for FlattenGranularity {
    type Err = GeolapseError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "year" => Ok(Self::Year),
            "month" => Ok(Self::Month),
            "day" => Ok(Self::Day),
            "hour" => Ok(Self::Hour),
            "minute" => Ok(Self::Minute),
            "second" => Ok(Self::Second),
            other => Err(GeolapseError::config(format!(
                "flatten {other:?} is an invalid option (year | month | day | hour | minute | second)"
            ))),
        }
    }
}

impl std::fmt::Display for FlattenGranularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Year => "year",
            Self::Month => "month",
            Self::Day => "day",
            Self::Hour => "hour",
            Self::Minute => "minute",
            Self::Second => "second",
        };
        f.write_str(name)
    }
}

/// Non-empty run of scenes that become a single frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Bucket {
    pub key: DateTime<Utc>,
    pub scenes: Vec<SceneDescriptor>,
}

impl Bucket {
    pub fn scene_ids(&self) -> Vec<String> {
        self.scenes.iter().map(|s| s.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    /// Label used in logs, summaries and error messages.
    pub fn label(&self) -> String {
        self.key.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }
}

/// Group sorted scenes into buckets.
///
/// Without a granularity each scene is its own bucket. With one, adjacent scenes
/// sharing a truncated acquisition time merge. Grouping only looks at neighbours,
/// so a sort on anything but time can produce several buckets with equal keys.
pub fn flatten(scenes: Vec<SceneDescriptor>, granularity: Option<FlattenGranularity>) -> Vec<Bucket> {
    let Some(granularity) = granularity else {
        return scenes
            .into_iter()
            .map(|scene| Bucket {
                key: scene.acquired,
                scenes: vec![scene],
            })
            .collect();
    };

    let mut buckets: Vec<Bucket> = Vec::new();
    for scene in scenes {
        let key = granularity.truncate(&scene.acquired);
        match buckets.last_mut() {
            Some(last) if last.key == key => last.scenes.push(scene),
            _ => buckets.push(Bucket {
                key,
                scenes: vec![scene],
            }),
        }
    }
    debug!(%granularity, buckets = buckets.len(), "Flattened scenes");
    buckets
}
