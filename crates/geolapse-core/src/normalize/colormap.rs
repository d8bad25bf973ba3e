use ndarray::{Array3, Axis};
use serde::{Deserialize, Serialize};

use crate::consts::DISPLAY_CHANNEL_COUNT;
use crate::error::{GeolapseError, Result};
use crate::frame::Frame;

/// Colormap for single-band stacks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Colormap {
    #[default]
    Gray,
    Viridis,
    Magma,
    Inferno,
    Plasma,
}

// Control points at 0, 0.25, 0.5, 0.75, 1; linear in between.
const VIRIDIS: [[f32; 3]; 5] = [
    [0.2670, 0.0049, 0.3294],
    [0.2297, 0.3224, 0.5457],
    [0.1276, 0.5669, 0.5506],
    [0.3692, 0.7889, 0.3829],
    [0.9932, 0.9062, 0.1439],
];
const MAGMA: [[f32; 3]; 5] = [
    [0.0015, 0.0005, 0.0139],
    [0.2316, 0.0599, 0.4377],
    [0.7163, 0.2150, 0.4753],
    [0.9876, 0.5364, 0.3822],
    [0.9871, 0.9914, 0.7495],
];
const INFERNO: [[f32; 3]; 5] = [
    [0.0015, 0.0005, 0.0139],
    [0.2582, 0.0386, 0.4065],
    [0.7354, 0.2155, 0.3300],
    [0.9882, 0.6450, 0.0399],
    [0.9884, 0.9984, 0.6449],
];
const PLASMA: [[f32; 3]; 5] = [
    [0.0504, 0.0298, 0.5280],
    [0.4943, 0.0122, 0.6579],
    [0.7981, 0.2802, 0.4697],
    [0.9731, 0.5855, 0.2511],
    [0.9400, 0.9752, 0.1313],
];

impl Colormap {
    pub const ALL: [Colormap; 5] = [
        Self::Gray,
        Self::Viridis,
        Self::Magma,
        Self::Inferno,
        Self::Plasma,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Gray => "gray",
            Self::Viridis => "viridis",
            Self::Magma => "magma",
            Self::Inferno => "inferno",
            Self::Plasma => "plasma",
        }
    }

    /// RGB for a value in [0, 1]; out-of-range input is clamped.
    pub fn rgb(&self, value: f32) -> [f32; 3] {
        let v = if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.0 };
        let table = match self {
            Self::Gray => return [v, v, v],
            Self::Viridis => &VIRIDIS,
            Self::Magma => &MAGMA,
            Self::Inferno => &INFERNO,
            Self::Plasma => &PLASMA,
        };
        let pos = v * (table.len() - 1) as f32;
        let lo = (pos.floor() as usize).min(table.len() - 2);
        let t = pos - lo as f32;
        let (a, b) = (table[lo], table[lo + 1]);
        [
            a[0] + (b[0] - a[0]) * t,
            a[1] + (b[1] - a[1]) * t,
            a[2] + (b[2] - a[2]) * t,
        ]
    }
}

impl std::str::FromStr for Colormap {
    type Err = GeolapseError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_ascii_lowercase();
        let lower = if lower == "grey" { "gray".to_string() } else { lower };
        Self::ALL
            .into_iter()
            .find(|c| c.name() == lower)
            .ok_or_else(|| {
                GeolapseError::config(format!(
                    "could not retrieve colormap {s:?} (gray | viridis | magma | inferno | plasma)"
                ))
            })
    }
}

impl std::fmt::Display for Colormap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Expand single-band frames to three channels; other frames pass through.
///
/// Masked pixels stay 0 in every channel.
pub fn apply_colormap(frame: &Frame, cmap: Colormap) -> Frame {
    if frame.band_count() != 1 {
        return frame.clone();
    }
    let band = frame.band(0);
    let mut data = Array3::<f32>::zeros((frame.height(), frame.width(), DISPLAY_CHANNEL_COUNT));
    for ((row, col), &v) in band.indexed_iter() {
        if !frame.is_valid(row, col) {
            continue;
        }
        let rgb = cmap.rgb(v);
        let mut px = data.index_axis_mut(Axis(0), row);
        let mut px = px.index_axis_mut(Axis(0), col);
        px[0] = rgb[0];
        px[1] = rgb[1];
        px[2] = rgb[2];
    }
    Frame {
        data,
        ..frame.clone()
    }
}
