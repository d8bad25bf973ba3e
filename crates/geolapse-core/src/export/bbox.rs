use std::path::Path;

use serde_json::{json, Value};

use crate::error::Result;
use crate::geometry::ResolvedGeometry;

/// FeatureCollection holding the area footprint, with its bbox as a property.
pub fn bbox_feature_collection(grid: &ResolvedGeometry) -> Value {
    let b = grid.bbox;
    json!({
        "type": "FeatureCollection",
        "features": [{
            "type": "Feature",
            "properties": {
                "bbox": [b.min_lon, b.min_lat, b.max_lon, b.max_lat],
                "rows": grid.rows,
                "cols": grid.cols,
                "resolution": grid.resolution,
            },
            "geometry": grid.footprint,
        }]
    })
}

pub fn write_bbox_geojson(grid: &ResolvedGeometry, path: &Path) -> Result<()> {
    let text = serde_json::to_string_pretty(&bbox_feature_collection(grid))?;
    std::fs::write(path, text)?;
    Ok(())
}
