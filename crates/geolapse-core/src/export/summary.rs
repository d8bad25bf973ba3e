use std::fmt::Write as _;
use std::path::Path;

use crate::error::Result;
use crate::pipeline::RunSummary;
use crate::scene::SceneDescriptor;

fn metric(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.3}"))
}

fn scene_line(scene: &SceneDescriptor) -> String {
    format!(
        "    {}  acquired={}  product={}  sat={}  cloud={}  fill={}  valid={}  sun_az={}  sun_el={}",
        scene.id,
        scene.acquired.to_rfc3339(),
        scene.product,
        scene.sat_id.as_deref().unwrap_or("-"),
        metric(scene.cloud_fraction),
        metric(scene.fill_fraction),
        metric(scene.valid_fraction),
        metric(scene.solar_azimuth_angle),
        metric(scene.solar_elevation_angle),
    )
}

/// Plain-text report of the area, every frame's scenes, and anything left out.
pub fn render_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    let b = summary.bbox;
    // Writing to a String cannot fail.
    let _ = writeln!(out, "Animation: {}", summary.output.display());
    let _ = writeln!(
        out,
        "Bounding box (lon/lat): {:.6} {:.6} {:.6} {:.6}",
        b.min_lon, b.min_lat, b.max_lon, b.max_lat
    );
    let _ = writeln!(
        out,
        "Frames: {}  Scenes: {}",
        summary.frame_count,
        summary.scene_count()
    );
    for (i, scale) in summary.scales.bands.iter().enumerate() {
        let _ = writeln!(out, "Band {i} display range: [{}, {}]", scale.min, scale.max);
    }

    let _ = writeln!(out, "\nScene groups:");
    for (i, bucket) in summary.buckets.iter().enumerate() {
        let _ = writeln!(out, "  [{i}] {} ({} scenes)", bucket.label(), bucket.len());
        for scene in &bucket.scenes {
            let _ = writeln!(out, "{}", scene_line(scene));
        }
    }

    if !summary.failed.is_empty() {
        let _ = writeln!(out, "\nDropped (rasterization failed):");
        for dropped in &summary.failed {
            let _ = writeln!(
                out,
                "  {} [{}]: {}",
                dropped.key,
                dropped.scene_ids.join(", "),
                dropped.reason
            );
        }
    }
    if !summary.filtered.is_empty() {
        let _ = writeln!(out, "\nDiscarded (low coverage):");
        for dropped in &summary.filtered {
            let _ = writeln!(out, "  {}: {}", dropped.key, dropped.reason);
        }
    }
    if !summary.warnings.is_empty() {
        let _ = writeln!(out, "\nRegistration warnings:");
        for (key, warning) in &summary.warnings {
            let _ = writeln!(out, "  {}: {warning}", key.format("%Y-%m-%dT%H:%M:%SZ"));
        }
    }
    out
}

pub fn write_summary(summary: &RunSummary, path: &Path) -> Result<()> {
    std::fs::write(path, render_summary(summary))?;
    Ok(())
}
