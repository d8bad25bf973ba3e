//! Optional files written next to the animation.

pub mod bbox;
pub mod summary;
pub mod tiff;

use std::path::{Path, PathBuf};

pub use bbox::write_bbox_geojson;
pub use summary::{render_summary, write_summary};
pub use tiff::{export_frame_tiffs, save_frame_tiff};

/// `<dir>/<stem><suffix>` for an animation at `output`.
pub fn sibling_path(output: &Path, suffix: &str) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "animation".to_string());
    output.with_file_name(format!("{stem}{suffix}"))
}
