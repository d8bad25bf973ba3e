pub mod colormap;
pub mod scale;

pub use colormap::{apply_colormap, Colormap};
pub use scale::{compute_scale_spec, normalize_frames, percentile, BandScale, ScaleMode, ScaleSpec};
