pub mod coregister;
pub mod phase_correlation;

pub use coregister::{coregister_frames, luminance_proxy, CoregisterConfig};
pub use phase_correlation::{bilinear_sample, compute_offset};
