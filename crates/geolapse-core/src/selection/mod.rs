pub mod filter;
pub mod sort;

pub use filter::{apply_filters, SceneFilter};
pub use sort::sort_scenes;
