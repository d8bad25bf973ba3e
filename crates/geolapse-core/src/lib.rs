pub mod align;
pub mod cancel;
pub mod catalog;
pub mod consts;
pub mod error;
pub mod export;
pub mod flatten;
pub mod frame;
pub mod geometry;
pub mod normalize;
pub mod pipeline;
pub mod raster;
pub mod render;
pub mod scene;
pub mod selection;
