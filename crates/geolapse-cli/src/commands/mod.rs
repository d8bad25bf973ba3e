pub mod config;
pub mod flags;
pub mod pipeline;
pub mod scenes;
