pub mod assemble;
pub mod display;
pub mod encoder;

pub use assemble::{assemble_animation, make_websafe, websafe_path, AssembleOptions};
pub use display::{crop_to_aspect, render_frames, resize_to, to_rgba};
pub use encoder::{
    AnimationEncoder, BackendError, EncoderBackend, FfmpegEncoder, ImageMagickEncoder,
    NativeGifEncoder, OutputFormat,
};
