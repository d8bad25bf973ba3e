use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, RgbaImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::error::{GeolapseError, Result};

/// Failure reported by an encoder backend, kept verbatim for the caller.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct BackendError(pub String);

impl From<std::io::Error> for BackendError {
    fn from(e: std::io::Error) -> Self {
        Self(e.to_string())
    }
}

impl From<image::ImageError> for BackendError {
    fn from(e: image::ImageError) -> Self {
        Self(e.to_string())
    }
}

/// Container of the animation, taken from the output file extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Gif,
    Mp4,
}

impl OutputFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("gif") => Ok(Self::Gif),
            Some("mp4") => Ok(Self::Mp4),
            _ => Err(GeolapseError::config(format!(
                "output file {} must end in .gif or .mp4",
                path.display()
            ))),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Gif => "gif",
            Self::Mp4 => "mp4",
        }
    }
}

/// Turns an ordered frame list into one animation file.
pub trait AnimationEncoder: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, _format: OutputFormat) -> bool {
        true
    }

    /// Write `frames` at `fps` to `path`, which may not carry the final file name.
    fn encode(
        &self,
        frames: &[RgbaImage],
        fps: u32,
        format: OutputFormat,
        path: &Path,
    ) -> std::result::Result<(), BackendError>;
}

/// Selectable encoder backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderBackend {
    #[default]
    Ffmpeg,
    Imagemagick,
    Native,
}

impl EncoderBackend {
    pub fn encoder(&self) -> Box<dyn AnimationEncoder> {
        match self {
            Self::Ffmpeg => Box::new(FfmpegEncoder::default()),
            Self::Imagemagick => Box::new(ImageMagickEncoder::default()),
            Self::Native => Box::new(NativeGifEncoder),
        }
    }
}

impl std::str::FromStr for EncoderBackend {
    type Err = GeolapseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ffmpeg" => Ok(Self::Ffmpeg),
            "imagemagick" | "convert" => Ok(Self::Imagemagick),
            "native" => Ok(Self::Native),
            other => Err(GeolapseError::config(format!(
                "unknown encoder backend {other:?} (ffmpeg | imagemagick | native)"
            ))),
        }
    }
}

impl std::fmt::Display for EncoderBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ffmpeg => write!(f, "ffmpeg"),
            Self::Imagemagick => write!(f, "imagemagick"),
            Self::Native => write!(f, "native"),
        }
    }
}

fn frame_size(frames: &[RgbaImage]) -> std::result::Result<(u32, u32), BackendError> {
    let first = frames
        .first()
        .ok_or_else(|| BackendError("no frames to encode".into()))?;
    let size = first.dimensions();
    if let Some(bad) = frames.iter().position(|f| f.dimensions() != size) {
        return Err(BackendError(format!(
            "frame {bad} is {:?}, expected {:?}",
            frames[bad].dimensions(),
            size
        )));
    }
    Ok(size)
}

/// Pads odd dimensions up by one pixel; yuv420p needs even sizes.
const EVEN_PAD_FILTER: &str = "pad=ceil(iw/2)*2:ceil(ih/2)*2";

/// Pipes raw RGBA frames into the system `ffmpeg` binary.
#[derive(Clone, Debug)]
pub struct FfmpegEncoder {
    pub program: PathBuf,
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
        }
    }
}

impl AnimationEncoder for FfmpegEncoder {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn encode(
        &self,
        frames: &[RgbaImage],
        fps: u32,
        format: OutputFormat,
        path: &Path,
    ) -> std::result::Result<(), BackendError> {
        let (w, h) = frame_size(frames)?;

        let mut cmd = Command::new(&self.program);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd.args([
            "-y",
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-s",
            &format!("{w}x{h}"),
            "-r",
            &fps.to_string(),
            "-i",
            "pipe:0",
            "-an",
        ]);
        match format {
            OutputFormat::Mp4 => cmd.args([
                "-vf",
                EVEN_PAD_FILTER,
                "-c:v",
                "libx264",
                "-pix_fmt",
                "yuv420p",
                "-movflags",
                "+faststart",
                "-f",
                "mp4",
            ]),
            OutputFormat::Gif => cmd.args(["-loop", "0", "-f", "gif"]),
        };
        cmd.arg(path);

        let mut child = cmd.spawn().map_err(|e| {
            BackendError(format!(
                "failed to spawn {} (is it installed and on PATH?): {e}",
                self.program.display()
            ))
        })?;

        let written = match child.stdin.take() {
            Some(stdin) => {
                let mut stdin = BufWriter::new(stdin);
                frames
                    .iter()
                    .try_for_each(|frame| stdin.write_all(frame.as_raw()))
                    .and_then(|_| stdin.flush())
            }
            None => Err(std::io::Error::other("ffmpeg stdin unavailable")),
        };

        // Always reap the child; its stderr explains a broken pipe better than we can.
        let output = child
            .wait_with_output()
            .map_err(|e| BackendError(format!("failed to wait for ffmpeg: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackendError(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        written.map_err(|e| BackendError(format!("failed to write frames to ffmpeg: {e}")))?;
        debug!(frames = frames.len(), "ffmpeg finished");
        Ok(())
    }
}

/// Writes PNG frames to a scratch directory and joins them with ImageMagick `convert`.
#[derive(Clone, Debug)]
pub struct ImageMagickEncoder {
    pub program: PathBuf,
}

impl Default for ImageMagickEncoder {
    fn default() -> Self {
        Self {
            program: PathBuf::from("convert"),
        }
    }
}

impl AnimationEncoder for ImageMagickEncoder {
    fn name(&self) -> &str {
        "imagemagick"
    }

    fn encode(
        &self,
        frames: &[RgbaImage],
        fps: u32,
        format: OutputFormat,
        path: &Path,
    ) -> std::result::Result<(), BackendError> {
        frame_size(frames)?;
        let scratch = tempfile::tempdir()?;
        let mut inputs = Vec::with_capacity(frames.len());
        for (i, frame) in frames.iter().enumerate() {
            let file = scratch.path().join(format!("frame_{i:05}.png"));
            frame.save_with_format(&file, image::ImageFormat::Png)?;
            inputs.push(file);
        }

        // Delay is in ticks of 1/100 s.
        let delay = (100 / fps.max(1)).max(1);
        let target = format!("{}:{}", format.extension(), path.display());
        let output = Command::new(&self.program)
            .arg("-delay")
            .arg(delay.to_string())
            .args(["-loop", "0", "-dispose", "previous"])
            .args(&inputs)
            .arg(target)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| {
                BackendError(format!(
                    "failed to run {} (is ImageMagick installed?): {e}",
                    self.program.display()
                ))
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackendError(format!(
                "convert exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// In-process GIF encoder built on the `image` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct NativeGifEncoder;

impl AnimationEncoder for NativeGifEncoder {
    fn name(&self) -> &str {
        "native"
    }

    fn supports(&self, format: OutputFormat) -> bool {
        format == OutputFormat::Gif
    }

    fn encode(
        &self,
        frames: &[RgbaImage],
        fps: u32,
        format: OutputFormat,
        path: &Path,
    ) -> std::result::Result<(), BackendError> {
        if format != OutputFormat::Gif {
            return Err(BackendError("native backend only writes GIF".into()));
        }
        frame_size(frames)?;
        let file = BufWriter::new(File::create(path)?);
        let mut encoder = GifEncoder::new_with_speed(file, 10);
        encoder.set_repeat(Repeat::Infinite)?;
        let delay = Delay::from_numer_denom_ms(1000, fps.max(1));
        encoder.encode_frames(
            frames
                .iter()
                .map(|f| image::Frame::from_parts(f.clone(), 0, 0, delay)),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_follows_extension() {
        assert_eq!(OutputFormat::from_path(Path::new("a/b.GIF")).unwrap(), OutputFormat::Gif);
        assert_eq!(OutputFormat::from_path(Path::new("b.mp4")).unwrap(), OutputFormat::Mp4);
        assert!(OutputFormat::from_path(Path::new("b.avi")).is_err());
        assert!(OutputFormat::from_path(Path::new("b")).is_err());
    }

    #[test]
    fn mismatched_frames_are_rejected() {
        let frames = vec![RgbaImage::new(4, 4), RgbaImage::new(4, 5)];
        assert!(frame_size(&frames).is_err());
        assert!(frame_size(&[]).is_err());
    }

    #[test]
    fn backend_names_parse() {
        assert_eq!("native".parse::<EncoderBackend>().unwrap(), EncoderBackend::Native);
        assert!("gifski".parse::<EncoderBackend>().is_err());
    }
}
