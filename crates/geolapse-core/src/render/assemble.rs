use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::consts::MAX_FPS;
use crate::error::{GeolapseError, Result};
use crate::frame::{ensure_uniform_shape, Frame};

use super::display::render_frames;
use super::encoder::{AnimationEncoder, OutputFormat};

#[derive(Clone, Debug, PartialEq)]
pub struct AssembleOptions {
    pub fps: u32,
    /// Final (width, height) in pixels.
    pub outsize: Option<(u32, u32)>,
    /// Crop target as [width, height].
    pub aspect_ratio: Option<[f64; 2]>,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            fps: 1,
            outsize: None,
            aspect_ratio: None,
        }
    }
}

impl AssembleOptions {
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_FPS).contains(&self.fps) {
            return Err(GeolapseError::config(format!(
                "fps {} is outside 1..={MAX_FPS}",
                self.fps
            )));
        }
        if let Some((w, h)) = self.outsize {
            if w == 0 || h == 0 {
                return Err(GeolapseError::config(format!("outsize {w}x{h} is empty")));
            }
        }
        if let Some([w, h]) = self.aspect_ratio {
            if !(w.is_finite() && h.is_finite() && w > 0.0 && h > 0.0) {
                return Err(GeolapseError::config(format!(
                    "aspect ratio {w}:{h} must be positive"
                )));
            }
        }
        Ok(())
    }
}

/// Render frames and hand them to the encoder once, producing `output`.
///
/// The encoder writes a temporary file next to `output`; it is renamed into
/// place only when encoding succeeds, so a failure leaves nothing behind.
pub fn assemble_animation(
    frames: &[Frame],
    encoder: &dyn AnimationEncoder,
    options: &AssembleOptions,
    output: &Path,
    cancel: &CancelToken,
) -> Result<PathBuf> {
    options.validate()?;
    let format = OutputFormat::from_path(output)?;
    ensure_uniform_shape(frames)?;

    let encode_error = |message: String| GeolapseError::Encode {
        path: output.to_path_buf(),
        frames: frames.len(),
        backend: encoder.name().to_string(),
        message,
    };
    if !encoder.supports(format) {
        return Err(encode_error(format!(
            "backend cannot write .{} files",
            format.extension()
        )));
    }

    let images = render_frames(frames, options.aspect_ratio, options.outsize);
    cancel.check()?;

    let dir = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;
    let staging = tempfile::Builder::new()
        .prefix(".geolapse-")
        .suffix(&format!(".{}", format.extension()))
        .tempfile_in(&dir)?;

    info!(
        frames = images.len(),
        fps = options.fps,
        backend = encoder.name(),
        output = %output.display(),
        "Encoding animation"
    );
    encoder
        .encode(&images, options.fps, format, staging.path())
        .map_err(|e| encode_error(e.0))?;

    staging
        .persist(output)
        .map_err(|e| encode_error(format!("failed to move animation into place: {}", e.error)))?;
    Ok(output.to_path_buf())
}

/// `<stem>_websafe.mp4` next to `path`; H.264 output always goes in an MP4 container.
pub fn websafe_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{stem}_websafe.mp4"))
}

/// Re-encode an animation with a conservative H.264 profile for browsers.
pub fn make_websafe(path: &Path, frames: usize) -> Result<PathBuf> {
    let target = websafe_path(path);
    let output = Command::new("ffmpeg")
        .args(["-y", "-loglevel", "error", "-an", "-i"])
        .arg(path)
        .args([
            "-vcodec",
            "libx264",
            "-pix_fmt",
            "yuv420p",
            "-profile:v",
            "baseline",
            "-level",
            "3",
            "-vf",
            "pad=ceil(iw/2)*2:ceil(ih/2)*2",
        ])
        .arg(&target)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output();

    let message = match output {
        Ok(out) if out.status.success() => {
            info!(output = %target.display(), "Wrote websafe copy");
            return Ok(target);
        }
        Ok(out) => format!(
            "ffmpeg exited with {}: {}",
            out.status,
            String::from_utf8_lossy(&out.stderr).trim()
        ),
        Err(e) => format!("failed to spawn ffmpeg: {e}"),
    };
    warn!(error = %message, "Websafe re-encode failed");
    if target.exists() {
        let _ = std::fs::remove_file(&target);
    }
    Err(GeolapseError::Encode {
        path: target,
        frames,
        backend: "ffmpeg".into(),
        message,
    })
}
