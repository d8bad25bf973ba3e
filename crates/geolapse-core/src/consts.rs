/// Minimum bucket count to rasterize on the rayon pool instead of inline.
pub const PARALLEL_BUCKET_THRESHOLD: usize = 2;

/// Minimum frame count to use frame-level Rayon parallelism.
pub const PARALLEL_FRAME_THRESHOLD: usize = 4;

/// Small epsilon to avoid division by zero in floating-point comparisons.
pub const EPSILON: f32 = 1e-10;

/// ITU-R BT.601 luminance coefficient for the red channel.
pub const LUMINANCE_R: f32 = 0.299;

/// ITU-R BT.601 luminance coefficient for the green channel.
pub const LUMINANCE_G: f32 = 0.587;

/// ITU-R BT.601 luminance coefficient for the blue channel.
pub const LUMINANCE_B: f32 = 0.114;

/// Number of channels in a displayed frame (R, G, B).
pub const DISPLAY_CHANNEL_COUNT: usize = 3;

/// Name of the band that carries per-pixel validity.
pub const ALPHA_BAND: &str = "alpha";

/// Upper bound on scenes per rasterization call.
pub const MAX_RASTER_LEN: usize = 500;

/// Default scenes per rasterization call.
pub const DEFAULT_RASTER_LEN: usize = 500;

/// Attempts per rasterization batch before the bucket is dropped.
pub const RASTER_ATTEMPTS: usize = 3;

/// Base delay between rasterization retries; multiplied by the attempt number.
pub const RASTER_RETRY_BACKOFF_MS: u64 = 250;

/// How often a pending remote call checks for cancellation, in milliseconds.
pub const CANCEL_POLL_MS: u64 = 100;

/// Default timeout for a single remote call.
pub const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 120;

/// Default low/high percentiles for display rescaling.
pub const DEFAULT_RESCALE_PERCENTILES: [f64; 2] = [2.0, 98.0];

/// Largest accepted frame rate.
pub const MAX_FPS: u32 = 30;

/// Proxy images with a standard deviation below this are treated as featureless.
pub const MIN_REGISTRATION_STDDEV: f64 = 1e-6;

/// Minimum valid-pixel fraction for a frame to take part in registration.
pub const MIN_REGISTRATION_COVERAGE: f64 = 0.05;

/// Metres per degree of latitude (spherical approximation).
pub const METERS_PER_DEGREE: f64 = 111_320.0;
