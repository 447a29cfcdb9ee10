use std::time::Duration;

/// Raster formats handled by the static image writer and reader.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];

pub const GIF_EXTENSION: &str = "gif";

/// Container used when the caller does not name one.
pub const DEFAULT_CONTAINER: &str = "mp4";

/// Nominal display length of a still image.
pub const STILL_FRAME_DURATION: Duration = Duration::from_secs(1);

/// Longest edge of video output, in pixels.
pub const MAX_VIDEO_DIMENSION: u32 = 1280;

/// Longest edge of animated GIF output, in pixels.
pub const MAX_GIF_DIMENSION: u32 = 480;

/// Bits per pixel per frame used to derive the video bitrate.
pub const BITS_PER_PIXEL: f64 = 0.1;

/// Upper bound for the audio bitrate, in bits per second.
pub const DEFAULT_AUDIO_BITRATE: usize = 128_000;

/// Audio frames arriving faster than this (frames per second) are dropped.
pub const MAX_AUDIO_FRAME_RATE: f64 = 1000.0;

/// Sample rates accepted by the Opus encoder.
pub const OPUS_SAMPLE_RATES: &[u32] = &[8_000, 12_000, 16_000, 24_000, 48_000];

/// Encode attempts before an oversized result is returned as-is.
pub const MAX_ENCODE_ATTEMPTS: usize = 3;

/// Upper bound of the resize ratio chosen after an oversized attempt.
pub const MAX_RETRY_RESIZE_RATIO: f64 = 0.9;

/// Colour difference below which a GIF pixel is treated as unchanged.
pub const GIF_COLOR_TOLERANCE: f64 = 8.0;

/// NeuQuant sampling speed for GIF quantisation (1 = best, 30 = fastest).
pub const GIF_QUANTIZE_SPEED: i32 = 10;

/// Shortest GIF frame delay honoured by browsers, in centiseconds.
pub const MIN_GIF_DELAY_CS: u16 = 2;

/// Delay used in place of GIF delays below [`MIN_GIF_DELAY_CS`].
pub const DEFAULT_GIF_DELAY_CS: u16 = 10;
