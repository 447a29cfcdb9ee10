use std::time::Duration;

use image::RgbaImage;
use ndarray::ArrayView3;

use crate::shared::error::{MediaError, MediaResult};

const NANOS_PER_SECOND: u128 = 1_000_000_000;

/// Payload carried by a [`Frame`].
///
/// Retiming and reversal are no-ops for pixel data; audio overrides them
/// because its samples encode time themselves.
pub trait FrameContent: Clone + Send + Sync + 'static {
    /// Adjusts the payload for playback at `speed` times the original rate.
    fn retimed(self, _speed: f64) -> Self {
        self
    }

    /// Adjusts the payload for backwards playback.
    fn reversed(self) -> Self {
        self
    }
}

impl FrameContent for RgbaImage {}

impl<A: FrameContent, B: FrameContent> FrameContent for (A, B) {
    fn retimed(self, speed: f64) -> Self {
        (self.0.retimed(speed), self.1.retimed(speed))
    }

    fn reversed(self) -> Self {
        (self.0.reversed(), self.1.reversed())
    }
}

/// One timestamped unit of media content.
///
/// Transforms consume the frame and return a new one; nothing is mutated
/// in place.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame<C> {
    content: C,
    duration: Duration,
    timestamp: Duration,
}

pub type ImageFrame = Frame<RgbaImage>;

impl<C> Frame<C> {
    pub fn new(content: C, duration: Duration, timestamp: Duration) -> Self {
        Self {
            content,
            duration,
            timestamp,
        }
    }

    pub fn content(&self) -> &C {
        &self.content
    }

    pub fn into_content(self) -> C {
        self.content
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    /// End of this frame's validity interval.
    pub fn end(&self) -> Duration {
        self.timestamp + self.duration
    }

    pub fn contains(&self, timestamp: Duration) -> bool {
        self.timestamp <= timestamp && timestamp < self.end()
    }

    pub fn with_timestamp(self, timestamp: Duration) -> Self {
        Self { timestamp, ..self }
    }

    pub fn with_duration(self, duration: Duration) -> Self {
        Self { duration, ..self }
    }

    pub fn map<D>(self, f: impl FnOnce(C) -> D) -> Frame<D> {
        Frame {
            content: f(self.content),
            duration: self.duration,
            timestamp: self.timestamp,
        }
    }

    pub fn try_map<D, E>(self, f: impl FnOnce(C) -> Result<D, E>) -> Result<Frame<D>, E> {
        Ok(Frame {
            content: f(self.content)?,
            duration: self.duration,
            timestamp: self.timestamp,
        })
    }
}

impl<C: FrameContent> Frame<C> {
    /// Plays the frame `speed` times faster: timestamp and duration shrink.
    pub fn change_speed(self, speed: f64) -> Self {
        Self {
            content: self.content.retimed(speed),
            duration: self.duration.div_f64(speed),
            timestamp: self.timestamp.div_f64(speed),
        }
    }

    /// Mirrors the frame's interval within a stream of `total` length.
    pub fn reverse_within(self, total: Duration) -> Self {
        let timestamp = total.saturating_sub(self.end());
        Self {
            content: self.content.reversed(),
            duration: self.duration,
            timestamp,
        }
    }
}

impl ImageFrame {
    pub fn width(&self) -> u32 {
        self.content.width()
    }

    pub fn height(&self) -> u32 {
        self.content.height()
    }

    pub fn as_ndarray(&self) -> MediaResult<ArrayView3<'_, u8>> {
        pixel_view(&self.content)
    }
}

/// Pixel view shaped `(height, width, 4)`.
pub fn pixel_view(image: &RgbaImage) -> MediaResult<ArrayView3<'_, u8>> {
    let (width, height) = image.dimensions();
    let shape = (height as usize, width as usize, 4);
    let pixels = image
        .as_raw()
        .get(..shape.0 * shape.1 * shape.2)
        .ok_or_else(|| MediaError::FrameProcessing(format!("pixel buffer smaller than {width}x{height}")))?;
    ArrayView3::from_shape(shape, pixels)
        .map_err(|e| MediaError::FrameProcessing(format!("cannot view {width}x{height} frame: {e}")))
}

/// Reduces `timestamp` modulo `duration`, so readers behave as endlessly
/// looping sources. A zero duration maps everything to zero.
pub fn wrap_timestamp(timestamp: Duration, duration: Duration) -> Duration {
    let total = duration.as_nanos();
    if total == 0 {
        return Duration::ZERO;
    }
    let wrapped = timestamp.as_nanos() % total;
    // `wrapped` is below a Duration's nanos, so its whole seconds fit.
    let secs = u64::try_from(wrapped / NANOS_PER_SECOND).unwrap_or(u64::MAX);
    Duration::new(secs, (wrapped % NANOS_PER_SECOND) as u32)
}
