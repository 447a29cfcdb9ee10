use std::sync::Arc;
use std::time::Duration;

use image::RgbaImage;

use crate::media::domain::audio_samples::AudioSamples;
use crate::shared::error::{MediaError, MediaResult};
use crate::shared::frame::{Frame, FrameContent};
use crate::shared::loop_count::LoopCount;
use crate::shared::media_info::{AudioFormat, MediaInfo};

pub type FrameIter<'a, C> = Box<dyn Iterator<Item = MediaResult<Frame<C>>> + 'a>;

pub type SharedReader<C> = Arc<dyn MediaReader<C>>;
pub type ImageReader = SharedReader<RgbaImage>;
pub type AudioReader = SharedReader<AudioSamples>;

/// A pull-based, seekable, repeatable source of frames.
///
/// Timestamps passed to [`read_frame`](MediaReader::read_frame) are circular:
/// they are reduced modulo [`duration`](MediaReader::duration), so every
/// reader behaves like an endlessly looping source. Each call to
/// [`frames`](MediaReader::frames) starts an independent pass.
pub trait MediaReader<C: FrameContent>: Send + Sync {
    fn info(&self) -> &MediaInfo;

    /// Returns the frame whose interval contains `timestamp` (mod duration).
    fn read_frame(&self, timestamp: Duration) -> MediaResult<Frame<C>>;

    /// Lazily yields every frame in order.
    fn frames(&self) -> FrameIter<'_, C>;

    /// A reader playing this one backwards. Does not modify `self`.
    fn reversed(self: Arc<Self>) -> MediaResult<SharedReader<C>>;

    /// A reader playing this one `multiplier` times faster.
    fn change_speed(self: Arc<Self>, multiplier: f64) -> MediaResult<SharedReader<C>>;

    /// Releases native or file resources. Safe to call repeatedly.
    fn close(&self) {}

    fn frame_count(&self) -> usize {
        self.info().frame_count
    }

    fn frame_rate(&self) -> f64 {
        self.info().frame_rate()
    }

    fn duration(&self) -> Duration {
        self.info().duration
    }

    fn frame_duration(&self) -> Duration {
        self.info().frame_duration
    }

    fn width(&self) -> u32 {
        self.info().width
    }

    fn height(&self) -> u32 {
        self.info().height
    }

    fn audio_format(&self) -> Option<AudioFormat> {
        self.info().audio
    }

    fn audio_channels(&self) -> u16 {
        self.info().audio.map(|a| a.channels).unwrap_or(0)
    }

    fn audio_sample_rate(&self) -> u32 {
        self.info().audio.map(|a| a.sample_rate).unwrap_or(0)
    }

    fn audio_bitrate(&self) -> usize {
        self.info().audio.map(|a| a.bitrate).unwrap_or(0)
    }

    fn loop_count(&self) -> LoopCount {
        self.info().loop_count
    }
}

pub(crate) fn validate_speed(multiplier: f64) -> MediaResult<()> {
    if multiplier.is_finite() && multiplier > 0.0 {
        Ok(())
    } else {
        Err(MediaError::InvalidArgument(format!(
            "speed multiplier must be positive and finite, got {multiplier}"
        )))
    }
}

/// Collects every frame of `reader`, stopping at the first error.
pub fn collect_frames<C, R>(reader: &R) -> MediaResult<Vec<Frame<C>>>
where
    C: FrameContent,
    R: MediaReader<C> + ?Sized,
{
    reader.frames().collect()
}
