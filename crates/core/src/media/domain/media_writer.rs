use std::time::Duration;

use crate::media::domain::audio_samples::AudioFrame;
use crate::shared::error::MediaResult;
use crate::shared::frame::ImageFrame;
use crate::shared::loop_count::LoopCount;
use crate::shared::media_info::AudioFormat;

/// Abstracts encoding so the pipeline can write output without depending
/// on a specific codec library.
///
/// Callers push image frames in timestamp order, then audio frames in
/// timestamp order, then call [`close`](MediaWriter::close) to finalize.
pub trait MediaWriter: Send {
    fn write_image_frame(&mut self, frame: ImageFrame) -> MediaResult<()>;

    /// Ignored by writers that do not support audio.
    fn write_audio_frame(&mut self, frame: AudioFrame) -> MediaResult<()>;

    /// True when only the first image frame ends up in the output.
    fn is_static(&self) -> bool {
        false
    }

    fn supports_audio(&self) -> bool {
        false
    }

    /// Flushes pending frames and finalizes the container. Writing after
    /// close is an error; closing twice is not.
    fn close(&mut self) -> MediaResult<()>;
}

/// What a writer needs to know about the output before the first frame.
#[derive(Clone, Debug, PartialEq)]
pub struct WriterSettings {
    /// Byte budget for the output; 0 means unbounded.
    pub max_file_size: u64,
    /// Expected length of the output, used to size bitrates.
    pub duration: Duration,
    /// Format of the audio that will be written, if any.
    pub audio: Option<AudioFormat>,
    pub loop_count: LoopCount,
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            max_file_size: 0,
            duration: Duration::ZERO,
            audio: None,
            loop_count: LoopCount::Forever,
        }
    }
}
