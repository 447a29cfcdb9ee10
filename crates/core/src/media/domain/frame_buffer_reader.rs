use std::sync::Arc;
use std::time::Duration;

use crate::media::domain::media_reader::{FrameIter, MediaReader, SharedReader};
use crate::media::domain::speed_reader::SpeedReader;
use crate::shared::error::{MediaError, MediaResult};
use crate::shared::frame::{wrap_timestamp, Frame, FrameContent};
use crate::shared::media_info::MediaInfo;

/// Serves frames that are already decoded and held in memory.
///
/// Backs the GIF and WebP readers and materialized reversals of streaming
/// readers. Frames must be ordered by timestamp and contiguous.
pub struct FrameBufferReader<C> {
    frames: Arc<[Frame<C>]>,
    info: MediaInfo,
}

impl<C: FrameContent> FrameBufferReader<C> {
    /// Builds a reader over `frames`. `info.frame_count`, `duration` and
    /// `frame_duration` are recomputed from the frames; the minimum frame
    /// duration is reported for variable-rate input.
    pub fn new(frames: Vec<Frame<C>>, info: MediaInfo) -> Self {
        let duration = frames.last().map(Frame::end).unwrap_or_default();
        let frame_duration = frames
            .iter()
            .map(Frame::duration)
            .min()
            .unwrap_or_default();
        let info = MediaInfo {
            frame_count: frames.len(),
            duration,
            frame_duration,
            ..info
        };
        Self {
            frames: frames.into(),
            info,
        }
    }

    pub fn frame_at(&self, index: usize) -> Option<&Frame<C>> {
        self.frames.get(index)
    }

    fn index_for(&self, timestamp: Duration) -> Option<usize> {
        let timestamp = wrap_timestamp(timestamp, self.info.duration);
        let after = self.frames.partition_point(|f| f.timestamp() <= timestamp);
        after.checked_sub(1)
    }
}

impl<C: FrameContent> MediaReader<C> for FrameBufferReader<C> {
    fn info(&self) -> &MediaInfo {
        &self.info
    }

    fn read_frame(&self, timestamp: Duration) -> MediaResult<Frame<C>> {
        self.index_for(timestamp)
            .map(|i| self.frames[i].clone())
            .ok_or(MediaError::NoSuchFrame(timestamp))
    }

    fn frames(&self) -> FrameIter<'_, C> {
        Box::new(self.frames.iter().cloned().map(Ok))
    }

    fn reversed(self: Arc<Self>) -> MediaResult<SharedReader<C>> {
        let total = self.info.duration;
        let frames = self
            .frames
            .iter()
            .rev()
            .map(|f| f.clone().reverse_within(total))
            .collect();
        Ok(Arc::new(FrameBufferReader::new(frames, self.info.clone())))
    }

    fn change_speed(self: Arc<Self>, multiplier: f64) -> MediaResult<SharedReader<C>> {
        Ok(Arc::new(SpeedReader::<C>::new(self, multiplier)?))
    }
}
