use std::sync::Arc;
use std::time::Duration;

use crate::media::domain::media_reader::{validate_speed, FrameIter, MediaReader, SharedReader};
use crate::shared::error::{MediaError, MediaResult};
use crate::shared::frame::{wrap_timestamp, Frame, FrameContent};
use crate::shared::media_info::MediaInfo;

/// Resamples a variable-rate reader onto a fixed frame grid.
///
/// A requested timestamp is floored to the nearest lower multiple of the
/// target frame duration before the source is sampled.
pub struct ConstantRateReader<C> {
    source: SharedReader<C>,
    info: MediaInfo,
}

impl<C: FrameContent> ConstantRateReader<C> {
    pub fn new(source: SharedReader<C>, frame_duration: Duration) -> MediaResult<Self> {
        if frame_duration.is_zero() {
            return Err(MediaError::InvalidArgument(
                "frame duration must be positive".into(),
            ));
        }
        let duration = source.duration();
        let frame_count = duration.as_nanos().div_ceil(frame_duration.as_nanos()) as usize;
        let info = MediaInfo {
            frame_count,
            frame_duration,
            duration,
            ..source.info().clone()
        };
        Ok(Self { source, info })
    }

    fn grid_point(&self, timestamp: Duration) -> Duration {
        let local = wrap_timestamp(timestamp, self.info.duration);
        let step = self.info.frame_duration.as_nanos();
        Duration::from_nanos((local.as_nanos() / step * step) as u64)
    }
}

impl<C: FrameContent> MediaReader<C> for ConstantRateReader<C> {
    fn info(&self) -> &MediaInfo {
        &self.info
    }

    fn read_frame(&self, timestamp: Duration) -> MediaResult<Frame<C>> {
        let grid = self.grid_point(timestamp);
        let frame = self.source.read_frame(grid)?;
        Ok(frame
            .with_timestamp(grid)
            .with_duration(self.info.frame_duration))
    }

    fn frames(&self) -> FrameIter<'_, C> {
        let step = self.info.frame_duration;
        Box::new((0..self.info.frame_count).map(move |i| self.read_frame(step * i as u32)))
    }

    fn reversed(self: Arc<Self>) -> MediaResult<SharedReader<C>> {
        let source = self.source.clone().reversed()?;
        Ok(Arc::new(ConstantRateReader::new(
            source,
            self.info.frame_duration,
        )?))
    }

    fn change_speed(self: Arc<Self>, multiplier: f64) -> MediaResult<SharedReader<C>> {
        validate_speed(multiplier)?;
        let source = self.source.clone().change_speed(multiplier)?;
        Ok(Arc::new(ConstantRateReader::new(
            source,
            self.info.frame_duration.div_f64(multiplier),
        )?))
    }

    fn close(&self) {
        self.source.close();
    }
}
