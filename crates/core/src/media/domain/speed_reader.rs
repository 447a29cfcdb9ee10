use std::sync::Arc;
use std::time::Duration;

use crate::media::domain::media_reader::{validate_speed, FrameIter, MediaReader, SharedReader};
use crate::shared::error::MediaResult;
use crate::shared::frame::{wrap_timestamp, Frame, FrameContent};
use crate::shared::media_info::MediaInfo;

/// Plays a source reader `multiplier` times faster (or slower below 1).
///
/// Speed changes on a `SpeedReader` collapse into a single reader over the
/// original source instead of stacking wrappers.
pub struct SpeedReader<C> {
    source: SharedReader<C>,
    multiplier: f64,
    info: MediaInfo,
}

impl<C: FrameContent> SpeedReader<C> {
    pub fn new(source: SharedReader<C>, multiplier: f64) -> MediaResult<Self> {
        validate_speed(multiplier)?;
        let info = source.info().with_speed(multiplier);
        Ok(Self {
            source,
            multiplier,
            info,
        })
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }
}

impl<C: FrameContent> MediaReader<C> for SpeedReader<C> {
    fn info(&self) -> &MediaInfo {
        &self.info
    }

    fn read_frame(&self, timestamp: Duration) -> MediaResult<Frame<C>> {
        let local = wrap_timestamp(timestamp, self.info.duration);
        let frame = self.source.read_frame(local.mul_f64(self.multiplier))?;
        Ok(frame.change_speed(self.multiplier))
    }

    fn frames(&self) -> FrameIter<'_, C> {
        let multiplier = self.multiplier;
        Box::new(
            self.source
                .frames()
                .map(move |frame| frame.map(|f| f.change_speed(multiplier))),
        )
    }

    fn reversed(self: Arc<Self>) -> MediaResult<SharedReader<C>> {
        self.source.clone().reversed()?.change_speed(self.multiplier)
    }

    fn change_speed(self: Arc<Self>, multiplier: f64) -> MediaResult<SharedReader<C>> {
        validate_speed(multiplier)?;
        Ok(Arc::new(SpeedReader::new(
            self.source.clone(),
            self.multiplier * multiplier,
        )?))
    }

    fn close(&self) {
        self.source.close();
    }
}
