use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::media::domain::media_reader::{validate_speed, FrameIter, MediaReader, SharedReader};
use crate::shared::error::{MediaError, MediaResult};
use crate::shared::frame::{Frame, FrameContent};
use crate::shared::media_info::MediaInfo;

/// A reader without frames, standing in for a missing audio track.
pub struct EmptyReader<C> {
    info: MediaInfo,
    _content: PhantomData<fn() -> C>,
}

impl<C> EmptyReader<C> {
    pub fn new() -> Self {
        Self {
            info: MediaInfo::empty(),
            _content: PhantomData,
        }
    }
}

impl<C> Default for EmptyReader<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: FrameContent> MediaReader<C> for EmptyReader<C> {
    fn info(&self) -> &MediaInfo {
        &self.info
    }

    fn read_frame(&self, timestamp: Duration) -> MediaResult<Frame<C>> {
        Err(MediaError::NoSuchFrame(timestamp))
    }

    fn frames(&self) -> FrameIter<'_, C> {
        Box::new(std::iter::empty())
    }

    fn reversed(self: Arc<Self>) -> MediaResult<SharedReader<C>> {
        Ok(self)
    }

    fn change_speed(self: Arc<Self>, multiplier: f64) -> MediaResult<SharedReader<C>> {
        validate_speed(multiplier)?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::domain::audio_samples::AudioSamples;

    #[test]
    fn test_empty_reader_yields_nothing() {
        let reader: EmptyReader<AudioSamples> = EmptyReader::new();
        assert_eq!(reader.frames().count(), 0);
        assert_eq!(reader.frame_count(), 0);
        assert!(reader.audio_format().is_none());
        assert!(matches!(
            reader.read_frame(Duration::ZERO),
            Err(MediaError::NoSuchFrame(_))
        ));
    }

    #[test]
    fn test_derived_readers_stay_empty() {
        let reader: SharedReader<AudioSamples> = Arc::new(EmptyReader::new());
        let derived = reader.reversed().unwrap().change_speed(2.0).unwrap();
        assert_eq!(derived.frames().count(), 0);
    }
}
