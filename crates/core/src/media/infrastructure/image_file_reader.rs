use std::sync::Arc;
use std::time::Duration;

use image::RgbaImage;

use crate::media::domain::media_reader::{validate_speed, FrameIter, MediaReader, SharedReader};
use crate::shared::constants::STILL_FRAME_DURATION;
use crate::shared::data_source::DataSource;
use crate::shared::error::{MediaError, MediaResult};
use crate::shared::frame::{Frame, ImageFrame};
use crate::shared::media_info::MediaInfo;

/// Adapts a single still image to the [`MediaReader`] interface.
///
/// The image is one frame of nominal length. Reversing it or changing its
/// speed yields the same reader.
pub struct StaticImageReader {
    frame: ImageFrame,
    info: MediaInfo,
}

impl StaticImageReader {
    /// Decodes `source` with the `image` crate, sniffing the format from
    /// its content.
    pub fn open(source: &DataSource) -> MediaResult<Self> {
        let bytes = source.read_all()?;
        let image = image::load_from_memory(&bytes)
            .map_err(|e| MediaError::unreadable(source.name(), e.to_string()))?;
        Ok(Self::from_image(image.to_rgba8()))
    }

    pub fn from_image(image: RgbaImage) -> Self {
        let info = MediaInfo {
            frame_count: 1,
            duration: STILL_FRAME_DURATION,
            frame_duration: STILL_FRAME_DURATION,
            width: image.width(),
            height: image.height(),
            ..MediaInfo::empty()
        };
        Self {
            frame: Frame::new(image, STILL_FRAME_DURATION, Duration::ZERO),
            info,
        }
    }
}

impl MediaReader<RgbaImage> for StaticImageReader {
    fn info(&self) -> &MediaInfo {
        &self.info
    }

    fn read_frame(&self, _timestamp: Duration) -> MediaResult<ImageFrame> {
        Ok(self.frame.clone())
    }

    fn frames(&self) -> FrameIter<'_, RgbaImage> {
        Box::new(std::iter::once(Ok(self.frame.clone())))
    }

    fn reversed(self: Arc<Self>) -> MediaResult<SharedReader<RgbaImage>> {
        Ok(self)
    }

    fn change_speed(self: Arc<Self>, multiplier: f64) -> MediaResult<SharedReader<RgbaImage>> {
        validate_speed(multiplier)?;
        Ok(self)
    }
}
