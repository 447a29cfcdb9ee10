use image::RgbaImage;

use crate::media::domain::media_reader::MediaReader;
use crate::processing::domain::image_processor::FrameProcessor;
use crate::shared::error::{MediaError, MediaResult};

/// Leaves pixels alone and changes playback speed by `multiplier`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpeedChange {
    multiplier: f64,
}

impl SpeedChange {
    pub fn new(multiplier: f64) -> MediaResult<Self> {
        if !multiplier.is_finite() || multiplier == 0.0 {
            return Err(MediaError::InvalidArgument(format!(
                "speed must be finite and non-zero, got {multiplier}"
            )));
        }
        Ok(Self { multiplier })
    }
}

impl FrameProcessor for SpeedChange {
    type Data = ();

    fn constant_data(&self, _: &RgbaImage, _: Option<&dyn MediaReader<RgbaImage>>) -> MediaResult<()> {
        Ok(())
    }

    fn transform(&self, image: RgbaImage, _: &()) -> MediaResult<RgbaImage> {
        Ok(image)
    }

    fn speed(&self) -> f64 {
        self.multiplier
    }

    fn name(&self) -> &str {
        "speed"
    }
}

/// Plays the input backwards.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Reverse;

impl FrameProcessor for Reverse {
    type Data = ();

    fn constant_data(&self, _: &RgbaImage, _: Option<&dyn MediaReader<RgbaImage>>) -> MediaResult<()> {
        Ok(())
    }

    fn transform(&self, image: RgbaImage, _: &()) -> MediaResult<RgbaImage> {
        Ok(image)
    }

    fn speed(&self) -> f64 {
        -1.0
    }

    fn name(&self) -> &str {
        "reverse"
    }
}
