use image::imageops::{self, FilterType};
use image::RgbaImage;

use crate::media::domain::media_reader::MediaReader;
use crate::processing::domain::image_processor::{FrameProcessor, ImageProcessor};
use crate::shared::error::{MediaError, MediaResult};

/// Scales every frame by a fixed ratio. Ratios of 1 or more leave frames
/// untouched.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Resize {
    ratio: f64,
}

impl Resize {
    pub fn new(ratio: f64) -> MediaResult<Self> {
        if !(ratio.is_finite() && ratio > 0.0) {
            return Err(MediaError::InvalidArgument(format!(
                "resize ratio must be positive, got {ratio}"
            )));
        }
        Ok(Self { ratio })
    }

    /// Identity for ratios of 1 or more, so callers can always append it.
    pub fn processor(ratio: f64) -> MediaResult<ImageProcessor> {
        let resize = Self::new(ratio)?;
        Ok(if resize.ratio >= 1.0 {
            ImageProcessor::Identity
        } else {
            ImageProcessor::new(resize)
        })
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }
}

impl FrameProcessor for Resize {
    type Data = ();

    fn constant_data(&self, _: &RgbaImage, _: Option<&dyn MediaReader<RgbaImage>>) -> MediaResult<()> {
        Ok(())
    }

    fn transform(&self, image: RgbaImage, _: &()) -> MediaResult<RgbaImage> {
        if self.ratio >= 1.0 {
            return Ok(image);
        }
        let (width, height) = scaled(image.dimensions(), self.ratio);
        Ok(imageops::resize(&image, width, height, FilterType::Triangle))
    }

    fn name(&self) -> &str {
        "resize"
    }
}

/// Shrinks frames to fit inside a bounding box, keeping the aspect ratio.
/// Frames that already fit are left alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FitWithin {
    pub max_width: u32,
    pub max_height: u32,
}

impl FrameProcessor for FitWithin {
    /// Output size, fixed by the first frame.
    type Data = (u32, u32);

    fn constant_data(&self, first: &RgbaImage, _: Option<&dyn MediaReader<RgbaImage>>) -> MediaResult<(u32, u32)> {
        let (width, height) = first.dimensions();
        let ratio = (self.max_width as f64 / width.max(1) as f64)
            .min(self.max_height as f64 / height.max(1) as f64);
        Ok(if ratio >= 1.0 {
            (width, height)
        } else {
            scaled((width, height), ratio)
        })
    }

    fn transform(&self, image: RgbaImage, &(width, height): &(u32, u32)) -> MediaResult<RgbaImage> {
        if image.dimensions() == (width, height) {
            return Ok(image);
        }
        Ok(imageops::resize(&image, width, height, FilterType::Triangle))
    }

    fn name(&self) -> &str {
        "fit-within"
    }
}

fn scaled((width, height): (u32, u32), ratio: f64) -> (u32, u32) {
    (
        ((width as f64 * ratio).round() as u32).max(1),
        ((height as f64 * ratio).round() as u32).max(1),
    )
}
