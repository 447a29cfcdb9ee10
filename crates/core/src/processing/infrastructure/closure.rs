use image::RgbaImage;

use crate::media::domain::media_reader::MediaReader;
use crate::processing::domain::image_processor::{FrameProcessor, ImageProcessor};
use crate::shared::error::MediaResult;

/// A stateless processor backed by a closure.
pub struct FnProcessor<F> {
    name: String,
    f: F,
}

impl<F> FrameProcessor for FnProcessor<F>
where
    F: Fn(RgbaImage) -> MediaResult<RgbaImage> + Send + Sync + 'static,
{
    type Data = ();

    fn constant_data(&self, _: &RgbaImage, _: Option<&dyn MediaReader<RgbaImage>>) -> MediaResult<()> {
        Ok(())
    }

    fn transform(&self, image: RgbaImage, _: &()) -> MediaResult<RgbaImage> {
        (self.f)(image)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

pub fn from_fn<F>(name: impl Into<String>, f: F) -> ImageProcessor
where
    F: Fn(RgbaImage) -> MediaResult<RgbaImage> + Send + Sync + 'static,
{
    ImageProcessor::new(FnProcessor { name: name.into(), f })
}
