use image::imageops;
use image::RgbaImage;

use crate::media::domain::media_reader::MediaReader;
use crate::processing::domain::image_processor::FrameProcessor;
use crate::shared::error::MediaResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flip {
    Horizontal,
    Vertical,
}

impl FrameProcessor for Flip {
    type Data = ();

    fn constant_data(&self, _: &RgbaImage, _: Option<&dyn MediaReader<RgbaImage>>) -> MediaResult<()> {
        Ok(())
    }

    fn transform(&self, mut image: RgbaImage, _: &()) -> MediaResult<RgbaImage> {
        match self {
            Self::Horizontal => imageops::flip_horizontal_in_place(&mut image),
            Self::Vertical => imageops::flip_vertical_in_place(&mut image),
        }
        Ok(image)
    }

    fn name(&self) -> &str {
        match self {
            Self::Horizontal => "flip-horizontal",
            Self::Vertical => "flip-vertical",
        }
    }
}
