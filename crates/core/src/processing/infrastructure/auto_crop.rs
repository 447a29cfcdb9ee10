use image::{imageops, RgbaImage};
use ndarray::{ArrayView3, Axis};

use crate::media::domain::media_reader::MediaReader;
use crate::processing::domain::image_processor::FrameProcessor;
use crate::shared::error::MediaResult;
use crate::shared::frame::pixel_view;

/// Rectangle kept by [`AutoCrop`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Trims uniform borders. The border colour is the first frame's top-left
/// pixel and the crop found on the first frame applies to every frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AutoCrop {
    /// Largest per-channel difference still counted as border.
    pub tolerance: u8,
}

impl Default for AutoCrop {
    fn default() -> Self {
        Self { tolerance: 10 }
    }
}

impl AutoCrop {
    pub fn find_crop(&self, image: &RgbaImage) -> MediaResult<CropRect> {
        let full = CropRect {
            x: 0,
            y: 0,
            width: image.width(),
            height: image.height(),
        };
        let pixels = pixel_view(image)?;
        if pixels.is_empty() {
            return Ok(full);
        }
        let border = pixels.slice(ndarray::s![0, 0, ..]).to_owned();

        let tolerance = self.tolerance;
        let differs = |view: ArrayView3<'_, u8>, axis: Axis| -> Vec<bool> {
            view.axis_iter(axis)
                .map(|line| {
                    line.rows()
                        .into_iter()
                        .any(|px| px.iter().zip(border.iter()).any(|(a, b)| a.abs_diff(*b) > tolerance))
                })
                .collect()
        };
        let rows = differs(pixels, Axis(0));
        let cols = differs(pixels, Axis(1));

        let (Some(top), Some(bottom)) = (rows.iter().position(|&d| d), rows.iter().rposition(|&d| d)) else {
            return Ok(full);
        };
        let (Some(left), Some(right)) = (cols.iter().position(|&d| d), cols.iter().rposition(|&d| d)) else {
            return Ok(full);
        };
        Ok(CropRect {
            x: left as u32,
            y: top as u32,
            width: (right - left + 1) as u32,
            height: (bottom - top + 1) as u32,
        })
    }
}

impl FrameProcessor for AutoCrop {
    type Data = CropRect;

    fn constant_data(&self, first: &RgbaImage, _: Option<&dyn MediaReader<RgbaImage>>) -> MediaResult<CropRect> {
        let crop = self.find_crop(first)?;
        log::debug!("Auto-crop {}x{} -> {:?}", first.width(), first.height(), crop);
        Ok(crop)
    }

    fn transform(&self, image: RgbaImage, crop: &CropRect) -> MediaResult<RgbaImage> {
        let full = CropRect {
            x: 0,
            y: 0,
            width: image.width(),
            height: image.height(),
        };
        if *crop == full {
            return Ok(image);
        }
        // Later frames may be smaller than the first one.
        let x = crop.x.min(image.width().saturating_sub(1));
        let y = crop.y.min(image.height().saturating_sub(1));
        let width = crop.width.min(image.width() - x).max(1);
        let height = crop.height.min(image.height() - y).max(1);
        Ok(imageops::crop_imm(&image, x, y, width, height).to_image())
    }

    fn name(&self) -> &str {
        "auto-crop"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn bordered() -> RgbaImage {
        let mut image = RgbaImage::from_pixel(10, 8, Rgba([255, 255, 255, 255]));
        for y in 2..5 {
            for x in 3..9 {
                image.put_pixel(x, y, Rgba([20, 40, 60, 255]));
            }
        }
        image
    }

    #[test]
    fn test_finds_content_box() {
        let crop = AutoCrop::default().find_crop(&bordered()).unwrap();
        assert_eq!(
            crop,
            CropRect {
                x: 3,
                y: 2,
                width: 6,
                height: 3
            }
        );
    }

    #[test]
    fn test_uniform_image_is_not_cropped() {
        let image = RgbaImage::from_pixel(5, 5, Rgba([9, 9, 9, 255]));
        let crop = AutoCrop::default().find_crop(&image).unwrap();
        assert_eq!((crop.width, crop.height), (5, 5));
    }

    #[test]
    fn test_tolerance_absorbs_noise() {
        let mut image = RgbaImage::from_pixel(6, 6, Rgba([100, 100, 100, 255]));
        image.put_pixel(0, 5, Rgba([105, 100, 100, 255]));
        image.put_pixel(2, 2, Rgba([200, 0, 0, 255]));
        let crop = AutoCrop { tolerance: 10 }.find_crop(&image).unwrap();
        assert_eq!((crop.x, crop.y, crop.width, crop.height), (2, 2, 1, 1));
    }

    #[test]
    fn test_crop_from_first_frame_applies_to_all() {
        let processor = AutoCrop::default();
        let crop = processor.constant_data(&bordered(), None).unwrap();
        let other = RgbaImage::from_pixel(10, 8, Rgba([0, 0, 0, 255]));
        let out = processor.transform(other, &crop).unwrap();
        assert_eq!(out.dimensions(), (6, 3));
    }

    #[test]
    fn test_smaller_later_frame_is_clamped() {
        let processor = AutoCrop::default();
        let crop = processor.constant_data(&bordered(), None).unwrap();
        let out = processor.transform(RgbaImage::new(5, 3), &crop).unwrap();
        assert_eq!(out.dimensions(), (2, 1));
    }
}
