use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};

use crate::media::domain::audio_samples::AudioFrame;
use crate::media::domain::media_writer::MediaWriter;
use crate::shared::error::{MediaError, MediaResult};
use crate::shared::frame::ImageFrame;

/// Writes the first image frame as a still picture. Later frames are
/// ignored.
pub struct StaticImageWriter {
    path: PathBuf,
    format: String,
    written: bool,
    closed: bool,
}

impl StaticImageWriter {
    pub fn new(path: impl AsRef<Path>, format: &str) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            format: format.to_ascii_lowercase(),
            written: false,
            closed: false,
        }
    }

    fn image_format(&self) -> MediaResult<ImageFormat> {
        ImageFormat::from_extension(&self.format)
            .filter(|f| f.writing_enabled())
            .ok_or_else(|| MediaError::UnsupportedFormat(self.format.clone()))
    }
}

fn has_alpha(format: ImageFormat) -> bool {
    !matches!(format, ImageFormat::Jpeg | ImageFormat::Bmp | ImageFormat::Pnm)
}

impl MediaWriter for StaticImageWriter {
    fn write_image_frame(&mut self, frame: ImageFrame) -> MediaResult<()> {
        if self.closed {
            return Err(MediaError::InvalidArgument("writer is closed".into()));
        }
        if self.written {
            return Ok(());
        }
        let format = self.image_format()?;
        let image = DynamicImage::ImageRgba8(frame.into_content());
        let image = if has_alpha(format) {
            image
        } else {
            DynamicImage::ImageRgb8(image.to_rgb8())
        };
        let target = self.path.display().to_string();
        image
            .save_with_format(&self.path, format)
            .map_err(|e| MediaError::image(target, e))?;
        log::debug!("Wrote still {:?} to {}", format, self.path.display());
        self.written = true;
        Ok(())
    }

    fn write_audio_frame(&mut self, _frame: AudioFrame) -> MediaResult<()> {
        Ok(())
    }

    fn is_static(&self) -> bool {
        true
    }

    fn close(&mut self) -> MediaResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if self.written {
            Ok(())
        } else {
            Err(MediaError::InvalidArgument(format!(
                "no image frames were written to {}",
                self.path.display()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::frame::Frame;
    use image::{Rgba, RgbaImage};
    use rstest::rstest;
    use std::time::Duration;

    fn frame(value: u8) -> ImageFrame {
        Frame::new(
            RgbaImage::from_pixel(6, 4, Rgba([value, value, value, 128])),
            Duration::from_millis(40),
            Duration::ZERO,
        )
    }

    #[rstest]
    #[case("png", image::ColorType::Rgba8)]
    #[case("jpg", image::ColorType::Rgb8)]
    #[case("bmp", image::ColorType::Rgb8)]
    #[case("tiff", image::ColorType::Rgba8)]
    fn test_writes_first_frame_only(#[case] format: &str, #[case] color: image::ColorType) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(format!("out.{format}"));
        let mut writer = StaticImageWriter::new(&path, format);
        assert!(writer.is_static());
        writer.write_image_frame(frame(200)).unwrap();
        let first = std::fs::read(&path).unwrap();
        writer.write_image_frame(frame(10)).unwrap();
        writer.close().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), first);
        let decoded = image::open(&path).unwrap();
        assert_eq!(decoded.color(), color);
        assert_eq!((decoded.width(), decoded.height()), (6, 4));
    }

    #[test]
    fn test_unsupported_format_fails_on_first_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = StaticImageWriter::new(dir.path().join("out.xyz"), "xyz");
        assert!(matches!(
            writer.write_image_frame(frame(0)),
            Err(MediaError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_close_requires_a_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = StaticImageWriter::new(dir.path().join("out.png"), "png");
        assert!(writer.close().is_err());
        assert!(writer.close().is_ok());
        assert!(writer.write_image_frame(frame(0)).is_err());
    }
}
