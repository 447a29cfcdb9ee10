use std::path::Path;

use crate::media::domain::media_writer::{MediaWriter, WriterSettings};
use crate::media::infrastructure::ffmpeg_writer::ContainerWriter;
use crate::media::infrastructure::gif_writer::GifWriter;
use crate::media::infrastructure::image_file_writer::StaticImageWriter;
use crate::shared::constants::{GIF_EXTENSION, IMAGE_EXTENSIONS};

/// Which writer handles a given output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriterKind {
    Gif,
    StaticImage,
    Container,
}

impl WriterKind {
    pub fn for_format(format: &str) -> Self {
        let format = format.to_ascii_lowercase();
        if format == GIF_EXTENSION {
            Self::Gif
        } else if IMAGE_EXTENSIONS.contains(&format.as_str()) {
            Self::StaticImage
        } else {
            Self::Container
        }
    }
}

/// Creates the writer for `format`, writing to `path`.
pub fn create_writer(path: &Path, format: &str, settings: WriterSettings) -> Box<dyn MediaWriter> {
    let kind = WriterKind::for_format(format);
    log::debug!("Using {kind:?} writer for {format}");
    match kind {
        WriterKind::Gif => Box::new(GifWriter::new(path, &settings)),
        WriterKind::StaticImage => Box::new(StaticImageWriter::new(path, format)),
        WriterKind::Container => Box::new(ContainerWriter::new(path, format, settings)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("gif", WriterKind::Gif)]
    #[case("GIF", WriterKind::Gif)]
    #[case("png", WriterKind::StaticImage)]
    #[case("JPEG", WriterKind::StaticImage)]
    #[case("webp", WriterKind::StaticImage)]
    #[case("tif", WriterKind::StaticImage)]
    #[case("mp4", WriterKind::Container)]
    #[case("webm", WriterKind::Container)]
    #[case("gifv", WriterKind::Container)]
    fn test_writer_kind_for_format(#[case] format: &str, #[case] expected: WriterKind) {
        assert_eq!(WriterKind::for_format(format), expected);
    }

    #[test]
    fn test_created_writers_report_capabilities() {
        let path = Path::new("unused");
        assert!(create_writer(path, "png", WriterSettings::default()).is_static());
        assert!(!create_writer(path, "gif", WriterSettings::default()).supports_audio());
        assert!(create_writer(path, "mkv", WriterSettings::default()).supports_audio());
    }
}
