use std::sync::Arc;

use crate::media::domain::empty_reader::EmptyReader;
use crate::media::domain::media_reader::{AudioReader, ImageReader};
use crate::media::infrastructure::ffmpeg_audio_reader::ContainerAudioReader;
use crate::media::infrastructure::ffmpeg_reader::ContainerImageReader;
use crate::media::infrastructure::gif_reader::open_gif;
use crate::media::infrastructure::image_file_reader::StaticImageReader;
use crate::media::infrastructure::webp_reader::open_webp;
use crate::shared::constants::{GIF_EXTENSION, IMAGE_EXTENSIONS};
use crate::shared::data_source::DataSource;
use crate::shared::error::MediaResult;

/// The image and audio halves of one input.
pub struct InputReaders {
    pub image: ImageReader,
    pub audio: AudioReader,
}

/// Opens `source` according to its lower-cased `format`.
///
/// GIF, WebP and still images are decoded in memory and have no audio.
/// Anything else is demuxed with ffmpeg; the file is materialised once
/// and shared by both readers.
pub fn open_readers(source: &DataSource, format: &str) -> MediaResult<InputReaders> {
    let format = format.to_ascii_lowercase();
    let image: ImageReader = match format.as_str() {
        GIF_EXTENSION => Arc::new(open_gif(source)?),
        "webp" => open_webp(source)?,
        f if IMAGE_EXTENSIONS.contains(&f) => Arc::new(StaticImageReader::open(source)?),
        _ => {
            let file = source.materialize(&format)?;
            let image = Arc::new(ContainerImageReader::open(file.clone())?);
            let audio: AudioReader = match ContainerAudioReader::open(file)? {
                Some(audio) => Arc::new(audio),
                None => Arc::new(EmptyReader::new()),
            };
            return Ok(InputReaders { image, audio });
        }
    };
    Ok(InputReaders {
        image,
        audio: Arc::new(EmptyReader::new()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::domain::media_reader::MediaReader;
    use crate::media::infrastructure::ffmpeg_reader::tests::create_test_video;
    use crate::media::infrastructure::gif_reader::tests::encode_gif;
    use crate::shared::error::MediaError;

    #[test]
    fn test_gif_input_has_no_audio() {
        let keep = gif::DisposalMethod::Keep;
        let bytes = encode_gif(4, 4, &[(0, 0, 4, 4, 1, 10, keep), (0, 0, 4, 4, 2, 10, keep)], None);
        let readers = open_readers(&DataSource::from_bytes("a.gif", bytes), "GIF").unwrap();
        assert_eq!(readers.image.frame_count(), 2);
        assert_eq!(readers.audio.frame_count(), 0);
        assert!(readers.audio.audio_format().is_none());
    }

    #[test]
    fn test_png_input_is_static() {
        let mut bytes = std::io::Cursor::new(Vec::new());
        image::RgbaImage::new(3, 3)
            .write_to(&mut bytes, image::ImageFormat::Png)
            .unwrap();
        let readers = open_readers(&DataSource::from_bytes("a.png", bytes.into_inner()), "png").unwrap();
        assert_eq!(readers.image.frame_count(), 1);
    }

    #[test]
    fn test_silent_video_gets_empty_audio() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        create_test_video(&path, 4, 32, 24, 10);
        let readers = open_readers(&DataSource::Path(path), "mp4").unwrap();
        assert_eq!(readers.image.frame_count(), 4);
        assert_eq!(readers.audio.frame_count(), 0);
    }

    #[test]
    fn test_garbage_container_is_unreadable() {
        let source = DataSource::from_bytes("junk.mp4", vec![7u8; 64]);
        assert!(matches!(
            open_readers(&source, "mp4"),
            Err(MediaError::UnreadableInput { .. }) | Err(MediaError::Codec { .. })
        ));
    }
}
