use tempfile::NamedTempFile;

use crate::media::domain::media_reader::{AudioReader, ImageReader, MediaReader};
use crate::media::domain::media_writer::{MediaWriter, WriterSettings};
use crate::media::infrastructure::writer_factory::create_writer;
use crate::pipeline::infrastructure::async_executor::default_parallelism;
use crate::pipeline::transformed_reader::TransformedImageReader;
use crate::processing::domain::image_processor::ImageProcessor;
use crate::processing::infrastructure::resize::Resize;
use crate::shared::constants::{MAX_ENCODE_ATTEMPTS, MAX_RETRY_RESIZE_RATIO};
use crate::shared::error::MediaResult;
use crate::shared::loop_count::LoopCount;

/// Knobs for one [`process_media`] run.
#[derive(Clone, Debug)]
pub struct EncodeOptions {
    /// Byte budget for the output; 0 means unbounded.
    pub max_file_size: u64,
    /// Worker count for frame transforms.
    pub parallelism: usize,
    /// Overrides the loop count taken from the image reader.
    pub loop_count: Option<LoopCount>,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            max_file_size: 0,
            parallelism: default_parallelism(),
            loop_count: None,
        }
    }
}

/// The final encode of a [`process_media`] run.
#[derive(Debug)]
pub struct EncodedMedia {
    pub file: NamedTempFile,
    pub format: String,
    pub size: u64,
    pub attempts: usize,
}

/// Encodes `image` and `audio` through `processor` into `format`, shrinking
/// the picture and retrying while the output exceeds the byte budget.
///
/// A negative processor speed plays both readers backwards. After
/// [`MAX_ENCODE_ATTEMPTS`] the last output is returned even when it is
/// still too large.
pub fn process_media(
    image: ImageReader,
    audio: AudioReader,
    processor: &ImageProcessor,
    format: &str,
    options: &EncodeOptions,
) -> MediaResult<EncodedMedia> {
    let format = format.to_ascii_lowercase();
    let speed = processor.speed();
    let (mut image, mut audio) = (image, audio);
    if speed < 0.0 {
        image = image.reversed()?;
        audio = audio.reversed()?;
    }
    let speed = speed.abs();
    if speed != 1.0 {
        image = image.change_speed(speed)?;
        audio = audio.change_speed(speed)?;
    }

    let settings = WriterSettings {
        max_file_size: options.max_file_size,
        duration: image.duration().max(audio.duration()),
        audio: audio.audio_format(),
        loop_count: options.loop_count.unwrap_or_else(|| image.loop_count()),
    };
    log::debug!(
        "Encoding {format} with [{}] at speed {speed}, budget {} bytes",
        processor.describe(),
        options.max_file_size
    );

    let mut resize_ratio = 1.0;
    let mut attempt = 1;
    loop {
        let file = tempfile::Builder::new()
            .prefix("reframe-")
            .suffix(&format!(".{format}"))
            .tempfile()?;
        let pipeline = processor.clone().then(Resize::processor(resize_ratio)?);
        let transformed = TransformedImageReader::new(image.clone(), pipeline)
            .with_parallelism(options.parallelism);
        let mut writer = create_writer(file.path(), &format, settings.clone());
        encode(&transformed, &audio, writer.as_mut())?;

        let size = file.as_file().metadata()?.len();
        log::debug!("Attempt {attempt} at ratio {resize_ratio:.3}: {size} bytes");

        let within_budget = options.max_file_size == 0 || size <= options.max_file_size;
        if within_budget || attempt >= MAX_ENCODE_ATTEMPTS {
            if !within_budget {
                log::warn!(
                    "Output is {size} bytes after {attempt} attempts, over the {} byte budget",
                    options.max_file_size
                );
            }
            log::info!("Encoded {size} bytes of {format} in {attempt} attempt(s)");
            return Ok(EncodedMedia {
                file,
                format,
                size,
                attempts: attempt,
            });
        }

        // The ratio always applies to the source dimensions.
        resize_ratio = (options.max_file_size as f64 / size as f64).min(MAX_RETRY_RESIZE_RATIO);
        attempt += 1;
    }
}

fn encode(
    image: &TransformedImageReader,
    audio: &AudioReader,
    writer: &mut dyn MediaWriter,
) -> MediaResult<()> {
    for frame in image.frames() {
        writer.write_image_frame(frame?)?;
        if writer.is_static() {
            break;
        }
    }
    if writer.supports_audio() {
        for frame in audio.frames() {
            writer.write_audio_frame(frame?)?;
        }
    }
    writer.close()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::domain::audio_samples::{AudioFrame, AudioSamples};
    use crate::media::domain::empty_reader::EmptyReader;
    use crate::media::domain::frame_buffer_reader::tests::buffer_reader;
    use crate::media::domain::frame_buffer_reader::FrameBufferReader;
    use crate::media::domain::media_reader::collect_frames;
    use crate::media::infrastructure::ffmpeg_audio_reader::ContainerAudioReader;
    use crate::media::infrastructure::gif_reader::open_gif;
    use crate::media::infrastructure::image_file_reader::StaticImageReader;
    use crate::processing::infrastructure::closure::from_fn;
    use crate::processing::infrastructure::retime::{Reverse, SpeedChange};
    use crate::shared::data_source::DataSource;
    use crate::shared::error::MediaError;
    use crate::shared::frame::Frame;
    use crate::shared::media_info::{AudioFormat, MediaInfo};
    use image::RgbaImage;
    use std::sync::Arc;
    use std::time::Duration;

    fn silent() -> AudioReader {
        Arc::new(EmptyReader::new())
    }

    fn options(max_file_size: u64) -> EncodeOptions {
        EncodeOptions {
            max_file_size,
            parallelism: 2,
            loop_count: None,
        }
    }

    /// Incompressible pixels, so PNG size tracks pixel count.
    fn noise(width: u32, height: u32) -> RgbaImage {
        let mut state = 0x2545_f491_u32;
        RgbaImage::from_fn(width, height, |_, _| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let [r, g, b, _] = state.to_le_bytes();
            image::Rgba([r, g, b, 255])
        })
    }

    fn gif_values(encoded: &EncodedMedia) -> Vec<u8> {
        let reader = open_gif(&DataSource::Path(encoded.file.path().to_path_buf())).unwrap();
        collect_frames(&reader)
            .unwrap()
            .iter()
            .map(|f| f.content().get_pixel(0, 0)[0])
            .collect()
    }

    #[test]
    fn test_unbounded_encode_takes_one_attempt() {
        let image: ImageReader = Arc::new(buffer_reader(&[100, 100, 100]));
        let encoded = process_media(image, silent(), &ImageProcessor::Identity, "GIF", &options(0)).unwrap();
        assert_eq!(encoded.attempts, 1);
        assert_eq!(encoded.format, "gif");
        assert_eq!(encoded.size, encoded.file.as_file().metadata().unwrap().len());
        assert_eq!(gif_values(&encoded), vec![0, 10, 20]);
    }

    #[test]
    fn test_oversized_output_shrinks_until_it_fits() {
        let image: ImageReader = Arc::new(StaticImageReader::from_image(noise(200, 200)));
        let full = process_media(image.clone(), silent(), &ImageProcessor::Identity, "png", &options(0)).unwrap();

        let budget = full.size * 6 / 10;
        let encoded = process_media(image, silent(), &ImageProcessor::Identity, "png", &options(budget)).unwrap();
        assert_eq!(encoded.attempts, 2);
        assert!(encoded.size <= budget);
        let decoded = image::open(encoded.file.path()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (120, 120));
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let image: ImageReader = Arc::new(StaticImageReader::from_image(noise(64, 64)));
        let encoded = process_media(image, silent(), &ImageProcessor::Identity, "png", &options(1)).unwrap();
        assert_eq!(encoded.attempts, MAX_ENCODE_ATTEMPTS);
        assert!(encoded.size > 1);
    }

    #[test]
    fn test_third_attempt_scales_source_by_last_overrun() {
        let budget = 50;
        let source = noise(40, 40);
        let image: ImageReader = Arc::new(StaticImageReader::from_image(source.clone()));
        let encode_at = |processor: &ImageProcessor| {
            process_media(image.clone(), silent(), processor, "png", &options(0))
                .unwrap()
                .size
        };

        let first = encode_at(&ImageProcessor::Identity);
        let second_ratio = (budget as f64 / first as f64).min(MAX_RETRY_RESIZE_RATIO);
        let second = encode_at(&Resize::processor(second_ratio).unwrap());
        assert!(second > budget);
        let third_ratio = (budget as f64 / second as f64).min(MAX_RETRY_RESIZE_RATIO);
        let resize = Resize::processor(third_ratio).unwrap();
        let data = resize.constant_data(&source, None).unwrap();
        let expected = resize.transform(source, &data).unwrap().dimensions();
        assert!(expected.0 > 1);

        let encoded = process_media(image.clone(), silent(), &ImageProcessor::Identity, "png", &options(budget)).unwrap();
        assert_eq!(encoded.attempts, 3);
        let decoded = image::open(encoded.file.path()).unwrap();
        assert_eq!((decoded.width(), decoded.height()), expected);
    }

    #[test]
    fn test_negative_speed_reverses() {
        let image: ImageReader = Arc::new(buffer_reader(&[100, 100, 100]));
        let processor = ImageProcessor::new(Reverse);
        let encoded = process_media(image, silent(), &processor, "gif", &options(0)).unwrap();
        assert_eq!(gif_values(&encoded), vec![20, 10, 0]);
    }

    #[test]
    fn test_speed_retimes_output() {
        let image: ImageReader = Arc::new(buffer_reader(&[100, 100, 100]));
        let processor = ImageProcessor::new(SpeedChange::new(2.0).unwrap());
        let encoded = process_media(image, silent(), &processor, "gif", &options(0)).unwrap();
        let reader = open_gif(&DataSource::Path(encoded.file.path().to_path_buf())).unwrap();
        assert_eq!(reader.duration(), Duration::from_millis(150));
    }

    #[test]
    fn test_static_output_keeps_first_frame() {
        let image: ImageReader = Arc::new(buffer_reader(&[40, 40, 40, 40]));
        let encoded = process_media(image, silent(), &ImageProcessor::Identity, "png", &options(0)).unwrap();
        let decoded = image::open(encoded.file.path()).unwrap().to_rgba8();
        assert_eq!(decoded.get_pixel(0, 0).0, [0, 0, 0, 255]);
    }

    #[test]
    fn test_processing_error_aborts() {
        let image: ImageReader = Arc::new(buffer_reader(&[40, 40]));
        let failing = from_fn("fail", |_| Err(MediaError::FrameProcessing("broken".into())));
        let result = process_media(image, silent(), &failing, "gif", &options(0));
        assert!(matches!(result, Err(MediaError::FrameProcessing(_))));
    }

    #[test]
    fn test_loop_count_override() {
        let image: ImageReader = Arc::new(buffer_reader(&[100, 100]));
        let opts = EncodeOptions {
            loop_count: Some(LoopCount::Extra(3)),
            ..options(0)
        };
        let encoded = process_media(image, silent(), &ImageProcessor::Identity, "gif", &opts).unwrap();
        let reader = open_gif(&DataSource::Path(encoded.file.path().to_path_buf())).unwrap();
        assert_eq!(reader.loop_count(), LoopCount::Extra(3));
    }

    #[test]
    fn test_audio_reaches_container_output() {
        let frames: Vec<AudioFrame> = (0..10)
            .map(|i| {
                let samples: Vec<f32> = (0..2205).map(|n| (n as f32 * 0.03).sin() * 0.3).collect();
                Frame::new(
                    AudioSamples::new(samples, 22_050, 1),
                    Duration::from_millis(100),
                    Duration::from_millis(100 * i),
                )
            })
            .collect();
        let info = MediaInfo {
            audio: Some(AudioFormat {
                sample_rate: 22_050,
                channels: 1,
                bitrate: 64_000,
            }),
            ..MediaInfo::empty()
        };
        let audio: AudioReader = Arc::new(FrameBufferReader::new(frames, info));
        let image: ImageReader = Arc::new(StaticImageReader::from_image(noise(64, 48)));

        let encoded = process_media(image, audio, &ImageProcessor::Identity, "mp4", &options(0)).unwrap();
        let file = DataSource::Path(encoded.file.path().to_path_buf()).materialize("mp4").unwrap();
        let decoded = ContainerAudioReader::open(file).unwrap().unwrap();
        assert_eq!(decoded.audio_channels(), 1);
        assert!(decoded.duration() > Duration::from_millis(800));
    }
}
