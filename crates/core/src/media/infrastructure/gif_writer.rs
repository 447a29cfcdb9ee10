use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crossbeam_channel::Receiver;
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

use crate::media::domain::audio_samples::AudioFrame;
use crate::media::domain::media_writer::{MediaWriter, WriterSettings};
use crate::pipeline::infrastructure::async_executor::{default_parallelism, AsyncExecutor};
use crate::shared::constants::{
    GIF_COLOR_TOLERANCE, GIF_QUANTIZE_SPEED, MAX_GIF_DIMENSION, MIN_GIF_DELAY_CS,
};
use crate::shared::error::{MediaError, MediaResult};
use crate::shared::frame::ImageFrame;
use crate::shared::loop_count::LoopCount;

type QuantizedFrame = gif::Frame<'static>;

/// Encodes animated GIFs.
///
/// Pixels that barely changed since the previous frame are made
/// transparent so the encoder can compress them away. Quantisation runs on
/// an [`AsyncExecutor`]; finished frames are written in submission order
/// whenever the writer is next called.
pub struct GifWriter {
    path: PathBuf,
    loop_count: LoopCount,
    parallelism: usize,
    state: Option<GifState>,
    closed: bool,
}

struct GifState {
    encoder: gif::Encoder<BufWriter<File>>,
    width: u32,
    height: u32,
    executor: AsyncExecutor<(RgbaImage, u16)>,
    quantized: Receiver<MediaResult<QuantizedFrame>>,
    /// What a viewer sees after the last submitted frame.
    displayed: Option<RgbaImage>,
    origin: Duration,
    written_cs: u64,
}

impl GifWriter {
    pub fn new(path: impl AsRef<Path>, settings: &WriterSettings) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            loop_count: settings.loop_count,
            parallelism: default_parallelism(),
            state: None,
            closed: false,
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    fn open(&self, first: &ImageFrame) -> MediaResult<GifState> {
        let (width, height) = bound_gif_dimensions(first.width(), first.height());
        let file = BufWriter::new(File::create(&self.path)?);
        let mut encoder = gif::Encoder::new(file, width as u16, height as u16, &[])?;
        if let Some(repeat) = self.loop_count.to_repeat() {
            encoder.set_repeat(repeat)?;
        }
        log::debug!(
            "Opening GIF {}: {width}x{height}, loop {:?}",
            self.path.display(),
            self.loop_count
        );

        let (tx, quantized) = crossbeam_channel::unbounded();
        let executor = AsyncExecutor::new(
            self.parallelism,
            move |(image, delay): (RgbaImage, u16)| Ok(quantize(image, delay)),
            move |result| {
                let _ = tx.send(result);
            },
        );

        Ok(GifState {
            encoder,
            width,
            height,
            executor,
            quantized,
            displayed: None,
            origin: first.timestamp(),
            written_cs: 0,
        })
    }
}

impl GifState {
    fn submit(&mut self, frame: ImageFrame) -> MediaResult<()> {
        let delay = self.next_delay(&frame);
        let mut image = frame.into_content();
        if image.dimensions() != (self.width, self.height) {
            image = imageops::resize(&image, self.width, self.height, FilterType::Triangle);
        }

        let mut output = image.clone();
        match self.displayed.as_mut() {
            Some(displayed) => mask_unchanged(&mut output, displayed, GIF_COLOR_TOLERANCE),
            None => self.displayed = Some(image),
        }

        self.executor.submit((output, delay))?;
        self.drain_ready()
    }

    /// Centisecond delay for `frame`, measured against the true timeline so
    /// rounding errors do not accumulate.
    fn next_delay(&mut self, frame: &ImageFrame) -> u16 {
        let end = frame.end().saturating_sub(self.origin);
        let end_cs = (end.as_millis() as u64 + 5) / 10;
        let delay = end_cs
            .saturating_sub(self.written_cs)
            .max(u64::from(MIN_GIF_DELAY_CS))
            .min(u64::from(u16::MAX));
        self.written_cs += delay;
        delay as u16
    }

    fn drain_ready(&mut self) -> MediaResult<()> {
        while let Ok(result) = self.quantized.try_recv() {
            self.encoder.write_frame(&result?)?;
        }
        Ok(())
    }

    fn finish(mut self) -> MediaResult<()> {
        self.executor.close();
        self.drain_ready()?;
        let mut file = self.encoder.into_inner()?;
        file.flush()?;
        Ok(())
    }
}

fn quantize(mut image: RgbaImage, delay: u16) -> QuantizedFrame {
    let (width, height) = image.dimensions();
    let mut frame =
        gif::Frame::from_rgba_speed(width as u16, height as u16, &mut *image, GIF_QUANTIZE_SPEED);
    frame.delay = delay;
    frame.dispose = gif::DisposalMethod::Keep;
    frame
}

/// Scales so the longest edge is at most [`MAX_GIF_DIMENSION`].
pub fn bound_gif_dimensions(width: u32, height: u32) -> (u32, u32) {
    let longest = width.max(height).max(1);
    if longest <= MAX_GIF_DIMENSION {
        return (width.max(1), height.max(1));
    }
    let scale = MAX_GIF_DIMENSION as f64 / longest as f64;
    (
        ((width as f64 * scale).round() as u32).max(1),
        ((height as f64 * scale).round() as u32).max(1),
    )
}

/// Weighted RGB distance approximating perceived difference ("redmean").
pub fn color_distance(a: &Rgba<u8>, b: &Rgba<u8>) -> f64 {
    let mean_red = (a[0] as f64 + b[0] as f64) / 2.0;
    let dr = a[0] as f64 - b[0] as f64;
    let dg = a[1] as f64 - b[1] as f64;
    let db = a[2] as f64 - b[2] as f64;
    ((2.0 + mean_red / 256.0) * dr * dr + 4.0 * dg * dg + (2.0 + (255.0 - mean_red) / 256.0) * db * db)
        .sqrt()
}

/// Makes pixels of `frame` that are within `tolerance` of `displayed`
/// transparent and records every pixel that does change in `displayed`.
fn mask_unchanged(frame: &mut RgbaImage, displayed: &mut RgbaImage, tolerance: f64) {
    for (pixel, shown) in frame.pixels_mut().zip(displayed.pixels_mut()) {
        let both_opaque = pixel[3] == 255 && shown[3] == 255;
        if both_opaque && color_distance(pixel, shown) < tolerance {
            *pixel = Rgba([0, 0, 0, 0]);
        } else if pixel[3] != 0 {
            *shown = *pixel;
        }
    }
}

impl MediaWriter for GifWriter {
    fn write_image_frame(&mut self, frame: ImageFrame) -> MediaResult<()> {
        if self.closed {
            return Err(MediaError::InvalidArgument("writer is closed".into()));
        }
        if self.state.is_none() {
            self.state = Some(self.open(&frame)?);
        }
        match self.state.as_mut() {
            Some(state) => state.submit(frame),
            None => Ok(()),
        }
    }

    fn write_audio_frame(&mut self, _frame: AudioFrame) -> MediaResult<()> {
        Ok(())
    }

    fn close(&mut self) -> MediaResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.state.take() {
            Some(state) => state.finish(),
            None => Err(MediaError::InvalidArgument(format!(
                "no image frames were written to {}",
                self.path.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::domain::media_reader::{collect_frames, MediaReader};
    use crate::media::infrastructure::gif_reader::open_gif;
    use crate::shared::data_source::DataSource;
    use crate::shared::frame::Frame;
    use approx::assert_relative_eq;
    use rstest::rstest;

    fn frame(rgb: [u8; 3], width: u32, height: u32, start_ms: u64, duration_ms: u64) -> ImageFrame {
        Frame::new(
            RgbaImage::from_pixel(width, height, Rgba([rgb[0], rgb[1], rgb[2], 255])),
            Duration::from_millis(duration_ms),
            Duration::from_millis(start_ms),
        )
    }

    fn write_gif(frames: Vec<ImageFrame>, loop_count: LoopCount) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.gif");
        let settings = WriterSettings {
            loop_count,
            ..WriterSettings::default()
        };
        let mut writer = GifWriter::new(&path, &settings).with_parallelism(3);
        for frame in frames {
            writer.write_image_frame(frame).unwrap();
        }
        writer.close().unwrap();
        (dir, path)
    }

    #[rstest]
    #[case(100, 50, (100, 50))]
    #[case(960, 480, (480, 240))]
    #[case(300, 1200, (120, 480))]
    fn test_bound_gif_dimensions(#[case] w: u32, #[case] h: u32, #[case] expected: (u32, u32)) {
        assert_eq!(bound_gif_dimensions(w, h), expected);
    }

    #[test]
    fn test_color_distance() {
        let black = Rgba([0, 0, 0, 255]);
        assert_relative_eq!(color_distance(&black, &black), 0.0);
        assert!(color_distance(&black, &Rgba([2, 2, 2, 255])) < GIF_COLOR_TOLERANCE);
        assert!(color_distance(&black, &Rgba([40, 0, 0, 255])) > GIF_COLOR_TOLERANCE);
    }

    #[test]
    fn test_mask_unchanged_tracks_displayed_pixels() {
        let mut displayed = RgbaImage::from_pixel(2, 1, Rgba([100, 100, 100, 255]));
        let mut next = RgbaImage::from_pixel(2, 1, Rgba([101, 100, 100, 255]));
        next.put_pixel(1, 0, Rgba([200, 0, 0, 255]));
        mask_unchanged(&mut next, &mut displayed, GIF_COLOR_TOLERANCE);
        assert_eq!(next.get_pixel(0, 0)[3], 0);
        assert_eq!(next.get_pixel(1, 0).0, [200, 0, 0, 255]);
        assert_eq!(displayed.get_pixel(0, 0).0, [100, 100, 100, 255]);
        assert_eq!(displayed.get_pixel(1, 0).0, [200, 0, 0, 255]);
    }

    #[test]
    fn test_frames_and_delays_survive_round_trip() {
        let frames = vec![
            frame([255, 0, 0], 8, 8, 0, 100),
            frame([0, 0, 255], 8, 8, 100, 50),
            frame([0, 255, 0], 8, 8, 150, 200),
        ];
        let (_dir, path) = write_gif(frames, LoopCount::Forever);

        let reader = open_gif(&DataSource::Path(path)).unwrap();
        assert_eq!(reader.frame_count(), 3);
        assert_eq!(reader.duration(), Duration::from_millis(350));
        assert_eq!(reader.loop_count(), LoopCount::Forever);
        let decoded = collect_frames(&reader).unwrap();
        let [r, g, b, _] = decoded[1].content().get_pixel(4, 4).0;
        assert!(b > 200 && r < 50 && g < 50, "got {:?}", (r, g, b));
    }

    #[test]
    fn test_short_delays_accumulate_against_timeline() {
        // 15 ms frames round to 1 or 2 cs; every one is raised to the minimum.
        let frames = (0..10)
            .map(|i| frame([i as u8 * 20, 0, 0], 4, 4, i * 15, 15))
            .collect();
        let (_dir, path) = write_gif(frames, LoopCount::Forever);

        let bytes = std::fs::read(path).unwrap();
        let mut decoder = gif::DecodeOptions::new().read_info(bytes.as_slice()).unwrap();
        let mut total_cs = 0u32;
        while let Some(frame) = decoder.read_next_frame().unwrap() {
            assert!(frame.delay >= MIN_GIF_DELAY_CS);
            total_cs += frame.delay as u32;
        }
        assert!((15..=20).contains(&total_cs), "total {total_cs} cs");
    }

    #[rstest]
    #[case(LoopCount::Never, LoopCount::Never)]
    #[case(LoopCount::Extra(2), LoopCount::Extra(2))]
    fn test_loop_count_written(#[case] loop_count: LoopCount, #[case] expected: LoopCount) {
        let (_dir, path) = write_gif(vec![frame([9, 9, 9], 4, 4, 0, 100)], loop_count);
        assert_eq!(open_gif(&DataSource::Path(path)).unwrap().loop_count(), expected);
    }

    #[test]
    fn test_large_frames_are_bounded() {
        let (_dir, path) = write_gif(vec![frame([1, 2, 3], 960, 200, 0, 100)], LoopCount::Forever);
        let reader = open_gif(&DataSource::Path(path)).unwrap();
        assert_eq!((reader.width(), reader.height()), (480, 100));
    }

    #[test]
    fn test_close_without_frames_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = GifWriter::new(dir.path().join("x.gif"), &WriterSettings::default());
        assert!(!writer.supports_audio());
        assert!(writer.close().is_err());
        assert!(writer.close().is_ok());
    }
}
