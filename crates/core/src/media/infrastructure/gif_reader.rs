use std::time::Duration;

use image::RgbaImage;

use crate::media::domain::frame_buffer_reader::FrameBufferReader;
use crate::shared::constants::{DEFAULT_GIF_DELAY_CS, MIN_GIF_DELAY_CS};
use crate::shared::data_source::DataSource;
use crate::shared::error::{MediaError, MediaResult};
use crate::shared::frame::{Frame, ImageFrame};
use crate::shared::loop_count::LoopCount;
use crate::shared::media_info::MediaInfo;

/// Decodes every frame of a GIF, compositing partial frames onto a
/// full-size canvas.
///
/// Frame durations are kept per frame; the reader's frame duration is the
/// shortest one. Delays below two centiseconds play as ten, the way
/// browsers show them.
pub fn open_gif(source: &DataSource) -> MediaResult<FrameBufferReader<RgbaImage>> {
    let mut options = gif::DecodeOptions::new();
    options.set_color_output(gif::ColorOutput::RGBA);
    let mut decoder = options.read_info(source.new_stream()?)?;

    let width = decoder.width() as u32;
    let height = decoder.height() as u32;
    let mut canvas = RgbaImage::new(width, height);
    let mut frames: Vec<ImageFrame> = Vec::new();
    let mut timestamp = Duration::ZERO;

    while let Some(frame) = decoder.read_next_frame()? {
        let previous = (frame.dispose == gif::DisposalMethod::Previous).then(|| canvas.clone());
        draw(&mut canvas, frame);

        let duration = frame_delay(frame.delay);
        frames.push(Frame::new(canvas.clone(), duration, timestamp));
        timestamp += duration;

        match frame.dispose {
            gif::DisposalMethod::Background => clear(&mut canvas, frame),
            gif::DisposalMethod::Previous => {
                if let Some(previous) = previous {
                    canvas = previous;
                }
            }
            _ => {}
        }
    }

    if frames.is_empty() {
        return Err(MediaError::unreadable(source.name(), "GIF has no frames"));
    }

    let loop_count = LoopCount::from_repeat(decoder.repeat());
    log::debug!(
        "Decoded GIF {}: {}x{}, {} frames, loop {:?}",
        source.name(),
        width,
        height,
        frames.len(),
        loop_count
    );

    let info = MediaInfo {
        width,
        height,
        loop_count,
        ..MediaInfo::empty()
    };
    Ok(FrameBufferReader::new(frames, info))
}

fn frame_delay(delay_cs: u16) -> Duration {
    let delay_cs = if delay_cs < MIN_GIF_DELAY_CS {
        DEFAULT_GIF_DELAY_CS
    } else {
        delay_cs
    };
    Duration::from_millis(delay_cs as u64 * 10)
}

/// Copies the non-transparent pixels of `frame` onto the canvas.
fn draw(canvas: &mut RgbaImage, frame: &gif::Frame<'_>) {
    let (left, top) = (frame.left as u32, frame.top as u32);
    let frame_width = frame.width as u32;
    for (i, pixel) in frame.buffer.chunks_exact(4).enumerate() {
        if pixel[3] == 0 {
            continue;
        }
        let x = left + i as u32 % frame_width;
        let y = top + i as u32 / frame_width;
        if x < canvas.width() && y < canvas.height() {
            canvas.put_pixel(x, y, image::Rgba([pixel[0], pixel[1], pixel[2], pixel[3]]));
        }
    }
}

fn clear(canvas: &mut RgbaImage, frame: &gif::Frame<'_>) {
    let right = (frame.left as u32 + frame.width as u32).min(canvas.width());
    let bottom = (frame.top as u32 + frame.height as u32).min(canvas.height());
    for y in frame.top as u32..bottom {
        for x in frame.left as u32..right {
            canvas.put_pixel(x, y, image::Rgba([0, 0, 0, 0]));
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::media::domain::media_reader::{collect_frames, MediaReader};
    use rstest::rstest;
    use std::borrow::Cow;

    /// Encodes a GIF of `width`x`height` frames described by
    /// `(left, top, w, h, palette index, delay, disposal)`.
    pub(crate) fn encode_gif(
        width: u16,
        height: u16,
        frames: &[(u16, u16, u16, u16, u8, u16, gif::DisposalMethod)],
        repeat: Option<gif::Repeat>,
    ) -> Vec<u8> {
        let palette = [0, 0, 0, 255, 0, 0, 0, 255, 0, 0, 0, 255];
        let mut bytes = Vec::new();
        {
            let mut encoder = gif::Encoder::new(&mut bytes, width, height, &palette).unwrap();
            if let Some(repeat) = repeat {
                encoder.set_repeat(repeat).unwrap();
            }
            for &(left, top, w, h, index, delay, dispose) in frames {
                let frame = gif::Frame {
                    left,
                    top,
                    width: w,
                    height: h,
                    delay,
                    dispose,
                    buffer: Cow::Owned(vec![index; w as usize * h as usize]),
                    ..gif::Frame::default()
                };
                encoder.write_frame(&frame).unwrap();
            }
        }
        bytes
    }

    fn open(bytes: Vec<u8>) -> FrameBufferReader<RgbaImage> {
        open_gif(&DataSource::from_bytes("test.gif", bytes)).unwrap()
    }

    #[rstest]
    #[case(0, 100)]
    #[case(1, 100)]
    #[case(2, 20)]
    #[case(7, 70)]
    fn test_frame_delay(#[case] delay_cs: u16, #[case] expected_ms: u64) {
        assert_eq!(frame_delay(delay_cs), Duration::from_millis(expected_ms));
    }

    #[test]
    fn test_per_frame_durations_and_minimum() {
        let keep = gif::DisposalMethod::Keep;
        let bytes = encode_gif(
            4,
            4,
            &[(0, 0, 4, 4, 0, 5, keep), (0, 0, 4, 4, 1, 3, keep), (0, 0, 4, 4, 2, 8, keep)],
            Some(gif::Repeat::Infinite),
        );
        let reader = open(bytes);
        assert_eq!(reader.frame_count(), 3);
        assert_eq!(reader.duration(), Duration::from_millis(160));
        assert_eq!(reader.frame_duration(), Duration::from_millis(30));
        assert_eq!(reader.width(), 4);
        assert_eq!(reader.loop_count(), LoopCount::Forever);
        let frames = collect_frames(&reader).unwrap();
        assert_eq!(frames[1].timestamp(), Duration::from_millis(50));
        assert_eq!(frames[1].content().get_pixel(0, 0).0, [255, 0, 0, 255]);
    }

    #[rstest]
    #[case(None, LoopCount::Never)]
    #[case(Some(gif::Repeat::Finite(3)), LoopCount::Extra(3))]
    fn test_loop_count_from_netscape_block(
        #[case] repeat: Option<gif::Repeat>,
        #[case] expected: LoopCount,
    ) {
        let keep = gif::DisposalMethod::Keep;
        let bytes = encode_gif(2, 2, &[(0, 0, 2, 2, 0, 10, keep)], repeat);
        assert_eq!(open(bytes).loop_count(), expected);
    }

    #[test]
    fn test_partial_frames_composite_onto_canvas() {
        let bytes = encode_gif(
            4,
            4,
            &[
                (0, 0, 4, 4, 0, 10, gif::DisposalMethod::Keep),
                (2, 2, 2, 2, 2, 10, gif::DisposalMethod::Background),
                (0, 0, 1, 1, 1, 10, gif::DisposalMethod::Keep),
            ],
            None,
        );
        let frames = collect_frames(&open(bytes)).unwrap();
        let second = frames[1].content();
        assert_eq!(second.get_pixel(0, 0).0, [0, 0, 0, 255]);
        assert_eq!(second.get_pixel(3, 3).0, [0, 255, 0, 255]);
        // The second frame's area was cleared after it was shown.
        let third = frames[2].content();
        assert_eq!(third.get_pixel(3, 3).0, [0, 0, 0, 0]);
        assert_eq!(third.get_pixel(0, 0).0, [255, 0, 0, 255]);
        assert_eq!(third.get_pixel(1, 1).0, [0, 0, 0, 255]);
    }

    #[test]
    fn test_garbage_is_rejected() {
        let source = DataSource::from_bytes("bad.gif", b"not a gif at all".to_vec());
        assert!(open_gif(&source).is_err());
    }
}
