use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use image::codecs::webp::WebPDecoder;
use image::{AnimationDecoder, RgbaImage};

use crate::media::domain::frame_buffer_reader::FrameBufferReader;
use crate::media::domain::media_reader::ImageReader;
use crate::media::infrastructure::image_file_reader::StaticImageReader;
use crate::shared::constants::{DEFAULT_GIF_DELAY_CS, MIN_GIF_DELAY_CS};
use crate::shared::data_source::DataSource;
use crate::shared::error::{MediaError, MediaResult};
use crate::shared::frame::{Frame, ImageFrame};
use crate::shared::loop_count::LoopCount;
use crate::shared::media_info::MediaInfo;

const RIFF_HEADER_LEN: usize = 12;
const CHUNK_HEADER_LEN: usize = 8;

/// Opens a WebP file: animated files decode every frame with its own
/// delay, stills become a [`StaticImageReader`].
pub fn open_webp(source: &DataSource) -> MediaResult<ImageReader> {
    let bytes = source.read_all()?;
    let decoder = WebPDecoder::new(Cursor::new(&bytes))
        .map_err(|e| MediaError::unreadable(source.name(), e.to_string()))?;
    if !decoder.has_animation() {
        return Ok(Arc::new(StaticImageReader::open(source)?));
    }

    let mut frames: Vec<ImageFrame> = Vec::new();
    let mut timestamp = Duration::ZERO;
    for frame in decoder.into_frames() {
        let frame = frame.map_err(|e| MediaError::unreadable(source.name(), e.to_string()))?;
        let duration = frame_delay(frame.delay());
        let buffer: RgbaImage = frame.into_buffer();
        frames.push(Frame::new(buffer, duration, timestamp));
        timestamp += duration;
    }

    let Some(first) = frames.first() else {
        return Err(MediaError::unreadable(source.name(), "WebP has no frames"));
    };
    let loop_count = anim_loop_count(&bytes).map_or(LoopCount::Forever, loop_count_from_plays);
    let info = MediaInfo {
        width: first.width(),
        height: first.height(),
        loop_count,
        ..MediaInfo::empty()
    };
    log::debug!(
        "Decoded animated WebP {}: {} frames, loop {:?}",
        source.name(),
        frames.len(),
        loop_count
    );
    Ok(Arc::new(FrameBufferReader::new(frames, info)))
}

/// Loop field of the `ANIM` chunk, if the RIFF chunk list has one.
fn anim_loop_count(bytes: &[u8]) -> Option<u16> {
    if bytes.len() < RIFF_HEADER_LEN || &bytes[..4] != b"RIFF" || &bytes[8..12] != b"WEBP" {
        return None;
    }
    let mut pos = RIFF_HEADER_LEN;
    while pos + CHUNK_HEADER_LEN <= bytes.len() {
        let fourcc = &bytes[pos..pos + 4];
        let size = u32::from_le_bytes([bytes[pos + 4], bytes[pos + 5], bytes[pos + 6], bytes[pos + 7]]) as usize;
        let payload = pos + CHUNK_HEADER_LEN;
        if fourcc == b"ANIM" {
            let data = bytes.get(payload..payload + size.min(6))?;
            return (data.len() == 6).then(|| u16::from_le_bytes([data[4], data[5]]));
        }
        // Payloads are padded to an even length.
        pos = payload.checked_add(size)?.checked_add(size & 1)?;
    }
    None
}

/// WebP counts total plays, 0 meaning forever.
fn loop_count_from_plays(plays: u16) -> LoopCount {
    match plays {
        0 => LoopCount::Forever,
        1 => LoopCount::Never,
        n => LoopCount::Extra(n - 1),
    }
}

/// Applies the same short-delay floor as GIF playback.
fn frame_delay(delay: image::Delay) -> Duration {
    let (numer, denom) = delay.numer_denom_ms();
    let millis = if denom == 0 { 0 } else { numer / denom };
    if millis < MIN_GIF_DELAY_CS as u32 * 10 {
        Duration::from_millis(DEFAULT_GIF_DELAY_CS as u64 * 10)
    } else {
        Duration::from_millis(millis as u64)
    }
}
