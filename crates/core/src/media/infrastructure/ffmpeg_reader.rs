use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling;
use ffmpeg_next::{decoder, frame, media};
use image::RgbaImage;

use crate::media::domain::frame_buffer_reader::FrameBufferReader;
use crate::media::domain::media_reader::{collect_frames, FrameIter, MediaReader, SharedReader};
use crate::media::domain::speed_reader::SpeedReader;
use crate::media::infrastructure::ffmpeg_session::{DecodeSession, Timeline};
use crate::shared::constants::STILL_FRAME_DURATION;
use crate::shared::data_source::MaterializedFile;
use crate::shared::error::{CodecContext, MediaError, MediaResult};
use crate::shared::frame::{wrap_timestamp, Frame, ImageFrame};
use crate::shared::loop_count::LoopCount;
use crate::shared::media_info::MediaInfo;

/// Decodes the video stream of a container via ffmpeg-next.
///
/// Construction runs a metadata-only pass over the whole stream to learn
/// every frame's timing. Random access seeks near the target and decodes
/// forward; sequential access opens an independent decode session.
pub struct ContainerImageReader {
    file: MaterializedFile,
    timeline: Timeline,
    info: MediaInfo,
    seek_state: Mutex<Option<VideoSession>>,
}

/// A decode session with its video decoder and RGBA converter.
struct VideoSession {
    session: DecodeSession,
    decoder: decoder::Video,
    scaler: scaling::Context,
}

// Safety: see DecodeSession. The scaler is only used by the session owner.
unsafe impl Send for VideoSession {}

impl VideoSession {
    fn open(file: &MaterializedFile) -> MediaResult<Self> {
        let (session, context) = DecodeSession::open(file.path(), media::Type::Video)?;
        let decoder = context
            .decoder()
            .video()
            .codec("open video decoder", session.target())?;
        let scaler = scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            Pixel::RGBA,
            decoder.width(),
            decoder.height(),
            scaling::Flags::BILINEAR,
        )
        .codec("create pixel converter", session.target())?;
        Ok(Self {
            session,
            decoder,
            scaler,
        })
    }

    fn next_decoded(&mut self, decoded: &mut frame::Video) -> MediaResult<bool> {
        self.session.receive_next(&mut self.decoder, decoded)
    }

    /// Seeks near `target` and decodes forward, keeping the last frame that
    /// starts at or before it. `None` means the seek landed past the target.
    fn grab(&mut self, seek_to: Duration, target: Duration) -> MediaResult<Option<frame::Video>> {
        self.session.seek(&mut self.decoder, seek_to)?;
        let mut retained: Option<frame::Video> = None;
        let mut current = frame::Video::empty();
        while self.next_decoded(&mut current)? {
            if self.session.timestamp_of(&current) > target {
                break;
            }
            // Swap so the next decode cannot overwrite the retained frame.
            match retained.as_mut() {
                Some(kept) => std::mem::swap(kept, &mut current),
                None => retained = Some(std::mem::replace(&mut current, frame::Video::empty())),
            }
        }
        Ok(retained)
    }

    fn to_rgba(&mut self, decoded: &frame::Video) -> MediaResult<RgbaImage> {
        let mut rgba = frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgba)
            .codec("convert pixels", self.session.target())?;
        extract_rgba_pixels(&rgba)
    }
}

impl ContainerImageReader {
    pub fn open(file: MaterializedFile) -> MediaResult<Self> {
        let mut scan = VideoSession::open(&file)?;
        let (width, height) = (scan.decoder.width(), scan.decoder.height());
        let advertised = scan.session.frame_duration();

        let mut starts = Vec::new();
        let mut decoded = frame::Video::empty();
        while scan.next_decoded(&mut decoded)? {
            starts.push(scan.session.timestamp_of(&decoded));
        }
        if starts.is_empty() {
            return Err(MediaError::unreadable(
                scan.session.target(),
                "video stream has no decodable frames",
            ));
        }

        let nominal = advertised
            .or_else(|| estimate_frame_duration(&starts))
            .unwrap_or(STILL_FRAME_DURATION);
        let timeline = Timeline::from_scan(starts.into_iter().map(|s| (s, nominal)).collect());
        let info = MediaInfo {
            frame_count: timeline.len(),
            duration: timeline.total(),
            frame_duration: nominal,
            width,
            height,
            audio: None,
            loop_count: LoopCount::Forever,
        };
        log::debug!(
            "Scanned {}: {} frames, {:?}, {}x{}",
            scan.session.target(),
            info.frame_count,
            info.duration,
            width,
            height
        );

        Ok(Self {
            file,
            timeline,
            info,
            seek_state: Mutex::new(None),
        })
    }

    fn frame_at(&self, index: usize, content: RgbaImage) -> ImageFrame {
        Frame::new(
            content,
            self.timeline.duration(index),
            self.timeline.start(index),
        )
    }
}

impl MediaReader<RgbaImage> for ContainerImageReader {
    fn info(&self) -> &MediaInfo {
        &self.info
    }

    fn read_frame(&self, timestamp: Duration) -> MediaResult<ImageFrame> {
        let local = wrap_timestamp(timestamp, self.info.duration);
        let index = self
            .timeline
            .index_at(local)
            .ok_or(MediaError::NoSuchFrame(timestamp))?;
        let target = self.timeline.raw(index);

        let mut guard = self.seek_state.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            *guard = Some(VideoSession::open(&self.file)?);
        }
        let Some(state) = guard.as_mut() else {
            return Err(MediaError::NoSuchFrame(timestamp));
        };

        let decoded = match state.grab(target, target)? {
            Some(decoded) => decoded,
            None => {
                log::debug!("Seek overshot {target:?}, decoding from the start");
                state
                    .grab(Duration::ZERO, target)?
                    .ok_or(MediaError::NoSuchFrame(timestamp))?
            }
        };
        let content = state.to_rgba(&decoded)?;
        Ok(self.frame_at(index, content))
    }

    fn frames(&self) -> FrameIter<'_, RgbaImage> {
        match VideoSession::open(&self.file) {
            Ok(state) => Box::new(ContainerFrameIter {
                reader: self,
                state,
                last_index: None,
                done: false,
            }),
            Err(e) => Box::new(std::iter::once(Err(e))),
        }
    }

    /// Decoders only run forward, so reversal buffers every frame.
    fn reversed(self: Arc<Self>) -> MediaResult<SharedReader<RgbaImage>> {
        let frames = collect_frames(self.as_ref())?;
        let buffered: SharedReader<RgbaImage> =
            Arc::new(FrameBufferReader::new(frames, self.info.clone()));
        buffered.reversed()
    }

    fn change_speed(self: Arc<Self>, multiplier: f64) -> MediaResult<SharedReader<RgbaImage>> {
        Ok(Arc::new(SpeedReader::<RgbaImage>::new(self, multiplier)?))
    }

    fn close(&self) {
        let mut guard = self.seek_state.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = None;
    }
}

struct ContainerFrameIter<'a> {
    reader: &'a ContainerImageReader,
    state: VideoSession,
    last_index: Option<usize>,
    done: bool,
}

impl Iterator for ContainerFrameIter<'_> {
    type Item = MediaResult<ImageFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut decoded = frame::Video::empty();
        loop {
            match self.state.next_decoded(&mut decoded) {
                Ok(true) => {}
                Ok(false) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
            let raw = self.state.session.timestamp_of(&decoded);
            let Some(index) = self.reader.timeline.index_of_raw(raw) else {
                continue;
            };
            if self.last_index.is_some_and(|last| index <= last) {
                continue;
            }
            self.last_index = Some(index);
            return Some(
                self.state
                    .to_rgba(&decoded)
                    .map(|content| self.reader.frame_at(index, content)),
            );
        }
    }
}

/// Median spacing between scanned start times.
fn estimate_frame_duration(starts: &[Duration]) -> Option<Duration> {
    let mut sorted = starts.to_vec();
    sorted.sort();
    let mut gaps: Vec<Duration> = sorted
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|gap| !gap.is_zero())
        .collect();
    gaps.sort();
    gaps.get(gaps.len() / 2).copied()
}

/// Copies an RGBA ffmpeg frame into a tightly packed image, dropping the
/// per-row padding ffmpeg may add (stride > width * 4).
fn extract_rgba_pixels(rgba: &frame::Video) -> MediaResult<RgbaImage> {
    let (width, height) = (rgba.width(), rgba.height());
    let stride = rgba.stride(0);
    let data = rgba.data(0);
    let row = width as usize * 4;

    let mut pixels = Vec::with_capacity(row * height as usize);
    for y in 0..height as usize {
        let start = y * stride;
        pixels.extend_from_slice(&data[start..start + row]);
    }
    RgbaImage::from_raw(width, height, pixels).ok_or_else(|| {
        MediaError::FrameProcessing(format!("decoded frame is not {width}x{height} RGBA"))
    })
}
