use std::path::Path;
use std::time::Duration;

use ffmpeg_next::{codec, decoder, format, frame, media, Packet, Rational, Rescale};

use crate::shared::error::{CodecContext, MediaError, MediaResult};

/// An open demuxer positioned on one stream.
///
/// Owns the input context and maps decoder timestamps onto stream time.
/// The decoder itself lives next to the session so that callers keep its
/// concrete (video or audio) type.
pub(crate) struct DecodeSession {
    input: format::context::Input,
    stream_index: usize,
    time_base: Rational,
    start_pts: i64,
    frame_rate: Rational,
    eof_sent: bool,
    target: String,
}

// Safety: a session is owned by exactly one reader or iterator and is only
// touched from one thread at a time (readers guard theirs with a mutex).
unsafe impl Send for DecodeSession {}

impl DecodeSession {
    /// Opens `path` and selects its best stream of `kind`. Returns the codec
    /// parameters for the caller to build a decoder from.
    pub fn open(path: &Path, kind: media::Type) -> MediaResult<(Self, codec::context::Context)> {
        Self::open_optional(path, kind)?.ok_or_else(|| {
            MediaError::unreadable(path.display().to_string(), format!("no {kind:?} stream"))
        })
    }

    /// Like [`open`](Self::open), but a container without a stream of
    /// `kind` yields `None`.
    pub fn open_optional(
        path: &Path,
        kind: media::Type,
    ) -> MediaResult<Option<(Self, codec::context::Context)>> {
        let target = path.display().to_string();
        ffmpeg_next::init().codec("initialize ffmpeg", &target)?;

        let input = format::input(&path).map_err(|e| MediaError::unreadable(&target, e.to_string()))?;

        let (stream_index, time_base, start_pts, frame_rate, context) = {
            let Some(stream) = input.streams().best(kind) else {
                return Ok(None);
            };
            let start = stream.start_time();
            let start_pts = if start == ffmpeg_next::ffi::AV_NOPTS_VALUE {
                0
            } else {
                start
            };
            let context = codec::context::Context::from_parameters(stream.parameters())
                .codec("read codec parameters", &target)?;
            (
                stream.index(),
                stream.time_base(),
                start_pts,
                stream.avg_frame_rate(),
                context,
            )
        };

        Ok(Some((
            Self {
                input,
                stream_index,
                time_base,
                start_pts,
                frame_rate,
                eof_sent: false,
                target,
            },
            context,
        )))
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Frame duration implied by the container's average frame rate.
    pub fn frame_duration(&self) -> Option<Duration> {
        let rate = self.frame_rate;
        if rate.numerator() > 0 && rate.denominator() > 0 {
            Some(ticks_to_duration(1, Rational(rate.denominator(), rate.numerator())))
        } else {
            None
        }
    }

    /// Decodes the next frame into `frame`. Returns `false` once the stream
    /// and the decoder are both drained.
    pub fn receive_next(
        &mut self,
        decoder: &mut decoder::Opened,
        frame: &mut frame::Frame,
    ) -> MediaResult<bool> {
        loop {
            if decoder.receive_frame(frame).is_ok() {
                return Ok(true);
            }
            if self.eof_sent {
                return Ok(false);
            }
            match self.next_packet() {
                Some(packet) => {
                    if let Err(e) = decoder.send_packet(&packet) {
                        log::debug!("Skipping undecodable packet in {}: {e}", self.target);
                    }
                }
                None => {
                    decoder.send_eof().codec("flush decoder", &self.target)?;
                    self.eof_sent = true;
                }
            }
        }
    }

    /// Seeks to the last keyframe at or before `position` and resets the
    /// decoder.
    pub fn seek(&mut self, decoder: &mut decoder::Opened, position: Duration) -> MediaResult<()> {
        let pts = self.start_pts + self.to_pts(position);
        let micros = pts.rescale(self.time_base, ffmpeg_next::rescale::TIME_BASE);
        self.input
            .seek(micros, ..micros)
            .codec("seek", &self.target)?;
        decoder.flush();
        self.eof_sent = false;
        Ok(())
    }

    /// Presentation time of a decoded frame relative to the stream start.
    pub fn timestamp_of(&self, frame: &frame::Frame) -> Duration {
        let pts = frame
            .timestamp()
            .or_else(|| frame.pts())
            .unwrap_or(self.start_pts);
        ticks_to_duration((pts - self.start_pts).max(0), self.time_base)
    }

    fn to_pts(&self, position: Duration) -> i64 {
        let (num, den) = (self.time_base.numerator() as i128, self.time_base.denominator() as i128);
        if num <= 0 {
            return 0;
        }
        (position.as_nanos() as i128 * den / (num * NANOS_PER_SECOND)) as i64
    }

    fn next_packet(&mut self) -> Option<Packet> {
        let index = self.stream_index;
        self.input
            .packets()
            .find(|(stream, _)| stream.index() == index)
            .map(|(_, packet)| packet)
    }
}

const NANOS_PER_SECOND: i128 = 1_000_000_000;

/// Converts `ticks` of `time_base` to a duration without float rounding.
fn ticks_to_duration(ticks: i64, time_base: Rational) -> Duration {
    let (num, den) = (time_base.numerator() as i128, time_base.denominator() as i128);
    if den <= 0 || ticks <= 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos((ticks as i128 * num * NANOS_PER_SECOND / den) as u64)
}

/// Start times and durations of every frame found by a metadata scan.
///
/// Raw start times are stream timestamps; [`start`](Timeline::start)
/// shifts them so the first frame begins at zero.
#[derive(Clone, Debug, Default)]
pub(crate) struct Timeline {
    raw: Vec<Duration>,
    durations: Vec<Duration>,
}

impl Timeline {
    /// Builds a timeline from `(raw start, duration hint)` pairs in decode
    /// order. Each frame lasts until the next one starts; the last frame
    /// uses its hint. Frames sharing a start time are collapsed.
    pub fn from_scan(mut entries: Vec<(Duration, Duration)>) -> Self {
        entries.sort_by_key(|(start, _)| *start);
        entries.dedup_by_key(|(start, _)| *start);
        let raw: Vec<Duration> = entries.iter().map(|(start, _)| *start).collect();
        let durations = entries
            .iter()
            .enumerate()
            .map(|(i, (start, hint))| match raw.get(i + 1) {
                Some(next) => *next - *start,
                None => *hint,
            })
            .collect();
        Self { raw, durations }
    }

    /// Builds a timeline of back-to-back frames with the given durations.
    pub fn contiguous(durations: Vec<Duration>) -> Self {
        let mut raw = Vec::with_capacity(durations.len());
        let mut position = Duration::ZERO;
        for duration in &durations {
            raw.push(position);
            position += *duration;
        }
        Self { raw, durations }
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    fn origin(&self) -> Duration {
        self.raw.first().copied().unwrap_or_default()
    }

    pub fn raw(&self, index: usize) -> Duration {
        self.raw[index]
    }

    pub fn start(&self, index: usize) -> Duration {
        self.raw[index] - self.origin()
    }

    pub fn duration(&self, index: usize) -> Duration {
        self.durations[index]
    }

    pub fn total(&self) -> Duration {
        match self.len() {
            0 => Duration::ZERO,
            n => self.start(n - 1) + self.duration(n - 1),
        }
    }

    pub fn min_duration(&self) -> Duration {
        self.durations
            .iter()
            .copied()
            .filter(|d| !d.is_zero())
            .min()
            .unwrap_or_default()
    }

    /// Index of the frame whose interval contains `position` (relative to
    /// the first frame). Positions before the first frame map to it.
    pub fn index_at(&self, position: Duration) -> Option<usize> {
        if self.is_empty() {
            return None;
        }
        let raw = self.origin() + position;
        let after = self.raw.partition_point(|start| *start <= raw);
        Some(after.saturating_sub(1))
    }

    /// Index of the frame starting exactly at raw stream time `raw`.
    pub fn index_of_raw(&self, raw: Duration) -> Option<usize> {
        self.raw.binary_search(&raw).ok()
    }
}
