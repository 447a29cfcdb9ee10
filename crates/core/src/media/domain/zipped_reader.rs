use std::sync::Arc;
use std::time::Duration;

use crate::media::domain::media_reader::{FrameIter, MediaReader, SharedReader};
use crate::shared::error::MediaResult;
use crate::shared::frame::{wrap_timestamp, Frame, FrameContent};
use crate::shared::media_info::MediaInfo;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Controller {
    First,
    Second,
}

/// Drives two readers in lockstep, producing frames with both contents.
///
/// The controlling reader sets the frame cadence; the other one is sampled
/// with circular [`MediaReader::read_frame`] at each controlling timestamp.
/// The result lasts as long as the longer source, so the shorter one loops.
pub struct ZippedReader<A, B> {
    first: SharedReader<A>,
    second: SharedReader<B>,
    controller: Controller,
    info: MediaInfo,
}

/// Prefers the animated reader; when both or neither are animated, the one
/// with the shorter frame duration. Ties go to the first reader.
pub fn choose_controller(first: &MediaInfo, second: &MediaInfo) -> Controller {
    match (first.is_animated(), second.is_animated()) {
        (true, false) => Controller::First,
        (false, true) => Controller::Second,
        _ if second.frame_duration < first.frame_duration => Controller::Second,
        _ => Controller::First,
    }
}

impl<A: FrameContent, B: FrameContent> ZippedReader<A, B> {
    pub fn new(first: SharedReader<A>, second: SharedReader<B>) -> Self {
        let controller = choose_controller(first.info(), second.info());
        let leading = match controller {
            Controller::First => first.info(),
            Controller::Second => second.info(),
        };
        let info = MediaInfo {
            duration: first.duration().max(second.duration()),
            width: first.width().max(second.width()),
            height: first.height().max(second.height()),
            ..leading.clone()
        };
        Self {
            first,
            second,
            controller,
            info,
        }
    }

    pub fn controller(&self) -> Controller {
        self.controller
    }

    fn controlling_duration(&self) -> Duration {
        match self.controller {
            Controller::First => self.first.duration(),
            Controller::Second => self.second.duration(),
        }
    }

    /// Pairs one controlling frame, shifted to `timestamp`, with the other
    /// reader's frame at the same instant.
    fn pair(&self, controlling: PairSide<A, B>, timestamp: Duration) -> MediaResult<Frame<(A, B)>> {
        match controlling {
            PairSide::First(frame) => {
                let duration = frame.duration();
                let other = self.second.read_frame(timestamp)?;
                Ok(Frame::new(
                    (frame.into_content(), other.into_content()),
                    duration,
                    timestamp,
                ))
            }
            PairSide::Second(frame) => {
                let duration = frame.duration();
                let other = self.first.read_frame(timestamp)?;
                Ok(Frame::new(
                    (other.into_content(), frame.into_content()),
                    duration,
                    timestamp,
                ))
            }
        }
    }

    fn controlling_frames(&self) -> Box<dyn Iterator<Item = MediaResult<PairSide<A, B>>> + '_> {
        match self.controller {
            Controller::First => Box::new(self.first.frames().map(|f| f.map(PairSide::First))),
            Controller::Second => Box::new(self.second.frames().map(|f| f.map(PairSide::Second))),
        }
    }
}

enum PairSide<A, B> {
    First(Frame<A>),
    Second(Frame<B>),
}

impl<A, B> PairSide<A, B> {
    fn timestamp(&self) -> Duration {
        match self {
            Self::First(f) => f.timestamp(),
            Self::Second(f) => f.timestamp(),
        }
    }
}

impl<A: FrameContent, B: FrameContent> MediaReader<(A, B)> for ZippedReader<A, B> {
    fn info(&self) -> &MediaInfo {
        &self.info
    }

    fn read_frame(&self, timestamp: Duration) -> MediaResult<Frame<(A, B)>> {
        let timestamp = wrap_timestamp(timestamp, self.info.duration);
        let controlling = match self.controller {
            Controller::First => PairSide::First(self.first.read_frame(timestamp)?),
            Controller::Second => PairSide::Second(self.second.read_frame(timestamp)?),
        };
        // Snap to the start of the controlling frame on the zipped timeline.
        let local = wrap_timestamp(timestamp, self.controlling_duration());
        let start = timestamp - local.saturating_sub(controlling.timestamp()).min(timestamp);
        self.pair(controlling, start)
    }

    fn frames(&self) -> FrameIter<'_, (A, B)> {
        Box::new(ZippedFrames {
            reader: self,
            cycle: None,
            offset: Duration::ZERO,
            yielded_in_cycle: false,
            done: false,
        })
    }

    fn reversed(self: Arc<Self>) -> MediaResult<SharedReader<(A, B)>> {
        let first = self.first.clone().reversed()?;
        let second = self.second.clone().reversed()?;
        Ok(Arc::new(ZippedReader::new(first, second)))
    }

    fn change_speed(self: Arc<Self>, multiplier: f64) -> MediaResult<SharedReader<(A, B)>> {
        let first = self.first.clone().change_speed(multiplier)?;
        let second = self.second.clone().change_speed(multiplier)?;
        Ok(Arc::new(ZippedReader::new(first, second)))
    }

    fn close(&self) {
        self.first.close();
        self.second.close();
    }
}

/// Re-drives the controlling reader once per cycle until the longer
/// duration is covered.
struct ZippedFrames<'a, A: FrameContent, B: FrameContent> {
    reader: &'a ZippedReader<A, B>,
    cycle: Option<Box<dyn Iterator<Item = MediaResult<PairSide<A, B>>> + 'a>>,
    offset: Duration,
    yielded_in_cycle: bool,
    done: bool,
}

impl<A: FrameContent, B: FrameContent> Iterator for ZippedFrames<'_, A, B> {
    type Item = MediaResult<Frame<(A, B)>>;

    fn next(&mut self) -> Option<Self::Item> {
        let total = self.reader.info.duration;
        loop {
            if self.done || self.offset >= total {
                return None;
            }
            let reader = self.reader;
            let cycle = self.cycle.get_or_insert_with(|| reader.controlling_frames());
            match cycle.next() {
                Some(Ok(side)) => {
                    let timestamp = self.offset + side.timestamp();
                    if timestamp >= total {
                        self.done = true;
                        return None;
                    }
                    self.yielded_in_cycle = true;
                    return Some(self.reader.pair(side, timestamp));
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    let step = self.reader.controlling_duration();
                    if !self.yielded_in_cycle || step.is_zero() {
                        self.done = true;
                        return None;
                    }
                    self.offset += step;
                    self.cycle = None;
                    self.yielded_in_cycle = false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::domain::frame_buffer_reader::tests::{buffer_reader, info, solid};
    use crate::media::domain::frame_buffer_reader::FrameBufferReader;
    use crate::media::domain::media_reader::collect_frames;
    use image::RgbaImage;

    fn still(value: u8, duration_ms: u64) -> SharedReader<RgbaImage> {
        let frame = Frame::new(solid(value), Duration::from_millis(duration_ms), Duration::ZERO);
        Arc::new(FrameBufferReader::new(vec![frame], info()))
    }

    fn values(frame: &Frame<(RgbaImage, RgbaImage)>) -> (u8, u8) {
        let (a, b) = frame.content();
        (a.get_pixel(0, 0).0[0], b.get_pixel(0, 0).0[0])
    }

    #[test]
    fn test_prefers_animated_reader() {
        let animated: SharedReader<RgbaImage> = Arc::new(buffer_reader(&[50, 50]));
        let zipped = ZippedReader::new(still(200, 10), animated);
        assert_eq!(zipped.controller(), Controller::Second);
    }

    #[test]
    fn test_prefers_shorter_frame_duration_when_both_animated() {
        let slow: SharedReader<RgbaImage> = Arc::new(buffer_reader(&[100, 100]));
        let fast: SharedReader<RgbaImage> = Arc::new(buffer_reader(&[20, 20, 20]));
        let zipped = ZippedReader::new(slow, fast);
        assert_eq!(zipped.controller(), Controller::Second);
        assert_eq!(zipped.frame_count(), 3);
        assert_eq!(zipped.frame_duration(), Duration::from_millis(20));
    }

    #[test]
    fn test_duration_is_the_longer_one() {
        let long: SharedReader<RgbaImage> = Arc::new(buffer_reader(&[100, 100]));
        let short: SharedReader<RgbaImage> = Arc::new(buffer_reader(&[30, 30]));
        let zipped = ZippedReader::new(long, short);
        assert_eq!(zipped.duration(), Duration::from_millis(200));
    }

    #[test]
    fn test_shorter_controller_loops_to_cover_duration() {
        let long: SharedReader<RgbaImage> = Arc::new(buffer_reader(&[100, 100]));
        let short: SharedReader<RgbaImage> = Arc::new(buffer_reader(&[40, 40]));
        let zipped = ZippedReader::new(long, short);
        let frames = collect_frames(&zipped).unwrap();
        let timestamps: Vec<u128> = frames.iter().map(|f| f.timestamp().as_millis()).collect();
        assert_eq!(timestamps, vec![0, 40, 80, 120, 160]);
        let pairs: Vec<(u8, u8)> = frames.iter().map(values).collect();
        assert_eq!(pairs, vec![(0, 0), (0, 10), (0, 0), (10, 10), (10, 0)]);
    }

    #[test]
    fn test_read_frame_pairs_both_sources() {
        let animated: SharedReader<RgbaImage> = Arc::new(buffer_reader(&[50, 50]));
        let zipped = ZippedReader::new(still(200, 10), animated);
        let frame = zipped.read_frame(Duration::from_millis(60)).unwrap();
        assert_eq!(values(&frame), (200, 10));
        assert_eq!(frame.timestamp(), Duration::from_millis(50));
        assert_eq!(frame.duration(), Duration::from_millis(50));
    }

    #[test]
    fn test_reversed_zips_reversed_sources() {
        let first: SharedReader<RgbaImage> = Arc::new(buffer_reader(&[50, 50]));
        let second: SharedReader<RgbaImage> = Arc::new(buffer_reader(&[50, 50]));
        let reversed = Arc::new(ZippedReader::new(first, second)).reversed().unwrap();
        let frames = collect_frames(reversed.as_ref()).unwrap();
        assert_eq!(values(&frames[0]), (10, 10));
    }
}
