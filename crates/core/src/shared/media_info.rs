use std::time::Duration;

use crate::shared::loop_count::LoopCount;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    /// Bits per second, 0 when unknown.
    pub bitrate: usize,
}

/// Stream-level description shared by every reader.
#[derive(Clone, Debug, PartialEq)]
pub struct MediaInfo {
    pub frame_count: usize,
    pub duration: Duration,
    pub frame_duration: Duration,
    pub width: u32,
    pub height: u32,
    pub audio: Option<AudioFormat>,
    pub loop_count: LoopCount,
}

impl MediaInfo {
    /// Frames per second derived from the frame duration.
    pub fn frame_rate(&self) -> f64 {
        let secs = self.frame_duration.as_secs_f64();
        if secs > 0.0 {
            1.0 / secs
        } else {
            0.0
        }
    }

    pub fn is_animated(&self) -> bool {
        self.frame_count > 1
    }

    pub fn with_speed(&self, speed: f64) -> Self {
        Self {
            duration: self.duration.div_f64(speed),
            frame_duration: self.frame_duration.div_f64(speed),
            ..self.clone()
        }
    }

    pub fn empty() -> Self {
        Self {
            frame_count: 0,
            duration: Duration::ZERO,
            frame_duration: Duration::ZERO,
            width: 0,
            height: 0,
            audio: None,
            loop_count: LoopCount::Forever,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn video_info() -> MediaInfo {
        MediaInfo {
            frame_count: 90,
            duration: Duration::from_secs(3),
            frame_duration: Duration::from_nanos(33_333_333),
            width: 1920,
            height: 1080,
            audio: None,
            loop_count: LoopCount::Forever,
        }
    }

    #[test]
    fn test_frame_rate() {
        assert_relative_eq!(video_info().frame_rate(), 30.0, epsilon = 1e-3);
    }

    #[test]
    fn test_frame_rate_of_empty_stream_is_zero() {
        assert_eq!(MediaInfo::empty().frame_rate(), 0.0);
    }

    #[test]
    fn test_with_speed_scales_durations_only() {
        let info = video_info().with_speed(2.0);
        assert_eq!(info.duration, Duration::from_millis(1500));
        assert_eq!(info.frame_count, 90);
        assert_relative_eq!(info.frame_rate(), 60.0, epsilon = 1e-2);
    }

    #[test]
    fn test_single_frame_is_not_animated() {
        let info = MediaInfo {
            frame_count: 1,
            ..video_info()
        };
        assert!(!info.is_animated());
        assert!(video_info().is_animated());
    }
}
