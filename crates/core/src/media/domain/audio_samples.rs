use crate::shared::frame::{Frame, FrameContent};

/// Interleaved PCM samples normalized to [-1.0, 1.0].
#[derive(Clone, Debug, PartialEq)]
pub struct AudioSamples {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

pub type AudioFrame = Frame<AudioSamples>;

impl AudioSamples {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        debug_assert!(channels > 0, "audio must have at least one channel");
        debug_assert_eq!(
            samples.len() % channels as usize,
            0,
            "sample count must be a multiple of the channel count"
        );
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of samples per channel.
    pub fn sample_frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.sample_frames() as f64 / self.sample_rate as f64
    }
}

impl FrameContent for AudioSamples {
    /// Faster playback of the same samples means a higher nominal rate;
    /// the encoder resamples back to its own rate.
    fn retimed(self, speed: f64) -> Self {
        let sample_rate = (self.sample_rate as f64 * speed).round().max(1.0) as u32;
        Self {
            sample_rate,
            ..self
        }
    }

    fn reversed(self) -> Self {
        let channels = self.channels.max(1) as usize;
        let samples = self
            .samples
            .chunks_exact(channels)
            .rev()
            .flatten()
            .copied()
            .collect();
        Self { samples, ..self }
    }
}
