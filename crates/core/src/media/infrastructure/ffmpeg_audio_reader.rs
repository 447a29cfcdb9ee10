use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use ffmpeg_next::format::{sample, Sample};
use ffmpeg_next::software::resampling;
use ffmpeg_next::{codec, decoder, frame, media, ChannelLayout};

use crate::media::domain::audio_samples::{AudioFrame, AudioSamples};
use crate::media::domain::frame_buffer_reader::FrameBufferReader;
use crate::media::domain::media_reader::{collect_frames, FrameIter, MediaReader, SharedReader};
use crate::media::domain::speed_reader::SpeedReader;
use crate::media::infrastructure::ffmpeg_session::{DecodeSession, Timeline};
use crate::shared::data_source::MaterializedFile;
use crate::shared::error::{CodecContext, MediaError, MediaResult};
use crate::shared::frame::{wrap_timestamp, Frame};
use crate::shared::loop_count::LoopCount;
use crate::shared::media_info::{AudioFormat, MediaInfo};

/// Decodes the audio stream of a container to interleaved `f32` samples.
///
/// Frame timing comes from sample counts rather than packet timestamps,
/// which are unreliable for many audio codecs.
pub struct ContainerAudioReader {
    file: MaterializedFile,
    timeline: Timeline,
    info: MediaInfo,
    cursor: Mutex<Option<AudioCursor>>,
}

/// A decode session that remembers how many frames it has produced.
struct AudioSession {
    session: DecodeSession,
    decoder: decoder::Audio,
    resampler: resampling::Context,
    channels: u16,
}

// Safety: see DecodeSession.
unsafe impl Send for AudioSession {}

struct AudioCursor {
    state: AudioSession,
    next_index: usize,
}

impl AudioSession {
    fn open(file: &MaterializedFile) -> MediaResult<Self> {
        let (session, context) = DecodeSession::open(file.path(), media::Type::Audio)?;
        Self::with_session(session, context)
    }

    fn with_session(session: DecodeSession, context: codec::context::Context) -> MediaResult<Self> {
        let decoder = context
            .decoder()
            .audio()
            .codec("open audio decoder", session.target())?;
        let channels = decoder.channels() as u16;
        let layout = if decoder.channel_layout().is_empty() {
            ChannelLayout::default(channels as i32)
        } else {
            decoder.channel_layout()
        };
        let resampler = resampling::Context::get(
            decoder.format(),
            layout,
            decoder.rate(),
            Sample::F32(sample::Type::Packed),
            layout,
            decoder.rate(),
        )
        .codec("create resampler", session.target())?;
        Ok(Self {
            session,
            decoder,
            resampler,
            channels,
        })
    }

    fn next_decoded(&mut self, decoded: &mut frame::Audio) -> MediaResult<bool> {
        self.session.receive_next(&mut self.decoder, decoded)
    }

    fn to_samples(&mut self, decoded: &frame::Audio) -> MediaResult<AudioSamples> {
        let mut packed = frame::Audio::empty();
        self.resampler
            .run(decoded, &mut packed)
            .codec("resample audio", self.session.target())?;
        let count = packed.samples() * self.channels as usize;
        let bytes = &packed.data(0)[..count * std::mem::size_of::<f32>()];
        let samples: Vec<f32> = match bytemuck::try_cast_slice::<u8, f32>(bytes) {
            Ok(floats) => floats.to_vec(),
            Err(_) => bytes
                .chunks_exact(4)
                .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        };
        Ok(AudioSamples::new(samples, self.decoder.rate(), self.channels))
    }

    fn rewind(&mut self) -> MediaResult<()> {
        self.session.seek(&mut self.decoder, Duration::ZERO)
    }
}

impl ContainerAudioReader {
    /// Opens the audio stream of `file`. Returns `None` when the container
    /// has no audio.
    pub fn open(file: MaterializedFile) -> MediaResult<Option<Self>> {
        let Some((session, context)) = DecodeSession::open_optional(file.path(), media::Type::Audio)?
        else {
            log::debug!("{} has no audio stream", file.path().display());
            return Ok(None);
        };
        let mut scan = AudioSession::with_session(session, context)?;

        let rate = scan.decoder.rate();
        let mut durations = Vec::new();
        let mut decoded = frame::Audio::empty();
        while scan.next_decoded(&mut decoded)? {
            if rate > 0 {
                durations.push(Duration::from_secs_f64(
                    decoded.samples() as f64 / rate as f64,
                ));
            }
        }
        if durations.is_empty() {
            return Ok(None);
        }

        let timeline = Timeline::contiguous(durations);
        let info = MediaInfo {
            frame_count: timeline.len(),
            duration: timeline.total(),
            frame_duration: timeline.min_duration(),
            width: 0,
            height: 0,
            audio: Some(AudioFormat {
                sample_rate: rate,
                channels: scan.channels,
                bitrate: scan.decoder.bit_rate(),
            }),
            loop_count: LoopCount::Forever,
        };
        Ok(Some(Self {
            file,
            timeline,
            info,
            cursor: Mutex::new(None),
        }))
    }

    fn frame_at(&self, index: usize, content: AudioSamples) -> AudioFrame {
        Frame::new(
            content,
            self.timeline.duration(index),
            self.timeline.start(index),
        )
    }
}

impl MediaReader<AudioSamples> for ContainerAudioReader {
    fn info(&self) -> &MediaInfo {
        &self.info
    }

    /// Sequential reads continue from the cursor; reading backwards
    /// rewinds to the stream start.
    fn read_frame(&self, timestamp: Duration) -> MediaResult<AudioFrame> {
        let local = wrap_timestamp(timestamp, self.info.duration);
        let index = self
            .timeline
            .index_at(local)
            .ok_or(MediaError::NoSuchFrame(timestamp))?;

        let mut guard = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            *guard = Some(AudioCursor {
                state: AudioSession::open(&self.file)?,
                next_index: 0,
            });
        }
        let Some(cursor) = guard.as_mut() else {
            return Err(MediaError::NoSuchFrame(timestamp));
        };
        if cursor.next_index > index {
            cursor.state.rewind()?;
            cursor.next_index = 0;
        }

        let mut decoded = frame::Audio::empty();
        while cursor.next_index <= index {
            if !cursor.state.next_decoded(&mut decoded)? {
                return Err(MediaError::NoSuchFrame(timestamp));
            }
            cursor.next_index += 1;
        }
        let content = cursor.state.to_samples(&decoded)?;
        Ok(self.frame_at(index, content))
    }

    fn frames(&self) -> FrameIter<'_, AudioSamples> {
        let mut state = match AudioSession::open(&self.file) {
            Ok(state) => state,
            Err(e) => return Box::new(std::iter::once(Err(e))),
        };
        let mut index = 0;
        Box::new(std::iter::from_fn(move || {
            if index >= self.timeline.len() {
                return None;
            }
            let mut decoded = frame::Audio::empty();
            let frame = match state.next_decoded(&mut decoded) {
                Ok(true) => state
                    .to_samples(&decoded)
                    .map(|content| self.frame_at(index, content)),
                Ok(false) => return None,
                Err(e) => Err(e),
            };
            index += 1;
            Some(frame)
        }))
    }

    fn reversed(self: Arc<Self>) -> MediaResult<SharedReader<AudioSamples>> {
        let frames = collect_frames(self.as_ref())?;
        let buffered: SharedReader<AudioSamples> =
            Arc::new(FrameBufferReader::new(frames, self.info.clone()));
        buffered.reversed()
    }

    fn change_speed(self: Arc<Self>, multiplier: f64) -> MediaResult<SharedReader<AudioSamples>> {
        Ok(Arc::new(SpeedReader::<AudioSamples>::new(self, multiplier)?))
    }

    fn close(&self) {
        let mut guard = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::infrastructure::ffmpeg_reader::tests::create_test_video;
    use crate::shared::data_source::DataSource;

    #[test]
    fn test_video_without_audio_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("silent.mp4");
        create_test_video(&path, 2, 64, 48, 25);
        let file = DataSource::Path(path).materialize("mp4").unwrap();
        assert!(ContainerAudioReader::open(file).unwrap().is_none());
    }

    #[test]
    fn test_open_nonexistent_file_fails() {
        let file = DataSource::Path("/nonexistent/file.mp4".into())
            .materialize("mp4")
            .unwrap();
        assert!(ContainerAudioReader::open(file).is_err());
    }
}
