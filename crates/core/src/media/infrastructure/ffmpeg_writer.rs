use std::path::{Path, PathBuf};
use std::time::Duration;

use ffmpeg_next::format::{sample, Pixel, Sample};
use ffmpeg_next::software::{resampling, scaling};
use ffmpeg_next::{codec, encoder, format, frame, ChannelLayout, Dictionary, Packet, Rational};
use image::RgbaImage;

use crate::media::domain::audio_samples::{AudioFrame, AudioSamples};
use crate::media::domain::media_writer::{MediaWriter, WriterSettings};
use crate::shared::constants::{
    BITS_PER_PIXEL, DEFAULT_AUDIO_BITRATE, MAX_AUDIO_FRAME_RATE, MAX_VIDEO_DIMENSION,
    OPUS_SAMPLE_RATES,
};
use crate::shared::error::{CodecContext, MediaError, MediaResult};
use crate::shared::frame::ImageFrame;

/// Encoder time base: timestamps are whole milliseconds.
const TIME_BASE: Rational = Rational(1, 1000);

/// Audio frame size used when the encoder accepts any size.
const DEFAULT_AUDIO_FRAME_SIZE: usize = 1024;
/// Room for the samples a resampler still holds at end of stream.
const RESAMPLER_TAIL_CAPACITY: usize = 4096;

/// Codec family picked per container.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodecPair {
    /// H.264 (or MPEG-4 Part 2 when libx264 is missing) with AAC.
    H264Aac,
    /// VP9 with Opus.
    Vp9Opus,
}

impl CodecPair {
    pub fn for_format(format: &str) -> Self {
        match format {
            "webm" => Self::Vp9Opus,
            _ => Self::H264Aac,
        }
    }

    fn video_codec(self) -> Option<codec::Codec> {
        match self {
            Self::H264Aac => encoder::find_by_name("libx264")
                .or_else(|| encoder::find(codec::Id::H264))
                .or_else(|| {
                    log::warn!("No H.264 encoder available, falling back to MPEG-4");
                    encoder::find(codec::Id::MPEG4)
                }),
            Self::Vp9Opus => encoder::find_by_name("libvpx-vp9")
                .or_else(|| encoder::find(codec::Id::VP9))
                .or_else(|| encoder::find(codec::Id::VP8)),
        }
    }

    fn audio_codec(self) -> Option<codec::Codec> {
        match self {
            Self::H264Aac => encoder::find(codec::Id::AAC),
            Self::Vp9Opus => encoder::find_by_name("libopus").or_else(|| encoder::find(codec::Id::OPUS)),
        }
    }

    /// Sample rate the audio encoder runs at for a given source rate.
    pub fn encoder_sample_rate(self, source_rate: u32) -> u32 {
        match self {
            Self::H264Aac => source_rate,
            Self::Vp9Opus => snap_opus_rate(source_rate),
        }
    }
}

/// Opus only runs at a few rates: pick the smallest one that does not
/// lose bandwidth.
pub fn snap_opus_rate(rate: u32) -> u32 {
    OPUS_SAMPLE_RATES
        .iter()
        .copied()
        .find(|&supported| supported >= rate)
        .unwrap_or(48_000)
}

/// Scales `(width, height)` to fit within `max` on the longest edge and
/// rounds both down to even numbers, as YUV 4:2:0 requires.
pub fn bound_dimensions(width: u32, height: u32, max: u32) -> (u32, u32) {
    let longest = width.max(height).max(1);
    let scale = (max as f64 / longest as f64).min(1.0);
    let even = |v: u32| ((v as f64 * scale) as u32 / 2 * 2).max(2);
    (even(width), even(height))
}

/// Video and audio bitrates in bits per second.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BitratePlan {
    pub video: usize,
    pub audio: usize,
}

/// Derives bitrates from the picture size and frame rate, then scales both
/// down proportionally when the estimated file would exceed the budget.
pub fn plan_bitrates(
    width: u32,
    height: u32,
    fps: f64,
    audio_bitrate: Option<usize>,
    duration: Duration,
    max_file_size: u64,
) -> BitratePlan {
    let video = (width as f64 * height as f64 * fps * BITS_PER_PIXEL) as usize;
    let audio = audio_bitrate
        .map(|source| match source {
            0 => DEFAULT_AUDIO_BITRATE,
            source => source.min(DEFAULT_AUDIO_BITRATE),
        })
        .unwrap_or(0);
    let plan = BitratePlan { video, audio };

    let estimated = (video + audio) as f64 * duration.as_secs_f64() / 8.0;
    if max_file_size == 0 || estimated <= max_file_size as f64 {
        return plan;
    }
    let scale = max_file_size as f64 / estimated;
    log::debug!("Estimated {estimated:.0} bytes exceeds {max_file_size}, scaling bitrates by {scale:.3}");
    BitratePlan {
        video: ((video as f64 * scale) as usize).max(1),
        audio: if audio == 0 {
            0
        } else {
            ((audio as f64 * scale) as usize).max(1)
        },
    }
}

/// Muxes video (and optionally audio) into a container via ffmpeg-next.
///
/// Nothing is opened until the first image frame arrives: its size and
/// duration fix the encoder's dimensions and frame rate.
pub struct ContainerWriter {
    path: PathBuf,
    format: String,
    settings: WriterSettings,
    output: Option<EncodingOutput>,
    closed: bool,
}

// Safety: ContainerWriter is only used from a single thread at a time.
// The raw pointers inside ffmpeg types are not shared across threads.
unsafe impl Send for ContainerWriter {}

struct EncodingOutput {
    octx: format::context::Output,
    video: VideoTrack,
    audio: Option<AudioTrack>,
}

struct VideoTrack {
    encoder: encoder::video::Encoder,
    stream_index: usize,
    width: u32,
    height: u32,
    scaler: Option<(u32, u32, scaling::Context)>,
    last_pts: Option<i64>,
}

struct AudioTrack {
    encoder: encoder::audio::Encoder,
    stream_index: usize,
    sample_rate: u32,
    channels: usize,
    layout: ChannelLayout,
    frame_size: usize,
    /// Converts incoming packed `f32` to the encoder's rate and layout.
    resampler: Option<(u32, u16, resampling::Context)>,
    /// Interleaved samples at the encoder's rate, waiting for a full frame.
    pending: Vec<f32>,
    next_pts: i64,
}

impl ContainerWriter {
    pub fn new(path: impl AsRef<Path>, format: &str, settings: WriterSettings) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            format: format.to_ascii_lowercase(),
            settings,
            output: None,
            closed: false,
        }
    }

    fn target(&self) -> String {
        self.path.display().to_string()
    }

    fn open_output(&self, first: &ImageFrame) -> MediaResult<EncodingOutput> {
        let target = self.target();
        ffmpeg_next::init().codec("initialize ffmpeg", &target)?;

        let mut octx = format::output(&self.path)
            .map_err(|e| MediaError::UnsupportedFormat(format!("{}: {e}", self.format)))?;
        let global_header = octx
            .format()
            .flags()
            .contains(format::Flags::GLOBAL_HEADER);

        let pair = CodecPair::for_format(&self.format);
        let (width, height) = bound_dimensions(first.width(), first.height(), MAX_VIDEO_DIMENSION);
        let frame_seconds = first.duration().as_secs_f64();
        let fps = if frame_seconds > 0.0 { 1.0 / frame_seconds } else { 30.0 };
        let plan = plan_bitrates(
            width,
            height,
            fps,
            self.settings.audio.map(|a| a.bitrate),
            self.settings.duration,
            self.settings.max_file_size,
        );
        log::debug!(
            "Opening {target}: {pair:?}, {width}x{height} @ {fps:.2} fps, bitrates {plan:?}"
        );

        let video_codec = pair
            .video_codec()
            .ok_or_else(|| MediaError::UnsupportedFormat(format!("no video encoder for {}", self.format)))?;
        let mut video_ctx = codec::context::Context::new_with_codec(video_codec)
            .encoder()
            .video()
            .codec("create video encoder", &target)?;
        video_ctx.set_width(width);
        video_ctx.set_height(height);
        video_ctx.set_format(Pixel::YUV420P);
        video_ctx.set_time_base(TIME_BASE);
        video_ctx.set_frame_rate(Some(Rational((fps * 1000.0).round() as i32, 1000)));
        video_ctx.set_bit_rate(plan.video);
        if global_header {
            video_ctx.set_flags(codec::Flags::GLOBAL_HEADER);
        }
        let mut options = Dictionary::new();
        if video_codec.name() == "libx264" {
            options.set("preset", "veryfast");
        }
        let video_encoder = video_ctx
            .open_with(options)
            .codec("open video encoder", &target)?;
        let video_index = {
            let mut stream = octx
                .add_stream(Some(video_codec))
                .codec("add video stream", &target)?;
            stream.set_parameters(&video_encoder);
            stream.index()
        };

        let audio = match self.settings.audio {
            Some(format) if format.channels > 0 && format.sample_rate > 0 => Some(open_audio_track(
                &mut octx,
                pair,
                format.sample_rate,
                format.channels,
                plan.audio,
                global_header,
                &target,
            )?),
            _ => None,
        };

        octx.write_header().codec("write header", &target)?;

        Ok(EncodingOutput {
            octx,
            video: VideoTrack {
                encoder: video_encoder,
                stream_index: video_index,
                width,
                height,
                scaler: None,
                last_pts: None,
            },
            audio,
        })
    }
}

fn open_audio_track(
    octx: &mut format::context::Output,
    pair: CodecPair,
    source_rate: u32,
    channels: u16,
    bitrate: usize,
    global_header: bool,
    target: &str,
) -> MediaResult<AudioTrack> {
    let codec = pair
        .audio_codec()
        .ok_or_else(|| MediaError::UnsupportedFormat(format!("no audio encoder for {pair:?}")))?;
    let sample_format = codec
        .audio()
        .ok()
        .and_then(|audio| audio.formats())
        .and_then(|mut formats| formats.find(|f| is_fillable(*f)))
        .unwrap_or(Sample::F32(sample::Type::Planar));
    let sample_rate = pair.encoder_sample_rate(source_rate);
    let layout = ChannelLayout::default(channels.min(2) as i32);

    let mut audio_ctx = codec::context::Context::new_with_codec(codec)
        .encoder()
        .audio()
        .codec("create audio encoder", target)?;
    audio_ctx.set_rate(sample_rate as i32);
    audio_ctx.set_channel_layout(layout);
    audio_ctx.set_format(sample_format);
    audio_ctx.set_bit_rate(bitrate.max(1));
    audio_ctx.set_time_base(Rational(1, sample_rate as i32));
    if global_header {
        audio_ctx.set_flags(codec::Flags::GLOBAL_HEADER);
    }
    let encoder = audio_ctx
        .open_with(Dictionary::new())
        .codec("open audio encoder", target)?;
    let stream_index = {
        let mut stream = octx
            .add_stream(Some(codec))
            .codec("add audio stream", target)?;
        stream.set_parameters(&encoder);
        stream.index()
    };
    let frame_size = match encoder.frame_size() {
        0 => DEFAULT_AUDIO_FRAME_SIZE,
        size => size as usize,
    };

    Ok(AudioTrack {
        encoder,
        stream_index,
        sample_rate,
        channels: channels.min(2) as usize,
        layout,
        frame_size,
        resampler: None,
        pending: Vec::new(),
        next_pts: 0,
    })
}

fn is_fillable(format: Sample) -> bool {
    matches!(format, Sample::F32(_) | Sample::I16(_))
}

impl EncodingOutput {
    fn write_video(&mut self, image: &RgbaImage, timestamp: Duration, target: &str) -> MediaResult<()> {
        let track = &mut self.video;
        let (src_w, src_h) = image.dimensions();
        if !matches!(&track.scaler, Some((w, h, _)) if *w == src_w && *h == src_h) {
            let scaler = scaling::Context::get(
                Pixel::RGBA,
                src_w,
                src_h,
                Pixel::YUV420P,
                track.width,
                track.height,
                scaling::Flags::BILINEAR,
            )
            .codec("create pixel converter", target)?;
            track.scaler = Some((src_w, src_h, scaler));
        }
        let Some((_, _, scaler)) = track.scaler.as_mut() else {
            return Ok(());
        };

        let mut rgba = frame::Video::new(Pixel::RGBA, src_w, src_h);
        let stride = rgba.stride(0);
        let row = src_w as usize * 4;
        let data = rgba.data_mut(0);
        for (y, src) in image.as_raw().chunks_exact(row).enumerate() {
            data[y * stride..y * stride + row].copy_from_slice(src);
        }

        let mut yuv = frame::Video::empty();
        scaler.run(&rgba, &mut yuv).codec("convert pixels", target)?;

        // Muxers need strictly increasing timestamps.
        let mut pts = timestamp.as_millis() as i64;
        if let Some(last) = track.last_pts {
            pts = pts.max(last + 1);
        }
        track.last_pts = Some(pts);
        yuv.set_pts(Some(pts));

        track
            .encoder
            .send_frame(&yuv)
            .codec("encode video frame", target)?;
        self.drain_video(target)
    }

    fn drain_video(&mut self, target: &str) -> MediaResult<()> {
        let index = self.video.stream_index;
        let stream_time_base = self.stream_time_base(index, target)?;
        let mut packet = Packet::empty();
        while self.video.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(index);
            packet.rescale_ts(TIME_BASE, stream_time_base);
            packet
                .write_interleaved(&mut self.octx)
                .codec("write video packet", target)?;
        }
        Ok(())
    }

    fn write_audio(&mut self, samples: &AudioSamples, target: &str) -> MediaResult<()> {
        let Some(track) = self.audio.as_mut() else {
            return Ok(());
        };
        track.push(samples, target)?;
        self.encode_pending(false, target)
    }

    /// Encodes queued samples in encoder-sized chunks. With `last`, a
    /// trailing partial chunk is encoded too.
    fn encode_pending(&mut self, last: bool, target: &str) -> MediaResult<()> {
        loop {
            let Some(track) = self.audio.as_mut() else {
                return Ok(());
            };
            let chunk_len = track.frame_size * track.channels;
            let take = if track.pending.len() >= chunk_len {
                chunk_len
            } else if last && !track.pending.is_empty() {
                track.pending.len()
            } else {
                return Ok(());
            };
            let chunk: Vec<f32> = track.pending.drain(..take).collect();
            self.encode_audio_chunk(&chunk, target)?;
        }
    }

    fn encode_audio_chunk(&mut self, interleaved: &[f32], target: &str) -> MediaResult<()> {
        let Some(track) = self.audio.as_mut() else {
            return Ok(());
        };
        let count = interleaved.len() / track.channels;
        let mut audio_frame = frame::Audio::new(track.encoder.format(), count, track.layout);
        audio_frame.set_rate(track.sample_rate);
        fill_audio_frame(&mut audio_frame, interleaved, track.channels);
        audio_frame.set_pts(Some(track.next_pts));
        track.next_pts += count as i64;
        track
            .encoder
            .send_frame(&audio_frame)
            .codec("encode audio frame", target)?;
        self.drain_audio(target)
    }

    fn drain_audio(&mut self, target: &str) -> MediaResult<()> {
        let Some(index) = self.audio.as_ref().map(|t| t.stream_index) else {
            return Ok(());
        };
        let stream_time_base = self.stream_time_base(index, target)?;
        let Some(track) = self.audio.as_mut() else {
            return Ok(());
        };
        let encoder_time_base = Rational(1, track.sample_rate as i32);
        let mut packet = Packet::empty();
        while track.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(index);
            packet.rescale_ts(encoder_time_base, stream_time_base);
            packet
                .write_interleaved(&mut self.octx)
                .codec("write audio packet", target)?;
        }
        Ok(())
    }

    fn stream_time_base(&self, index: usize, target: &str) -> MediaResult<Rational> {
        self.octx
            .stream(index)
            .map(|s| s.time_base())
            .ok_or_else(|| MediaError::unreadable(target, format!("output stream {index} vanished")))
    }

    fn finish(&mut self, target: &str) -> MediaResult<()> {
        self.video
            .encoder
            .send_eof()
            .codec("flush video encoder", target)?;
        self.drain_video(target)?;

        if let Some(track) = self.audio.as_mut() {
            track.flush_resampler(target)?;
        }
        self.encode_pending(true, target)?;
        if let Some(track) = self.audio.as_mut() {
            track
                .encoder
                .send_eof()
                .codec("flush audio encoder", target)?;
        }
        self.drain_audio(target)?;

        self.octx.write_trailer().codec("write trailer", target)
    }
}

impl AudioTrack {
    /// Resamples `samples` to the encoder's rate and layout and queues them.
    fn push(&mut self, samples: &AudioSamples, target: &str) -> MediaResult<()> {
        let (rate, channels) = (samples.sample_rate(), samples.channels());
        if samples.sample_frames() == 0 || rate == 0 {
            return Ok(());
        }
        let input_layout = ChannelLayout::default(channels as i32);
        if !matches!(&self.resampler, Some((r, c, _)) if *r == rate && *c == channels) {
            self.flush_resampler(target)?;
            let resampler = resampling::Context::get(
                Sample::F32(sample::Type::Packed),
                input_layout,
                rate,
                Sample::F32(sample::Type::Packed),
                self.layout,
                self.sample_rate,
            )
            .codec("create resampler", target)?;
            self.resampler = Some((rate, channels, resampler));
        }
        let Some((_, _, resampler)) = self.resampler.as_mut() else {
            return Ok(());
        };

        let frames = samples.sample_frames();
        let mut input = frame::Audio::new(Sample::F32(sample::Type::Packed), frames, input_layout);
        input.set_rate(rate);
        fill_audio_frame(&mut input, samples.samples(), channels as usize);

        let capacity = frames * self.sample_rate as usize / rate as usize + 256;
        let mut output = frame::Audio::new(Sample::F32(sample::Type::Packed), capacity, self.layout);
        output.set_rate(self.sample_rate);
        resampler
            .run(&input, &mut output)
            .codec("resample audio", target)?;
        self.queue(&output);
        Ok(())
    }

    /// Drains the samples the current resampler still buffers into the
    /// queue.
    fn flush_resampler(&mut self, target: &str) -> MediaResult<()> {
        let Some((_, _, resampler)) = self.resampler.as_mut() else {
            return Ok(());
        };
        let mut output = frame::Audio::new(
            Sample::F32(sample::Type::Packed),
            RESAMPLER_TAIL_CAPACITY,
            self.layout,
        );
        output.set_rate(self.sample_rate);
        resampler
            .flush(&mut output)
            .codec("flush resampler", target)?;
        self.queue(&output);
        Ok(())
    }

    fn queue(&mut self, resampled: &frame::Audio) {
        let produced = resampled.samples() * self.channels;
        let bytes = &resampled.data(0)[..produced * std::mem::size_of::<f32>()];
        match bytemuck::try_cast_slice::<u8, f32>(bytes) {
            Ok(floats) => self.pending.extend_from_slice(floats),
            Err(_) => self.pending.extend(
                bytes
                    .chunks_exact(4)
                    .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]])),
            ),
        }
    }
}

/// Writes interleaved `f32` samples into `frame` in whatever sample layout
/// the frame was allocated with.
fn fill_audio_frame(frame: &mut frame::Audio, interleaved: &[f32], channels: usize) {
    let count = interleaved.len() / channels.max(1);
    match frame.format() {
        Sample::F32(sample::Type::Packed) => {
            let plane = frame.data_mut(0);
            for (dst, value) in plane.chunks_exact_mut(4).zip(interleaved) {
                dst.copy_from_slice(&value.to_ne_bytes());
            }
        }
        Sample::F32(sample::Type::Planar) => {
            for channel in 0..channels {
                let plane = frame.data_mut(channel);
                for (i, dst) in plane.chunks_exact_mut(4).take(count).enumerate() {
                    dst.copy_from_slice(&interleaved[i * channels + channel].to_ne_bytes());
                }
            }
        }
        Sample::I16(sample::Type::Packed) => {
            let plane = frame.data_mut(0);
            for (dst, value) in plane.chunks_exact_mut(2).zip(interleaved) {
                dst.copy_from_slice(&to_i16(*value).to_ne_bytes());
            }
        }
        Sample::I16(sample::Type::Planar) => {
            for channel in 0..channels {
                let plane = frame.data_mut(channel);
                for (i, dst) in plane.chunks_exact_mut(2).take(count).enumerate() {
                    dst.copy_from_slice(&to_i16(interleaved[i * channels + channel]).to_ne_bytes());
                }
            }
        }
        other => log::warn!("Unsupported encoder sample format {other:?}, writing silence"),
    }
}

fn to_i16(value: f32) -> i16 {
    (value.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

impl MediaWriter for ContainerWriter {
    fn write_image_frame(&mut self, frame: ImageFrame) -> MediaResult<()> {
        if self.closed {
            return Err(MediaError::InvalidArgument("writer is closed".into()));
        }
        if self.output.is_none() {
            self.output = Some(self.open_output(&frame)?);
        }
        let target = self.target();
        match self.output.as_mut() {
            Some(output) => output.write_video(frame.content(), frame.timestamp(), &target),
            None => Ok(()),
        }
    }

    fn write_audio_frame(&mut self, frame: AudioFrame) -> MediaResult<()> {
        if self.closed {
            return Err(MediaError::InvalidArgument("writer is closed".into()));
        }
        let seconds = frame.duration().as_secs_f64();
        if seconds <= 0.0 || 1.0 / seconds > MAX_AUDIO_FRAME_RATE {
            log::debug!("Dropping audio frame of {:?} at {:?}", frame.duration(), frame.timestamp());
            return Ok(());
        }
        let target = self.target();
        match self.output.as_mut() {
            Some(output) => output.write_audio(frame.content(), &target),
            None => {
                log::debug!("Dropping audio frame written before any image frame");
                Ok(())
            }
        }
    }

    fn supports_audio(&self) -> bool {
        true
    }

    fn close(&mut self) -> MediaResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let target = self.target();
        match self.output.take() {
            Some(mut output) => output.finish(&target),
            None => Err(MediaError::InvalidArgument(format!(
                "no image frames were written to {target}"
            ))),
        }
    }
}
