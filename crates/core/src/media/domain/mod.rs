pub mod audio_samples;
pub mod constant_rate_reader;
pub mod empty_reader;
pub mod frame_buffer_reader;
pub mod media_reader;
pub mod media_writer;
pub mod speed_reader;
pub mod zipped_reader;
