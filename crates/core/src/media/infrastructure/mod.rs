pub mod ffmpeg_audio_reader;
mod ffmpeg_session;
pub mod ffmpeg_reader;
pub mod ffmpeg_writer;
pub mod gif_reader;
pub mod gif_writer;
pub mod image_file_reader;
pub mod image_file_writer;
pub mod reader_factory;
pub mod webp_reader;
pub mod writer_factory;
