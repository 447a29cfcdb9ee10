use std::sync::Arc;

use crate::media::domain::media_reader::MediaReader;
use crate::media::infrastructure::reader_factory::open_readers;
use crate::pipeline::process_media::{process_media, EncodeOptions};
use crate::processing::domain::image_processor::ImageProcessor;
use crate::shared::data_source::DataSource;
use crate::shared::error::MediaResult;
use crate::shared::loop_count::LoopCount;

/// What a caller wants transcoded.
#[derive(Clone, Debug)]
pub struct TranscodeRequest {
    pub input: DataSource,
    pub input_format: String,
    pub output_format: String,
    /// Byte budget; zero or negative means unbounded.
    pub max_file_size: i64,
    pub processor: ImageProcessor,
    pub loop_count: Option<LoopCount>,
}

impl TranscodeRequest {
    pub fn new(input: DataSource, input_format: &str, output_format: &str) -> Self {
        Self {
            input,
            input_format: input_format.to_string(),
            output_format: output_format.to_string(),
            max_file_size: 0,
            processor: ImageProcessor::Identity,
            loop_count: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TranscodeResult {
    /// Temporary output, deleted once the last handle is dropped.
    pub output: DataSource,
    pub format: String,
    pub size: u64,
    pub attempts: usize,
}

/// Input resolution → [`process_media`] → temporary output.
pub struct TranscodeUseCase {
    parallelism: usize,
}

impl TranscodeUseCase {
    pub fn new(parallelism: usize) -> Self {
        Self {
            parallelism: parallelism.max(1),
        }
    }

    pub fn execute(&self, request: TranscodeRequest) -> MediaResult<TranscodeResult> {
        log::info!(
            "Transcoding {} ({} -> {})",
            request.input.name(),
            request.input_format,
            request.output_format
        );
        let readers = open_readers(&request.input, &request.input_format)?;
        let options = EncodeOptions {
            max_file_size: request.max_file_size.max(0) as u64,
            parallelism: self.parallelism,
            loop_count: request.loop_count,
        };
        let encoded = process_media(
            readers.image.clone(),
            readers.audio.clone(),
            &request.processor,
            &request.output_format,
            &options,
        );
        readers.image.close();
        readers.audio.close();
        let encoded = encoded?;

        Ok(TranscodeResult {
            output: DataSource::Temp(Arc::new(encoded.file)),
            format: encoded.format,
            size: encoded.size,
            attempts: encoded.attempts,
        })
    }
}

impl Default for TranscodeUseCase {
    fn default() -> Self {
        Self::new(crate::pipeline::infrastructure::async_executor::default_parallelism())
    }
}
