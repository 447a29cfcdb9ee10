use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crossbeam_channel::Receiver;
use image::RgbaImage;

use crate::media::domain::media_reader::{FrameIter, ImageReader, MediaReader, SharedReader};
use crate::pipeline::infrastructure::async_executor::{default_parallelism, AsyncExecutor};
use crate::processing::domain::image_processor::{ImageProcessor, ProcessorData};
use crate::shared::error::{MediaError, MediaResult};
use crate::shared::frame::ImageFrame;
use crate::shared::media_info::MediaInfo;

/// An image reader whose frames pass through an [`ImageProcessor`].
///
/// Constant data is computed once, from the first frame, and shared by
/// every transform. [`frames`](MediaReader::frames) fans the transforms out
/// over an [`AsyncExecutor`] and yields them in source order.
pub struct TransformedImageReader {
    source: ImageReader,
    processor: ImageProcessor,
    parallelism: usize,
    data: OnceLock<Arc<ProcessorData>>,
    info: OnceLock<MediaInfo>,
}

impl TransformedImageReader {
    pub fn new(source: ImageReader, processor: ImageProcessor) -> Self {
        Self {
            source,
            processor,
            parallelism: default_parallelism(),
            data: OnceLock::new(),
            info: OnceLock::new(),
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn processor(&self) -> &ImageProcessor {
        &self.processor
    }

    /// Appends `next` to the processor chain, reading from the same source.
    pub fn then(&self, next: ImageProcessor) -> Self {
        Self::new(self.source.clone(), self.processor.clone().then(next))
            .with_parallelism(self.parallelism)
    }

    fn constant_data_from(&self, first: &RgbaImage) -> MediaResult<Arc<ProcessorData>> {
        if let Some(data) = self.data.get() {
            return Ok(data.clone());
        }
        let data = Arc::new(self.processor.constant_data(first, Some(self.source.as_ref()))?);
        Ok(self.data.get_or_init(|| data).clone())
    }

    fn constant_data(&self) -> MediaResult<Arc<ProcessorData>> {
        if let Some(data) = self.data.get() {
            return Ok(data.clone());
        }
        let first = self.source.read_frame(Duration::ZERO)?;
        self.constant_data_from(first.content())
    }

    fn compute_info(&self) -> MediaInfo {
        let source = self.source.info().clone();
        let transformed = self
            .constant_data()
            .and_then(|data| {
                let first = self.source.read_frame(Duration::ZERO)?;
                self.processor.transform(first.into_content(), &data)
            });
        match transformed {
            Ok(image) => MediaInfo {
                width: image.width(),
                height: image.height(),
                ..source
            },
            Err(e) => {
                log::warn!("Could not transform first frame for metadata: {e}");
                source
            }
        }
    }
}

impl MediaReader<RgbaImage> for TransformedImageReader {
    /// Timing follows the source; dimensions are those of the transformed
    /// first frame.
    fn info(&self) -> &MediaInfo {
        self.info.get_or_init(|| self.compute_info())
    }

    fn read_frame(&self, timestamp: Duration) -> MediaResult<ImageFrame> {
        let data = self.constant_data()?;
        let frame = self.source.read_frame(timestamp)?;
        frame.try_map(|image| self.processor.transform(image, &data))
    }

    fn frames(&self) -> FrameIter<'_, RgbaImage> {
        Box::new(TransformedFrames {
            reader: self,
            source: self.source.frames(),
            pool: None,
            in_flight: 0,
            window: self.parallelism * 2,
            source_done: false,
            pending_error: None,
            done: false,
        })
    }

    fn reversed(self: Arc<Self>) -> MediaResult<SharedReader<RgbaImage>> {
        let source = self.source.clone().reversed()?;
        Ok(Arc::new(
            Self::new(source, self.processor.clone()).with_parallelism(self.parallelism),
        ))
    }

    fn change_speed(self: Arc<Self>, multiplier: f64) -> MediaResult<SharedReader<RgbaImage>> {
        let source = self.source.clone().change_speed(multiplier)?;
        Ok(Arc::new(
            Self::new(source, self.processor.clone()).with_parallelism(self.parallelism),
        ))
    }

    fn close(&self) {
        self.source.close();
    }
}

struct Pool {
    executor: AsyncExecutor<ImageFrame>,
    results: Receiver<MediaResult<ImageFrame>>,
}

struct TransformedFrames<'a> {
    reader: &'a TransformedImageReader,
    source: FrameIter<'a, RgbaImage>,
    pool: Option<Pool>,
    in_flight: usize,
    window: usize,
    source_done: bool,
    pending_error: Option<MediaError>,
    done: bool,
}

impl TransformedFrames<'_> {
    /// Starts the workers once constant data exists.
    fn pool_for(&mut self, first: &ImageFrame) -> MediaResult<&mut Pool> {
        if self.pool.is_none() {
            let data = self.reader.constant_data_from(first.content())?;
            let processor = self.reader.processor.clone();
            let (tx, results) = crossbeam_channel::unbounded();
            let executor = AsyncExecutor::new(
                self.reader.parallelism,
                move |frame: ImageFrame| frame.try_map(|image| processor.transform(image, &data)),
                move |result| {
                    let _ = tx.send(result);
                },
            );
            self.pool = Some(Pool { executor, results });
        }
        self.pool
            .as_mut()
            .ok_or_else(|| MediaError::FrameProcessing("worker pool unavailable".into()))
    }

    fn fill(&mut self) {
        while !self.source_done && self.in_flight < self.window {
            match self.source.next() {
                None => self.source_done = true,
                Some(Err(e)) => {
                    self.pending_error = Some(e);
                    self.source_done = true;
                }
                Some(Ok(frame)) => {
                    let submitted = self
                        .pool_for(&frame)
                        .and_then(|pool| pool.executor.submit(frame));
                    match submitted {
                        Ok(()) => self.in_flight += 1,
                        Err(e) => {
                            self.pending_error = Some(e);
                            self.source_done = true;
                        }
                    }
                }
            }
        }
    }

    fn stop(&mut self) {
        self.done = true;
        if let Some(mut pool) = self.pool.take() {
            pool.executor.close();
        }
    }
}

impl Iterator for TransformedFrames<'_> {
    type Item = MediaResult<ImageFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        self.fill();

        if self.in_flight == 0 {
            let error = self.pending_error.take();
            self.stop();
            return error.map(Err);
        }

        let received = match self.pool.as_ref() {
            Some(pool) => pool.results.recv().ok(),
            None => None,
        };
        let result = received
            .unwrap_or_else(|| Err(MediaError::FrameProcessing("worker pool stopped".into())));
        self.in_flight -= 1;
        if result.is_err() {
            self.stop();
        }
        Some(result)
    }
}
