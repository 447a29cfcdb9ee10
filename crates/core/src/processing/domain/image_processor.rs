use std::any::Any;
use std::fmt;
use std::sync::Arc;

use image::RgbaImage;

use crate::media::domain::media_reader::MediaReader;
use crate::shared::error::{MediaError, MediaResult};

/// A per-frame image transform with data computed once per run.
///
/// `constant_data` sees the first frame (and the source reader, when there
/// is one) before any frame is transformed; `transform` then receives that
/// data for every frame, possibly from several threads at once.
pub trait FrameProcessor: Send + Sync + 'static {
    type Data: Send + Sync + 'static;

    fn constant_data(
        &self,
        first: &RgbaImage,
        source: Option<&dyn MediaReader<RgbaImage>>,
    ) -> MediaResult<Self::Data>;

    fn transform(&self, image: RgbaImage, data: &Self::Data) -> MediaResult<RgbaImage>;

    /// Playback speed multiplier; negative values also reverse playback.
    fn speed(&self) -> f64 {
        1.0
    }

    fn name(&self) -> &str;
}

/// Object-safe view of a [`FrameProcessor`] with its data type erased.
pub trait ErasedProcessor: Send + Sync {
    fn constant_data(
        &self,
        first: &RgbaImage,
        source: Option<&dyn MediaReader<RgbaImage>>,
    ) -> MediaResult<Arc<dyn Any + Send + Sync>>;

    fn transform(&self, image: RgbaImage, data: &(dyn Any + Send + Sync)) -> MediaResult<RgbaImage>;

    fn speed(&self) -> f64;

    fn name(&self) -> &str;
}

impl<P: FrameProcessor> ErasedProcessor for P {
    fn constant_data(
        &self,
        first: &RgbaImage,
        source: Option<&dyn MediaReader<RgbaImage>>,
    ) -> MediaResult<Arc<dyn Any + Send + Sync>> {
        Ok(Arc::new(FrameProcessor::constant_data(self, first, source)?))
    }

    fn transform(&self, image: RgbaImage, data: &(dyn Any + Send + Sync)) -> MediaResult<RgbaImage> {
        let data = data.downcast_ref::<P::Data>().ok_or_else(|| {
            MediaError::FrameProcessing(format!(
                "{}: constant data of the wrong type",
                FrameProcessor::name(self)
            ))
        })?;
        FrameProcessor::transform(self, image, data)
    }

    fn speed(&self) -> f64 {
        FrameProcessor::speed(self)
    }

    fn name(&self) -> &str {
        FrameProcessor::name(self)
    }
}

/// A chain of frame processors.
///
/// `Identity` is the unit of [`then`](ImageProcessor::then); chains are
/// kept as a binary tree so constant data mirrors the processor shape.
#[derive(Clone, Default)]
pub enum ImageProcessor {
    #[default]
    Identity,
    Single(Arc<dyn ErasedProcessor>),
    Sequence(Box<ImageProcessor>, Box<ImageProcessor>),
}

/// Constant data of an [`ImageProcessor`], shaped like the processor.
#[derive(Clone)]
pub enum ProcessorData {
    Unit,
    Single(Arc<dyn Any + Send + Sync>),
    Pair(Box<ProcessorData>, Box<ProcessorData>),
}

impl ImageProcessor {
    pub fn new<P: FrameProcessor>(processor: P) -> Self {
        Self::Single(Arc::new(processor))
    }

    /// Runs `self`, then `next` on its output.
    pub fn then(self, next: ImageProcessor) -> Self {
        match (self, next) {
            (Self::Identity, next) => next,
            (first, Self::Identity) => first,
            (first, next) => Self::Sequence(Box::new(first), Box::new(next)),
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Self::Identity)
    }

    /// Product of every stage's speed.
    pub fn speed(&self) -> f64 {
        match self {
            Self::Identity => 1.0,
            Self::Single(p) => p.speed(),
            Self::Sequence(a, b) => a.speed() * b.speed(),
        }
    }

    /// Stage names in application order, for logging.
    pub fn describe(&self) -> String {
        match self {
            Self::Identity => "identity".to_string(),
            Self::Single(p) => p.name().to_string(),
            Self::Sequence(a, b) => format!("{} -> {}", a.describe(), b.describe()),
        }
    }

    /// Computes constant data from the first frame. Later stages see the
    /// first frame as transformed by earlier ones.
    pub fn constant_data(
        &self,
        first: &RgbaImage,
        source: Option<&dyn MediaReader<RgbaImage>>,
    ) -> MediaResult<ProcessorData> {
        match self {
            Self::Identity => Ok(ProcessorData::Unit),
            Self::Single(p) => Ok(ProcessorData::Single(p.constant_data(first, source)?)),
            Self::Sequence(a, b) => {
                let first_data = a.constant_data(first, source)?;
                let intermediate = a.transform(first.clone(), &first_data)?;
                let second_data = b.constant_data(&intermediate, source)?;
                Ok(ProcessorData::Pair(Box::new(first_data), Box::new(second_data)))
            }
        }
    }

    pub fn transform(&self, image: RgbaImage, data: &ProcessorData) -> MediaResult<RgbaImage> {
        match (self, data) {
            (Self::Identity, _) => Ok(image),
            (Self::Single(p), ProcessorData::Single(d)) => p.transform(image, d.as_ref()),
            (Self::Sequence(a, b), ProcessorData::Pair(da, db)) => {
                let intermediate = a.transform(image, da)?;
                b.transform(intermediate, db)
            }
            _ => Err(MediaError::FrameProcessing(format!(
                "constant data does not match processor {}",
                self.describe()
            ))),
        }
    }
}

impl fmt::Debug for ImageProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImageProcessor({})", self.describe())
    }
}
