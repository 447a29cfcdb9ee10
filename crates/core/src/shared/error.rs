use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("unreadable input {target}: {reason}")]
    UnreadableInput { target: String, reason: String },
    #[error("unsupported output format: {0}")]
    UnsupportedFormat(String),
    #[error("{operation} failed for {target}: {source}")]
    Codec {
        operation: &'static str,
        target: String,
        #[source]
        source: ffmpeg_next::Error,
    },
    #[error("image codec failed for {target}: {source}")]
    Image {
        target: String,
        #[source]
        source: image::ImageError,
    },
    #[error("gif decoding failed: {0}")]
    GifDecode(#[from] gif::DecodingError),
    #[error("gif encoding failed: {0}")]
    GifEncode(#[from] gif::EncodingError),
    #[error("not a GIF: {0}")]
    NotAGif(String),
    #[error("no frame at {0:?}")]
    NoSuchFrame(Duration),
    #[error("frame processing failed: {0}")]
    FrameProcessing(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type MediaResult<T> = Result<T, MediaError>;

/// Attaches the failing operation and its target to an ffmpeg error.
pub trait CodecContext<T> {
    fn codec(self, operation: &'static str, target: &str) -> MediaResult<T>;
}

impl<T> CodecContext<T> for Result<T, ffmpeg_next::Error> {
    fn codec(self, operation: &'static str, target: &str) -> MediaResult<T> {
        self.map_err(|source| MediaError::Codec {
            operation,
            target: target.to_string(),
            source,
        })
    }
}

impl MediaError {
    pub fn unreadable(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnreadableInput {
            target: target.into(),
            reason: reason.into(),
        }
    }

    pub fn image(target: impl Into<String>, source: image::ImageError) -> Self {
        match source {
            image::ImageError::Unsupported(e) => Self::UnsupportedFormat(e.to_string()),
            source => Self::Image {
                target: target.into(),
                source,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_context_wraps_operation_and_target() {
        let result: Result<(), ffmpeg_next::Error> = Err(ffmpeg_next::Error::Eof);
        let err = result.codec("open input", "clip.mp4").unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("open input failed for clip.mp4"));
    }

    #[test]
    fn test_unsupported_image_error_maps_to_unsupported_format() {
        let source = image::ImageError::Unsupported(
            image::error::UnsupportedError::from_format_and_kind(
                image::error::ImageFormatHint::Unknown,
                image::error::UnsupportedErrorKind::Format(image::error::ImageFormatHint::Unknown),
            ),
        );
        assert!(matches!(
            MediaError::image("out.xyz", source),
            MediaError::UnsupportedFormat(_)
        ));
    }

    #[test]
    fn test_not_a_gif_is_distinct_from_io() {
        let err = MediaError::NotAGif("truncated header".into());
        assert_eq!(err.to_string(), "not a GIF: truncated header");
        assert!(!matches!(err, MediaError::Io(_)));
    }
}
