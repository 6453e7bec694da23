//! Stylize Error Definitions
//!
//! Defines error types used throughout the pipeline.

use thiserror::Error;

use super::ffmpeg::FFmpegError;
use super::TaskId;

/// Core engine error types
#[derive(Error, Debug)]
pub enum CoreError {
    // =========================================================================
    // Provider Errors
    // =========================================================================
    #[error("Provider throttled the request: {0}")]
    ProviderThrottled(String),

    #[error("Provider transport error: {0}")]
    ProviderTransport(String),

    #[error("Provider response contained no image: {0}")]
    ProviderResponseUnparseable(String),

    #[error("Provider rejected the request: {0}")]
    ProviderRejected(String),

    #[error("No styles could be attempted")]
    NoStylesAvailable,

    #[error("No images generated")]
    NoImagesGenerated,

    // =========================================================================
    // Source / Frame Errors
    // =========================================================================
    #[error("Source image invalid: {0}")]
    SourceImageInvalid(String),

    #[error("Failed to write frame: {0}")]
    FrameWriteFailure(String),

    #[error("No usable source material for the video")]
    NoUsableFrames,

    // =========================================================================
    // Encoder Errors
    // =========================================================================
    #[error("Encoder process failed: {0}")]
    EncoderProcessFailure(String),

    // =========================================================================
    // Task Errors
    // =========================================================================
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Invalid task transition for {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: String,
        to: String,
    },

    #[error("Task cancelled: {0}")]
    Cancelled(TaskId),

    #[error("File not found: {0}")]
    FileNotFound(String),

    // =========================================================================
    // General Errors
    // =========================================================================
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Core engine result type
pub type CoreResult<T> = Result<T, CoreError>;

impl From<FFmpegError> for CoreError {
    fn from(err: FFmpegError) -> Self {
        CoreError::EncoderProcessFailure(err.to_string())
    }
}

impl CoreError {
    /// Returns true for errors caused by the caller's input rather than the pipeline
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CoreError::ValidationError(_) | CoreError::FileNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::InvalidTransition {
            task_id: "t1".to_string(),
            from: "completed".to_string(),
            to: "processing".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid task transition for t1: completed -> processing"
        );
        assert_eq!(
            CoreError::NoUsableFrames.to_string(),
            "No usable source material for the video"
        );
    }

    #[test]
    fn test_ffmpeg_error_preserves_detail() {
        let err: CoreError = FFmpegError::EmptyOutput("segment_000.mp4".to_string()).into();
        match err {
            CoreError::EncoderProcessFailure(msg) => assert!(msg.contains("segment_000.mp4")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: CoreError = io.into();
        assert!(matches!(err, CoreError::IoError(_)));
        assert!(!err.is_validation());
        assert!(CoreError::ValidationError("x".into()).is_validation());
    }
}
