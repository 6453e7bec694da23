//! FFmpeg Integration Module
//!
//! Drives the external ffmpeg binary for slideshow composition:
//! - Structured command builders per operation (concat assembly, segment encode,
//!   crossfade merge, audio mux, duration probe)
//! - Process execution with hard timeouts and concurrent stdout/stderr draining
//! - Progress marker parsing from the encoder's output streams
//! - Output file validation after every invocation
//!
//! Only system-installed (or explicitly configured) binaries are used.

mod builder;
mod detection;
mod progress;
mod runner;

pub use builder::{
    AudioMux, ConcatAssembly, DurationProbe, EncoderCommand, EncodingProfile, SegmentEncode,
    TransitionKind, TransitionMerge, TransitionPlan, MAX_DIMENSION, MAX_FPS, MIN_DIMENSION,
};
pub use detection::*;
pub use progress::{parse_duration_line, parse_progress_marker, ProgressEstimate, ProgressMarker};
pub use runner::{EncoderInvocation, FFmpegRunner, InvocationOutput};

/// FFmpeg-related error types
#[derive(Debug, thiserror::Error)]
pub enum FFmpegError {
    #[error("FFmpeg not found. Please install FFmpeg or set the encoder path in settings.")]
    NotFound,

    #[error("FFmpeg execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Invalid input file: {0}")]
    InvalidInput(String),

    #[error("Invalid encoder parameters: {0}")]
    InvalidParameters(String),

    #[error("Output path error: {0}")]
    OutputError(String),

    #[error("Encoder produced no output: {0}")]
    EmptyOutput(String),

    #[error("Process error: {0}")]
    ProcessError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Timeout: {label} exceeded {seconds}s")]
    Timeout { label: String, seconds: u64 },
}

pub type FFmpegResult<T> = Result<T, FFmpegError>;
