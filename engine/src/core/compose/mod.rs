//! Video Composition
//!
//! Turns an original photo and a selection of stylized images into one
//! slideshow video: frames are normalized onto a fixed canvas, encoded as
//! segments, crossfaded and finally muxed with an optional soundtrack.

mod pipeline;
mod sequencer;

pub use pipeline::*;
pub use sequencer::*;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::ffmpeg::{TransitionKind, MAX_DIMENSION, MAX_FPS, MIN_DIMENSION};
use crate::core::{CoreError, CoreResult, Size2D, TaskId};

/// Largest accepted repeat count for the base frame sequence
pub const MAX_IMAGE_MULTIPLIER: u32 = 10;

/// Longest accepted slide
pub const MAX_SLIDE_SECONDS: f64 = 60.0;

// =============================================================================
// Configuration
// =============================================================================

/// Output video parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoConfig {
    pub fps: u32,
    pub per_slide_seconds: f64,
    pub transition_seconds: f64,
    pub width: u32,
    pub height: u32,
    /// Put the original photo first in every cycle
    pub include_original: bool,
    /// Number of back-to-back repetitions of the base sequence
    pub image_multiplier: u32,
    /// Crossfaded segments; plain cuts through the concat demuxer otherwise
    pub use_transitions: bool,
    /// Empty selects the default slide rotation
    pub transition_kinds: Vec<TransitionKind>,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            per_slide_seconds: 3.0,
            transition_seconds: 0.6,
            width: 1280,
            height: 720,
            include_original: true,
            image_multiplier: 1,
            use_transitions: true,
            transition_kinds: Vec::new(),
        }
    }
}

impl VideoConfig {
    pub fn size(&self) -> Size2D {
        Size2D::new(self.width, self.height)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if !(1..=MAX_FPS).contains(&self.fps) {
            return Err(invalid(format!("fps must be within 1..={MAX_FPS}, got {}", self.fps)));
        }
        for (label, value) in [("width", self.width), ("height", self.height)] {
            if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&value) || value % 2 != 0 {
                return Err(invalid(format!(
                    "{label} must be even and within {MIN_DIMENSION}..={MAX_DIMENSION}, got {value}"
                )));
            }
        }
        if !(self.per_slide_seconds.is_finite()
            && self.per_slide_seconds > 0.0
            && self.per_slide_seconds <= MAX_SLIDE_SECONDS)
        {
            return Err(invalid(format!(
                "per-slide duration must be in (0, {MAX_SLIDE_SECONDS}], got {}",
                self.per_slide_seconds
            )));
        }
        if !(self.transition_seconds.is_finite()
            && self.transition_seconds >= 0.0
            && self.transition_seconds < self.per_slide_seconds)
        {
            return Err(invalid(format!(
                "transition duration must be in [0, {}), got {}",
                self.per_slide_seconds, self.transition_seconds
            )));
        }
        if !(1..=MAX_IMAGE_MULTIPLIER).contains(&self.image_multiplier) {
            return Err(invalid(format!(
                "image multiplier must be within 1..={MAX_IMAGE_MULTIPLIER}, got {}",
                self.image_multiplier
            )));
        }
        Ok(())
    }
}

fn invalid(message: String) -> CoreError {
    CoreError::ValidationError(message)
}

// =============================================================================
// Requests & Results
// =============================================================================

/// Inputs of one compose run
#[derive(Debug, Clone)]
pub struct ComposeRequest {
    pub original: PathBuf,
    /// Generated images in the order they should appear
    pub images: Vec<PathBuf>,
    pub audio: Option<PathBuf>,
    pub config: VideoConfig,
}

/// Output of a successful compose run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposedVideo {
    pub task_id: TaskId,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub frame_count: usize,
    pub has_audio: bool,
}

/// Compose state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodeStage {
    Sequencing,
    Assembling,
    TransitionMerging,
    AudioMuxing,
    Done,
    Failed,
}

impl EncodeStage {
    pub fn can_advance_to(self, next: EncodeStage) -> bool {
        use EncodeStage::*;
        match (self, next) {
            (Done | Failed, _) => false,
            (_, Failed) => true,
            (Sequencing, Assembling) => true,
            (Assembling, TransitionMerging | AudioMuxing) => true,
            (TransitionMerging, AudioMuxing) => true,
            (AudioMuxing, Done) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for EncodeStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EncodeStage::Sequencing => "sequencing",
            EncodeStage::Assembling => "assembling",
            EncodeStage::TransitionMerging => "transition merging",
            EncodeStage::AudioMuxing => "audio muxing",
            EncodeStage::Done => "done",
            EncodeStage::Failed => "failed",
        };
        f.write_str(name)
    }
}
