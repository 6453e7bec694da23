//! Stylize Core Type Definitions
//!
//! Defines fundamental types shared by the generation and composition pipeline.

use serde::{Deserialize, Serialize};

// =============================================================================
// ID Types
// =============================================================================

/// Task unique identifier (UUID v4)
pub type TaskId = String;

/// Stored media file identifier (ULID)
pub type FileId = String;

/// Creates a new task identifier
pub fn new_task_id() -> TaskId {
    uuid::Uuid::new_v4().to_string()
}

/// Creates a new stored file identifier
pub fn new_file_id() -> FileId {
    ulid::Ulid::new().to_string()
}

/// Progress percentage in the range 0.0 ~ 100.0
pub type Percent = f64;

// =============================================================================
// Spatial Types
// =============================================================================

/// 2D size in pixels
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size2D {
    pub width: u32,
    pub height: u32,
}

impl Size2D {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Largest size with the same aspect ratio as `self` that fits inside `bounds`.
    ///
    /// Never returns a zero dimension.
    pub fn fit_within(&self, bounds: Size2D) -> Size2D {
        if self.width == 0 || self.height == 0 {
            return bounds;
        }
        let scale = f64::min(
            bounds.width as f64 / self.width as f64,
            bounds.height as f64 / self.height as f64,
        );
        let width = ((self.width as f64 * scale).round() as u32).clamp(1, bounds.width.max(1));
        let height = ((self.height as f64 * scale).round() as u32).clamp(1, bounds.height.max(1));
        Size2D { width, height }
    }
}

impl Default for Size2D {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

impl std::fmt::Display for Size2D {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
