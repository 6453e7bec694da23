//! Stylize Core Engine
//!
//! Generates stylized variants of a photo through a remote image model and
//! composes them into a slideshow video with ffmpeg.

pub mod compose;
pub mod ffmpeg;
pub mod fs;
pub mod generation;
pub mod media;
pub mod process;
pub mod progress;
pub mod service;
pub mod settings;
pub mod styles;
pub mod tasks;

// Re-export common types
mod types;
pub use types::*;

mod error;
pub use error::*;
