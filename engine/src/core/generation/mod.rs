//! Stylized Image Generation
//!
//! Requests one stylized variant of a source photo per style from a remote
//! provider, with bounded concurrency, request pacing and retry on throttling.
//!
//! Results stream to the caller as [`PipelineEvent::ImageReady`] events in
//! completion order.
//!
//! [`PipelineEvent::ImageReady`]: crate::core::tasks::PipelineEvent::ImageReady

mod coordinator;
#[cfg(feature = "ai-providers")]
mod openrouter;
mod provider;
mod source;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use coordinator::{GenerationConfig, GenerationCoordinator, RequestPacing, RetryPolicy};
#[cfg(feature = "ai-providers")]
pub use openrouter::OpenRouterProvider;
pub use provider::{decode_data_url, ApiKey, ProviderError, ProviderImage, StylizationProvider};
pub use source::{encode_source_image, EncodedSource, MAX_SOURCE_DIMENSION};

/// One style to request; created per selected style, consumed once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleRequest {
    pub style_name: String,
    /// Position in the submitted style list, stable regardless of completion order
    pub sequence_index: usize,
    pub total_count: usize,
}

/// A successfully generated stylized image
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedImage {
    pub style: String,
    pub sequence_index: usize,
    /// Shared with the event that delivered it
    #[serde(skip_serializing)]
    pub image_bytes: Arc<[u8]>,
    pub mime_type: String,
}

impl GeneratedImage {
    /// File extension matching the MIME type
    pub fn file_extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            _ => "png",
        }
    }
}
