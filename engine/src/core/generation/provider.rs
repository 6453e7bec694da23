//! Provider Interface
//!
//! Defines the trait every image stylization backend implements and the
//! classification of a single attempt's failure.

use async_trait::async_trait;
use base64::Engine as _;

use super::{EncodedSource, StyleRequest};
use crate::core::CoreError;

/// Bearer credential for a provider; never printed
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into().trim().to_string())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

/// Decoded image returned by a provider
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Outcome classification of one provider attempt
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum ProviderError {
    /// HTTP 429; retried with exponential backoff
    #[error("throttled: {0}")]
    Throttled(String),

    /// Timeout or connection failure; retried with a fixed delay
    #[error("transport: {0}")]
    Transport(String),

    /// No image could be found in the response; never retried
    #[error("unparseable response: {0}")]
    Unparseable(String),

    /// Any other non-success status; never retried
    #[error("rejected: {0}")]
    Rejected(String),
}

impl From<ProviderError> for CoreError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Throttled(msg) => CoreError::ProviderThrottled(msg),
            ProviderError::Transport(msg) => CoreError::ProviderTransport(msg),
            ProviderError::Unparseable(msg) => CoreError::ProviderResponseUnparseable(msg),
            ProviderError::Rejected(msg) => CoreError::ProviderRejected(msg),
        }
    }
}

/// Remote image stylization backend
#[async_trait]
pub trait StylizationProvider: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &str;

    /// Performs exactly one attempt; retries are the caller's concern
    async fn stylize(
        &self,
        credential: &ApiKey,
        request: &StyleRequest,
        source: &EncodedSource,
    ) -> Result<ProviderImage, ProviderError>;
}

/// Decodes a `data:image/<type>;base64,<payload>` URL
pub fn decode_data_url(url: &str) -> Option<ProviderImage> {
    let rest = url.trim().strip_prefix("data:")?;
    let (meta, payload) = rest.split_once(',')?;
    let mime_type = meta.strip_suffix(";base64")?;
    if !mime_type.starts_with("image/") {
        return None;
    }
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .ok()
        .filter(|b| !b.is_empty())?;
    Some(ProviderImage {
        bytes,
        mime_type: mime_type.to_ascii_lowercase(),
    })
}
