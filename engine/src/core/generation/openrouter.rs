//! OpenRouter Image Stylization Provider
//!
//! Sends the source image and a style instruction to an OpenAI-compatible
//! chat-completions endpoint and extracts the returned image.
//!
//! Image lookup order in the response:
//! 1. `choices[0].message.images[0].image_url.url`
//! 2. `choices[0].message.content[*]` blocks (`image_url.url`, `url`, `image_base64`)
//! 3. Any base64 image data URL anywhere in the raw body

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::provider::{decode_data_url, ApiKey, ProviderError, ProviderImage, StylizationProvider};
use super::{EncodedSource, StyleRequest};
use crate::core::settings::{DEFAULT_PROVIDER_ENDPOINT, DEFAULT_PROVIDER_MODEL};
use crate::core::styles::prompt_for;
use crate::core::{CoreError, CoreResult};

// =============================================================================
// Constants
// =============================================================================

/// Default per-request timeout
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Maximum characters of an error body kept in messages
const MAX_ERROR_BODY_CHARS: usize = 500;

// =============================================================================
// API Request Types
// =============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: String },
    ImageUrl { image_url: ImageUrl<'a> },
}

#[derive(Debug, Serialize)]
struct ImageUrl<'a> {
    url: &'a str,
}

// =============================================================================
// OpenRouterProvider
// =============================================================================

/// Chat-completions based stylization provider
pub struct OpenRouterProvider {
    client: reqwest::Client,
    endpoint: String,
    model_id: String,
}

impl std::fmt::Debug for OpenRouterProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterProvider")
            .field("endpoint", &self.endpoint)
            .field("model_id", &self.model_id)
            .finish_non_exhaustive()
    }
}

impl OpenRouterProvider {
    /// Create a provider with the default endpoint, model and timeout
    pub fn new() -> CoreResult<Self> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: DEFAULT_PROVIDER_ENDPOINT.to_string(),
            model_id: DEFAULT_PROVIDER_MODEL.to_string(),
        })
    }

    /// Set custom endpoint URL
    pub fn with_endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint = url.into();
        self
    }

    /// Set custom model ID
    pub fn with_model_id(mut self, model: impl Into<String>) -> Self {
        self.model_id = model.into();
        self
    }

    fn build_request<'a>(&'a self, style: &str, source: &'a EncodedSource) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model_id,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text {
                        text: prompt_for(style),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: &source.data_url,
                        },
                    },
                ],
            }],
        }
    }

    fn classify_status(status: StatusCode, body: &str) -> ProviderError {
        let truncated: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        let message = format!("HTTP {}: {}", status, truncated);
        if status == StatusCode::TOO_MANY_REQUESTS {
            ProviderError::Throttled(message)
        } else {
            ProviderError::Rejected(message)
        }
    }

    fn classify_transport(err: &reqwest::Error) -> ProviderError {
        if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            ProviderError::Transport(err.to_string())
        } else {
            ProviderError::Rejected(err.to_string())
        }
    }
}

#[async_trait]
impl StylizationProvider for OpenRouterProvider {
    fn name(&self) -> &str {
        "openrouter"
    }

    async fn stylize(
        &self,
        credential: &ApiKey,
        request: &StyleRequest,
        source: &EncodedSource,
    ) -> Result<ProviderImage, ProviderError> {
        debug!(
            style = %request.style_name,
            index = request.sequence_index,
            total = request.total_count,
            "Sending stylization request"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", credential.expose()))
            .json(&self.build_request(&request.style_name, source))
            .send()
            .await
            .map_err(|e| Self::classify_transport(&e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Self::classify_transport(&e))?;

        if !status.is_success() {
            warn!(style = %request.style_name, %status, "Provider returned an error status");
            return Err(Self::classify_status(status, &body));
        }

        let image = extract_image(&body).ok_or_else(|| {
            let preview: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
            ProviderError::Unparseable(format!("no image in response: {preview}"))
        })?;

        info!(
            style = %request.style_name,
            bytes = image.bytes.len(),
            "Provider returned an image"
        );
        Ok(image)
    }
}

// =============================================================================
// Response Parsing
// =============================================================================

/// Finds the generated image in a raw response body
pub(crate) fn extract_image(body: &str) -> Option<ProviderImage> {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        let message = &json["choices"][0]["message"];

        if let Some(image) = message["images"][0]["image_url"]["url"]
            .as_str()
            .filter(|url| url.starts_with("data:image/"))
            .and_then(decode_data_url)
        {
            return Some(image);
        }

        if let Some(parts) = message["content"].as_array() {
            if let Some(image) = parts.iter().find_map(image_from_content_part) {
                return Some(image);
            }
        }
    }

    data_url_pattern()
        .and_then(|re| re.find(body))
        .and_then(|m| decode_data_url(m.as_str()))
}

fn image_from_content_part(part: &Value) -> Option<ProviderImage> {
    if let Some(url) = part["image_url"]["url"].as_str() {
        if let Some(image) = decode_data_url(url) {
            return Some(image);
        }
    }
    if let Some(url) = part["url"].as_str() {
        if let Some(image) = decode_data_url(url) {
            return Some(image);
        }
    }
    part["image_base64"]
        .as_str()
        .and_then(|b64| decode_data_url(&format!("data:image/png;base64,{b64}")))
}

fn data_url_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"data:image/(?:png|jpeg|jpg|webp);base64,[A-Za-z0-9+/=]+").ok())
        .as_ref()
}
