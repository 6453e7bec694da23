//! Generation Coordinator
//!
//! Issues one provider request per selected style on a bounded worker pool.
//!
//! Per request:
//! - waits for a pool permit (excess requests queue in submission order)
//! - sleeps the pacing delay (1s for the first dispatch, then at least 2s)
//! - calls the provider, retrying throttling and transport failures
//! - emits `ImageReady` on success before releasing its permit
//! - bumps the completion counter and emits progress, success or not

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use super::provider::{ApiKey, ProviderError, ProviderImage, StylizationProvider};
use super::source::{encode_source_image, EncodedSource};
use super::{GeneratedImage, StyleRequest};
use crate::core::styles::{select_styles, StyleCatalog};
use crate::core::tasks::{CancelFlag, EventSink, PipelineEvent};
use crate::core::{CoreError, CoreResult};

// =============================================================================
// Policies
// =============================================================================

/// Backoff rules for a single style's request
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_throttle_retries: u32,
    pub throttle_base: Duration,
    pub throttle_step: Duration,
    pub throttle_cap: Duration,
    pub throttle_jitter: Duration,
    pub max_transport_retries: u32,
    pub transport_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_throttle_retries: 5,
            throttle_base: Duration::from_secs(5),
            throttle_step: Duration::from_secs(3),
            throttle_cap: Duration::from_secs(30),
            throttle_jitter: Duration::from_secs(2),
            max_transport_retries: 2,
            transport_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// `min(base + step * 2^attempt, cap)` without jitter
    pub fn throttle_backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let delay = self
            .throttle_base
            .saturating_add(self.throttle_step.saturating_mul(factor));
        delay.min(self.throttle_cap)
    }

    /// Backoff plus uniform jitter in `[0, throttle_jitter]`
    pub fn throttle_delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let jitter = if self.throttle_jitter.is_zero() {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(rng.gen_range(0.0..=self.throttle_jitter.as_secs_f64()))
        };
        self.throttle_backoff(attempt) + jitter
    }
}

/// Delay each worker sleeps before issuing its call
#[derive(Debug, Clone, PartialEq)]
pub struct RequestPacing {
    pub first_request_delay: Duration,
    pub request_delay: Duration,
    pub min_request_delay: Duration,
}

impl Default for RequestPacing {
    fn default() -> Self {
        Self::from_delay_ms(1200)
    }
}

impl RequestPacing {
    pub fn from_delay_ms(request_delay_ms: u64) -> Self {
        Self {
            first_request_delay: Duration::from_secs(1),
            request_delay: Duration::from_millis(request_delay_ms),
            min_request_delay: Duration::from_secs(2),
        }
    }

    /// Delay for the `dispatch`-th request (0-based, in dispatch order)
    pub fn delay_for(&self, dispatch: usize) -> Duration {
        if dispatch == 0 {
            self.first_request_delay
        } else {
            self.request_delay.max(self.min_request_delay)
        }
    }
}

/// Parameters of one generation run
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Styles asked for by the caller; may be empty
    pub requested_styles: Vec<String>,
    pub style_count: usize,
    pub concurrency_limit: usize,
    pub pacing: RequestPacing,
    pub retry: RetryPolicy,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            requested_styles: Vec::new(),
            style_count: 2,
            concurrency_limit: 1,
            pacing: RequestPacing::default(),
            retry: RetryPolicy::default(),
        }
    }
}

// =============================================================================
// Coordinator
// =============================================================================

/// Runs style requests against a provider
#[derive(Clone)]
pub struct GenerationCoordinator {
    provider: Arc<dyn StylizationProvider>,
    catalog: StyleCatalog,
}

impl GenerationCoordinator {
    pub fn new(provider: Arc<dyn StylizationProvider>, catalog: StyleCatalog) -> Self {
        Self { provider, catalog }
    }

    pub fn catalog(&self) -> &StyleCatalog {
        &self.catalog
    }

    /// Generate every selected style and return the successes.
    ///
    /// Individual style failures are absorbed. Fails only when no style can
    /// be attempted or the source image cannot be encoded. Progress reaches
    /// 100 of the sink's window once every request has completed.
    pub async fn generate(
        &self,
        source_path: &Path,
        credential: &ApiKey,
        config: &GenerationConfig,
        sink: &EventSink,
        cancel: &CancelFlag,
    ) -> CoreResult<Vec<GeneratedImage>> {
        let styles = select_styles(
            &config.requested_styles,
            config.style_count,
            &self.catalog,
            &mut rand::thread_rng(),
        );
        if styles.is_empty() {
            return Err(CoreError::NoStylesAvailable);
        }

        let source = Arc::new(encode_source_image(source_path).await?);
        let total = styles.len();
        let workers = config.concurrency_limit.clamp(1, total);

        info!(
            provider = self.provider.name(),
            total,
            workers,
            styles = ?styles,
            "Starting style generation"
        );

        let permits = Arc::new(Semaphore::new(workers));
        let dispatched = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(Mutex::new(0usize));
        let mut join_set = JoinSet::new();

        for (sequence_index, style_name) in styles.into_iter().enumerate() {
            let worker = StyleWorker {
                provider: Arc::clone(&self.provider),
                credential: credential.clone(),
                source: Arc::clone(&source),
                request: StyleRequest {
                    style_name,
                    sequence_index,
                    total_count: total,
                },
                pacing: config.pacing.clone(),
                retry: config.retry.clone(),
                sink: sink.clone(),
                cancel: cancel.clone(),
                dispatched: Arc::clone(&dispatched),
                completed: Arc::clone(&completed),
            };
            let permits = Arc::clone(&permits);
            join_set.spawn(async move {
                let _permit = permits.acquire_owned().await.ok()?;
                worker.run().await
            });
        }

        let mut results = Vec::with_capacity(total);
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Some(image)) => results.push(image),
                Ok(None) => {}
                Err(e) => error!("Style worker terminated abnormally: {}", e),
            }
        }

        info!(succeeded = results.len(), total, "Style generation finished");
        Ok(results)
    }
}

/// Everything one queued style request needs, moved into its task
struct StyleWorker {
    provider: Arc<dyn StylizationProvider>,
    credential: ApiKey,
    source: Arc<EncodedSource>,
    request: StyleRequest,
    pacing: RequestPacing,
    retry: RetryPolicy,
    sink: EventSink,
    cancel: CancelFlag,
    dispatched: Arc<AtomicUsize>,
    completed: Arc<Mutex<usize>>,
}

impl StyleWorker {
    /// Runs with a pool permit held
    async fn run(self) -> Option<GeneratedImage> {
        let outcome = if self.cancel.is_cancelled() {
            info!(style = %self.request.style_name, "Skipping queued style after cancellation");
            None
        } else {
            let dispatch = self.dispatched.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.pacing.delay_for(dispatch)).await;
            self.attempt_with_retry().await
        };

        let image = match outcome {
            Some(Ok(payload)) => {
                let image = GeneratedImage {
                    style: self.request.style_name.clone(),
                    sequence_index: self.request.sequence_index,
                    image_bytes: Arc::from(payload.bytes),
                    mime_type: payload.mime_type,
                };
                self.sink.emit(PipelineEvent::ImageReady(image.clone())).await;
                Some(image)
            }
            Some(Err(e)) => {
                warn!(
                    style = %self.request.style_name,
                    index = self.request.sequence_index,
                    error = %e,
                    "Style generation failed"
                );
                None
            }
            None => None,
        };

        let mut done = self.completed.lock().await;
        *done += 1;
        let total = self.request.total_count.max(1);
        self.sink
            .checkpoint(
                *done as f64 / total as f64 * 100.0,
                &format!("Generated {}/{} styles", *done, total),
            )
            .await;

        image
    }

    async fn attempt_with_retry(&self) -> Option<Result<ProviderImage, ProviderError>> {
        let mut throttle_retries = 0u32;
        let mut transport_retries = 0u32;

        loop {
            let result = self
                .provider
                .stylize(&self.credential, &self.request, &self.source)
                .await;

            let delay = match &result {
                Err(ProviderError::Throttled(msg)) if throttle_retries < self.retry.max_throttle_retries => {
                    let delay = self
                        .retry
                        .throttle_delay(throttle_retries, &mut rand::thread_rng());
                    throttle_retries += 1;
                    warn!(
                        style = %self.request.style_name,
                        retry = throttle_retries,
                        delay_secs = delay.as_secs_f64(),
                        "Provider throttled request, backing off: {}",
                        msg
                    );
                    delay
                }
                Err(ProviderError::Transport(msg)) if transport_retries < self.retry.max_transport_retries => {
                    transport_retries += 1;
                    warn!(
                        style = %self.request.style_name,
                        retry = transport_retries,
                        "Transport error, retrying: {}",
                        msg
                    );
                    self.retry.transport_delay
                }
                _ => return Some(result),
            };

            tokio::time::sleep(delay).await;
        }
    }
}
