//! Task Orchestration
//!
//! [`StylizeService`] starts generation and compose work as background tasks,
//! records their progress in a [`TaskStore`] and exposes status polling and
//! cancellation.
//!
//! Each phase of a task gets its own event channel. A reporter task drains it,
//! persisting finished images through the [`MediaStore`] and writing progress
//! into the task record; the flow waits for the reporter before moving on, so
//! every image reported during generation is stored before composition starts.
//!
//! | flow              | generation | compose  | final status  |
//! |-------------------|------------|----------|---------------|
//! | generate video    | 10 ~ 70    | 70 ~ 100 | completed     |
//! | generate images   | 10 ~ 90    |          | images_ready  |
//! | compose selection |            | 40 ~ 90  | completed     |
//! | regenerate        |            | 50 ~ 90  | completed     |

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::core::compose::{ComposeRequest, ComposedVideo, VideoComposer, VideoConfig};
use crate::core::ffmpeg::FFmpegError;
use crate::core::generation::{ApiKey, GenerationCoordinator, StylizationProvider};
use crate::core::media::{MediaStore, StoredImage};
use crate::core::settings::AppSettings;
use crate::core::styles::StyleCatalog;
use crate::core::tasks::{
    event_channel, CancelFlag, EventSink, PipelineEvent, TaskKind, TaskRecord, TaskStatus,
    TaskStore, EVENT_CHANNEL_CAPACITY,
};
use crate::core::{CoreError, CoreResult, FileId, Percent, TaskId};

// =============================================================================
// Requests
// =============================================================================

/// Parameters of a generation run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerateRequest {
    /// Stored source photo
    pub source_file_id: FileId,
    /// Explicit style names; empty picks randomly from the catalog
    pub styles: Vec<String>,
    pub count: Option<usize>,
    pub concurrency: Option<usize>,
    /// Falls back to the configured provider key
    #[serde(skip)]
    pub credential: Option<ApiKey>,
}

/// Generate styles, then compose them
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerateVideoRequest {
    #[serde(flatten)]
    pub generate: GenerateRequest,
    pub audio_file_id: Option<FileId>,
    pub video: VideoConfig,
}

/// Compose a subset of a finished task's images
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ComposeSelectionRequest {
    pub source_task_id: TaskId,
    /// Image file IDs in the order they should appear
    pub image_ids: Vec<FileId>,
    pub audio_file_id: Option<FileId>,
    pub video: VideoConfig,
}

/// Compose explicitly listed stored images
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegenerateRequest {
    pub original_file_id: FileId,
    pub image_ids: Vec<FileId>,
    pub audio_file_id: Option<FileId>,
    pub video: VideoConfig,
}

// =============================================================================
// Service
// =============================================================================

struct ServiceInner {
    settings: AppSettings,
    coordinator: GenerationCoordinator,
    composer: Option<VideoComposer>,
    tasks: Arc<dyn TaskStore>,
    media: Arc<dyn MediaStore>,
    running: Mutex<HashMap<TaskId, CancelFlag>>,
}

/// Starts, tracks and cancels stylization tasks
#[derive(Clone)]
pub struct StylizeService {
    inner: Arc<ServiceInner>,
}

impl StylizeService {
    /// `composer` is optional; compose flows fail to start without it
    pub fn new(
        settings: AppSettings,
        provider: Arc<dyn StylizationProvider>,
        catalog: StyleCatalog,
        tasks: Arc<dyn TaskStore>,
        media: Arc<dyn MediaStore>,
        composer: Option<VideoComposer>,
    ) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                settings,
                coordinator: GenerationCoordinator::new(provider, catalog),
                composer,
                tasks,
                media,
                running: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn settings(&self) -> &AppSettings {
        &self.inner.settings
    }

    pub fn catalog(&self) -> &StyleCatalog {
        self.inner.coordinator.catalog()
    }

    pub fn media(&self) -> &Arc<dyn MediaStore> {
        &self.inner.media
    }

    pub async fn status(&self, task_id: &str) -> CoreResult<TaskRecord> {
        self.inner.tasks.get(task_id).await
    }

    /// Marks the task cancelled and signals its workers. Work already in
    /// flight finishes, but nothing new is started.
    pub async fn cancel(&self, task_id: &str) -> CoreResult<TaskRecord> {
        let record = self
            .inner
            .tasks
            .transition(task_id, TaskStatus::Cancelled, "Cancelled by user")
            .await?;
        if let Some(flag) = self.inner.running.lock().await.get(task_id) {
            flag.cancel();
        }
        info!(task_id = %task_id, "Task cancelled");
        Ok(record)
    }

    pub async fn start_generate_video(&self, request: GenerateVideoRequest) -> CoreResult<TaskId> {
        request.video.validate()?;
        self.inner.require_composer()?;
        let credential = self.inner.credential(&request.generate)?;
        let source = self.inner.media.resolve(&request.generate.source_file_id).await?;
        let audio = self.inner.resolve_optional(request.audio_file_id.as_deref()).await?;

        let mut record = TaskRecord::new(TaskKind::GenerateVideo);
        record.source_file_id = Some(request.generate.source_file_id.clone());

        self.spawn(record, move |inner, task_id, cancel| async move {
            inner.report(&task_id, 5.0, "Preparing generation").await;
            let stored = inner
                .run_generation(&task_id, &source, &credential, &request.generate, (10.0, 70.0), &cancel)
                .await?;
            let images = stored.into_iter().map(|image| image.path).collect();
            let compose = ComposeRequest {
                original: source,
                images,
                audio,
                config: request.video,
            };
            let video = inner
                .run_compose(&task_id, &compose, (70.0, 100.0), &cancel)
                .await?;
            inner.finish_video(&task_id, video).await
        })
        .await
    }

    pub async fn start_generate_images(&self, request: GenerateRequest) -> CoreResult<TaskId> {
        let credential = self.inner.credential(&request)?;
        let source = self.inner.media.resolve(&request.source_file_id).await?;

        let mut record = TaskRecord::new(TaskKind::GenerateImages);
        record.source_file_id = Some(request.source_file_id.clone());

        self.spawn(record, move |inner, task_id, cancel| async move {
            inner.report(&task_id, 5.0, "Preparing generation").await;
            let stored = inner
                .run_generation(&task_id, &source, &credential, &request, (10.0, 90.0), &cancel)
                .await?;
            inner
                .tasks
                .transition(
                    &task_id,
                    TaskStatus::ImagesReady,
                    &format!("{} images ready", stored.len()),
                )
                .await?;
            Ok(())
        })
        .await
    }

    /// Composes images of an earlier task. Every selected ID must belong to
    /// that task.
    pub async fn start_compose_selection(
        &self,
        request: ComposeSelectionRequest,
    ) -> CoreResult<TaskId> {
        request.video.validate()?;
        self.inner.require_composer()?;
        let source_task = self.inner.tasks.get(&request.source_task_id).await?;
        let original_id = source_task.source_file_id.clone().ok_or_else(|| {
            CoreError::ValidationError(format!(
                "Task {} has no source image",
                request.source_task_id
            ))
        })?;
        let selected = select_owned_images(&source_task, &request.image_ids)?;
        let original = self.inner.media.resolve(&original_id).await?;
        let audio = self.inner.resolve_optional(request.audio_file_id.as_deref()).await?;

        let mut record = TaskRecord::new(TaskKind::ComposeSelection);
        record.source_file_id = Some(original_id);

        self.spawn(record, move |inner, task_id, cancel| async move {
            inner.report(&task_id, 20.0, "Preparing composition").await;
            let compose = ComposeRequest {
                original,
                images: selected,
                audio,
                config: request.video,
            };
            let video = inner
                .run_compose(&task_id, &compose, (40.0, 90.0), &cancel)
                .await?;
            inner.finish_video(&task_id, video).await
        })
        .await
    }

    /// Composes explicitly listed stored images with an original photo
    pub async fn start_regenerate(&self, request: RegenerateRequest) -> CoreResult<TaskId> {
        request.video.validate()?;
        self.inner.require_composer()?;
        let original = self.inner.media.resolve(&request.original_file_id).await?;
        let audio = self.inner.resolve_optional(request.audio_file_id.as_deref()).await?;

        let mut record = TaskRecord::new(TaskKind::Regenerate);
        record.source_file_id = Some(request.original_file_id.clone());

        self.spawn(record, move |inner, task_id, cancel| async move {
            inner.report(&task_id, 20.0, "Resolving images").await;
            let mut images = Vec::with_capacity(request.image_ids.len());
            for file_id in &request.image_ids {
                match inner.media.resolve(file_id).await {
                    Ok(path) => images.push(path),
                    Err(e) => warn!(task_id = %task_id, file_id = %file_id, "Skipping image: {}", e),
                }
            }
            let compose = ComposeRequest {
                original,
                images,
                audio,
                config: request.video,
            };
            let video = inner
                .run_compose(&task_id, &compose, (50.0, 90.0), &cancel)
                .await?;
            inner.finish_video(&task_id, video).await
        })
        .await
    }

    /// Registers the record and runs `flow` in the background
    async fn spawn<F, Fut>(&self, record: TaskRecord, flow: F) -> CoreResult<TaskId>
    where
        F: FnOnce(Arc<ServiceInner>, TaskId, CancelFlag) -> Fut + Send + 'static,
        Fut: Future<Output = CoreResult<()>> + Send + 'static,
    {
        let task_id = record.id.clone();
        let kind = record.kind;
        let cancel = CancelFlag::new();
        self.inner.tasks.upsert(record).await;
        self.inner
            .running
            .lock()
            .await
            .insert(task_id.clone(), cancel.clone());

        let inner = Arc::clone(&self.inner);
        let id = task_id.clone();
        tokio::spawn(async move {
            info!(task_id = %id, kind = ?kind, "Task started");
            let result = flow(Arc::clone(&inner), id.clone(), cancel).await;
            inner.running.lock().await.remove(&id);
            match result {
                Ok(()) => info!(task_id = %id, "Task finished"),
                Err(CoreError::Cancelled(_)) => info!(task_id = %id, "Task stopped after cancel"),
                Err(e) => inner.fail(&id, &e).await,
            }
        });

        Ok(task_id)
    }
}

impl ServiceInner {
    fn require_composer(&self) -> CoreResult<&VideoComposer> {
        self.composer
            .as_ref()
            .ok_or_else(|| CoreError::from(FFmpegError::NotFound))
    }

    fn credential(&self, request: &GenerateRequest) -> CoreResult<ApiKey> {
        request
            .credential
            .clone()
            .filter(|key| !key.is_empty())
            .or_else(|| self.settings.provider.api_key())
            .ok_or_else(|| CoreError::ValidationError("Provider API key is required".to_string()))
    }

    async fn resolve_optional(&self, file_id: Option<&str>) -> CoreResult<Option<PathBuf>> {
        match file_id {
            Some(id) => Ok(Some(self.media.resolve(id).await?)),
            None => Ok(None),
        }
    }

    async fn report(&self, task_id: &str, percent: Percent, message: &str) {
        if let Err(e) = self.tasks.record_progress(task_id, percent, message).await {
            debug!(task_id = %task_id, "Progress not recorded: {}", e);
        }
    }

    /// Generates and persists images; the result is in sequence order
    async fn run_generation(
        self: &Arc<Self>,
        task_id: &str,
        source: &std::path::Path,
        credential: &ApiKey,
        request: &GenerateRequest,
        window: (Percent, Percent),
        cancel: &CancelFlag,
    ) -> CoreResult<Vec<StoredImage>> {
        let config = self.settings.generation_config(
            request.styles.clone(),
            request.count,
            request.concurrency,
        );
        let (sink, reporter) = self.reporter(task_id);
        let result = self
            .coordinator
            .generate(source, credential, &config, &sink.window(window.0, window.1), cancel)
            .await;
        drop(sink);
        let mut stored = finish_reporter(task_id, reporter).await;

        let generated = result?;
        ensure_active(task_id, cancel)?;
        if stored.is_empty() {
            return Err(CoreError::NoImagesGenerated);
        }
        info!(
            task_id = %task_id,
            generated = generated.len(),
            stored = stored.len(),
            "Generated images stored"
        );
        stored.sort_by_key(|image| image.sequence_index);
        Ok(stored)
    }

    async fn run_compose(
        self: &Arc<Self>,
        task_id: &str,
        request: &ComposeRequest,
        window: (Percent, Percent),
        cancel: &CancelFlag,
    ) -> CoreResult<ComposedVideo> {
        ensure_active(task_id, cancel)?;
        let composer = self.require_composer()?;
        let (sink, reporter) = self.reporter(task_id);
        let result = composer
            .compose(task_id, request, &sink.window(window.0, window.1), cancel)
            .await;
        drop(sink);
        finish_reporter(task_id, reporter).await;
        result
    }

    async fn finish_video(&self, task_id: &str, video: ComposedVideo) -> CoreResult<()> {
        let path = video.path.clone();
        self.tasks
            .mutate(
                task_id,
                Box::new(move |record: &mut TaskRecord| {
                    record.video_path = Some(path);
                    record.status = TaskStatus::Completed;
                    record.message = "Video ready".to_string();
                    record.progress = 100.0;
                }),
            )
            .await?;
        info!(
            task_id = %task_id,
            path = %video.path.display(),
            size_bytes = video.size_bytes,
            frames = video.frame_count,
            has_audio = video.has_audio,
            "Video ready"
        );
        Ok(())
    }

    async fn fail(&self, task_id: &str, err: &CoreError) {
        error!(task_id = %task_id, "Task failed: {}", err);
        let message = err.to_string();
        let result = self
            .tasks
            .mutate(
                task_id,
                Box::new(move |record: &mut TaskRecord| {
                    record.status = TaskStatus::Failed;
                    record.message = message.clone();
                    record.error = Some(message);
                }),
            )
            .await;
        if let Err(e) = result {
            debug!(task_id = %task_id, "Failure not recorded: {}", e);
        }
    }

    /// Event channel for one phase, drained into the task record
    fn reporter(
        self: &Arc<Self>,
        task_id: &str,
    ) -> (EventSink, tokio::task::JoinHandle<Vec<StoredImage>>) {
        let (sink, rx) = event_channel(EVENT_CHANNEL_CAPACITY);
        let handle = tokio::spawn(consume_events(Arc::clone(self), task_id.to_string(), rx));
        (sink, handle)
    }
}

async fn finish_reporter(
    task_id: &str,
    reporter: tokio::task::JoinHandle<Vec<StoredImage>>,
) -> Vec<StoredImage> {
    reporter.await.unwrap_or_else(|e| {
        error!(task_id = %task_id, "Event reporter terminated abnormally: {}", e);
        Vec::new()
    })
}

/// Drains one phase's events until every sink clone is dropped
async fn consume_events(
    inner: Arc<ServiceInner>,
    task_id: TaskId,
    mut rx: mpsc::Receiver<PipelineEvent>,
) -> Vec<StoredImage> {
    let mut stored = Vec::new();
    while let Some(event) = rx.recv().await {
        match event {
            PipelineEvent::ImageReady(image) => match inner.media.save_generated_image(&image).await
            {
                Ok(saved) => {
                    let entry = saved.clone();
                    let appended = inner
                        .tasks
                        .mutate(&task_id, Box::new(move |record: &mut TaskRecord| record.images.push(entry)))
                        .await;
                    if let Err(e) = appended {
                        warn!(task_id = %task_id, "Image not added to task: {}", e);
                    }
                    debug!(task_id = %task_id, style = %saved.style, "Image stored");
                    stored.push(saved);
                }
                Err(e) => warn!(
                    task_id = %task_id,
                    style = %image.style,
                    "Failed to store generated image: {}",
                    e
                ),
            },
            PipelineEvent::ProgressUpdate { percent, message } => {
                inner.report(&task_id, percent, &message).await;
            }
            PipelineEvent::StageComplete { stage, percent } => {
                debug!(task_id = %task_id, stage = %stage, percent, "Stage complete");
            }
        }
    }
    stored
}

fn ensure_active(task_id: &str, cancel: &CancelFlag) -> CoreResult<()> {
    if cancel.is_cancelled() {
        return Err(CoreError::Cancelled(task_id.to_string()));
    }
    Ok(())
}

/// Paths of `ids` in request order; every ID must be one of the task's images
fn select_owned_images(task: &TaskRecord, ids: &[FileId]) -> CoreResult<Vec<PathBuf>> {
    if ids.is_empty() {
        return Err(CoreError::ValidationError(
            "At least one image must be selected".to_string(),
        ));
    }
    ids.iter()
        .map(|id| {
            task.images
                .iter()
                .find(|image| &image.file_id == id)
                .map(|image| image.path.clone())
                .ok_or_else(|| {
                    CoreError::ValidationError(format!(
                        "Image {id} does not belong to task {}",
                        task.id
                    ))
                })
        })
        .collect()
}
