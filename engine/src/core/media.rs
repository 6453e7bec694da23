//! Media Storage
//!
//! Persists uploaded inputs and generated images under the storage root and
//! resolves them back by file ID.
//!
//! Layout: `<root>/uploads/<ulid>.<ext>` and `<root>/generated/<ulid>.<ext>`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::fs::{atomic_write_bytes, validate_local_input_path, validate_path_id_component};
use crate::core::generation::GeneratedImage;
use crate::core::{new_file_id, CoreError, CoreResult, FileId};

const UPLOADS_DIR: &str = "uploads";
const GENERATED_DIR: &str = "generated";

/// A stored file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub file_id: FileId,
    pub path: PathBuf,
}

/// A persisted generated image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredImage {
    pub file_id: FileId,
    pub style: String,
    pub sequence_index: usize,
    pub path: PathBuf,
}

#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Copies a local file into storage
    async fn import(&self, source: &Path) -> CoreResult<StoredFile>;

    /// Path of a stored file
    async fn resolve(&self, file_id: &str) -> CoreResult<PathBuf>;

    async fn save_generated_image(&self, image: &GeneratedImage) -> CoreResult<StoredImage>;
}

/// Filesystem-backed [`MediaStore`]
#[derive(Debug, Clone)]
pub struct LocalMediaStore {
    root: PathBuf,
}

impl LocalMediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn write(&self, dir: &str, extension: &str, bytes: Vec<u8>) -> CoreResult<StoredFile> {
        let file_id = new_file_id();
        let path = self.root.join(dir).join(format!("{file_id}.{extension}"));
        let target = path.clone();
        tokio::task::spawn_blocking(move || atomic_write_bytes(&target, &bytes))
            .await
            .map_err(|e| CoreError::Internal(format!("media write task failed: {e}")))??;
        debug!(file_id = %file_id, path = %path.display(), "Stored media file");
        Ok(StoredFile { file_id, path })
    }

    async fn find_in(&self, dir: &str, file_id: &str) -> CoreResult<Option<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(self.root.join(dir)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.file_stem().and_then(|s| s.to_str()) == Some(file_id) && path.is_file() {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl MediaStore for LocalMediaStore {
    async fn import(&self, source: &Path) -> CoreResult<StoredFile> {
        let source = validate_local_input_path(source, "input file")?;
        let bytes = tokio::fs::read(&source).await?;
        let stored = self.write(UPLOADS_DIR, &extension_of(&source), bytes).await?;
        info!(
            file_id = %stored.file_id,
            source = %source.display(),
            "Imported file"
        );
        Ok(stored)
    }

    async fn resolve(&self, file_id: &str) -> CoreResult<PathBuf> {
        validate_path_id_component(file_id, "fileId")?;
        for dir in [UPLOADS_DIR, GENERATED_DIR] {
            if let Some(path) = self.find_in(dir, file_id).await? {
                return Ok(path);
            }
        }
        Err(CoreError::FileNotFound(format!("fileId {file_id}")))
    }

    async fn save_generated_image(&self, image: &GeneratedImage) -> CoreResult<StoredImage> {
        let stored = self
            .write(GENERATED_DIR, image.file_extension(), image.image_bytes.to_vec())
            .await?;
        Ok(StoredImage {
            file_id: stored.file_id,
            style: image.style.clone(),
            sequence_index: image.sequence_index,
            path: stored.path,
        })
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| "bin".to_string())
}
