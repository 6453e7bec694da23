//! Filesystem helpers.
//!
//! Identifier checks for anything that becomes a path component, input path
//! checks, and crash-tolerant writes for stored media and settings.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::core::{CoreError, CoreResult};

// =============================================================================
// Validation
// =============================================================================

/// Rejects identifiers that could escape their directory once joined into a path.
///
/// Empty values, `..`, separators (`/`, `\`), drive markers (`:`) and control
/// characters are all refused.
pub fn validate_path_id_component(id: &str, label: &str) -> CoreResult<()> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(CoreError::ValidationError(format!("{label} is empty")));
    }
    if trimmed != id {
        return Err(CoreError::ValidationError(format!(
            "{label} has surrounding whitespace"
        )));
    }
    if id.contains("..") || id.contains(['/', '\\', ':']) {
        return Err(CoreError::ValidationError(format!(
            "Invalid {label}: contains path traversal characters"
        )));
    }
    if id.chars().any(char::is_control) {
        return Err(CoreError::ValidationError(format!(
            "Invalid {label}: contains control characters"
        )));
    }
    Ok(())
}

/// Checks that `path` names an existing local file and returns it.
pub fn validate_local_input_path(path: &Path, label: &str) -> CoreResult<PathBuf> {
    let text = path.to_string_lossy();
    if text.trim().is_empty() {
        return Err(CoreError::ValidationError(format!("{label} is empty")));
    }
    if text.contains("://") {
        return Err(CoreError::ValidationError(format!(
            "{label} must be a local file path, not a URL"
        )));
    }
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(path.to_path_buf()),
        Ok(_) => Err(CoreError::ValidationError(format!(
            "{label} is not a file: {}",
            path.display()
        ))),
        Err(_) => Err(CoreError::FileNotFound(format!(
            "{label}: {}",
            path.display()
        ))),
    }
}

// =============================================================================
// Task Working Directories
// =============================================================================

/// `<storage>/temp/task_<task_id>`, after validating the ID
pub fn task_work_dir(storage_root: &Path, task_id: &str) -> CoreResult<PathBuf> {
    validate_path_id_component(task_id, "taskId")?;
    Ok(storage_root.join("temp").join(format!("task_{task_id}")))
}

/// Removes a directory tree, logging instead of failing
pub async fn remove_dir_logged(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", dir.display(), e),
    }
}

// =============================================================================
// Atomic Writes
// =============================================================================

/// Writes `bytes` to a synced sibling temp file, then renames it over `path`.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> CoreResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp = sibling_with_suffix(path, "tmp");
    let written = (|| -> std::io::Result<()> {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        writer.write_all(bytes)?;
        writer.flush()?;
        writer.get_ref().sync_all()
    })();
    if let Err(e) = written {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }

    replace_file(&tmp, path)
}

/// Pretty JSON through [`atomic_write_bytes`]
pub fn atomic_write_json_pretty<T: serde::Serialize>(path: &Path, value: &T) -> CoreResult<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write_bytes(path, &bytes)
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    path.with_file_name(format!(".{name}.{suffix}"))
}

fn replace_file(tmp: &Path, dest: &Path) -> CoreResult<()> {
    if std::fs::rename(tmp, dest).is_ok() {
        return Ok(());
    }

    // Rename over an existing file can fail on Windows; swap through a backup
    let backup = sibling_with_suffix(dest, "bak");
    let _ = std::fs::remove_file(&backup);
    std::fs::rename(dest, &backup)?;
    match std::fs::rename(tmp, dest) {
        Ok(()) => {
            let _ = std::fs::remove_file(&backup);
            Ok(())
        }
        Err(e) => {
            let _ = std::fs::rename(&backup, dest);
            let _ = std::fs::remove_file(tmp);
            Err(CoreError::IoError(e))
        }
    }
}
