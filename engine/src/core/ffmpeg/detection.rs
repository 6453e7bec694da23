//! FFmpeg Detection Module
//!
//! Locates the ffmpeg binary and checks that it runs.
//! An explicitly configured path wins over system lookup.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use super::{FFmpegError, FFmpegResult};
use crate::core::process::configure_tokio_command;

/// Upper bound for `ffmpeg -version`
pub const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Information about the ffmpeg installation in use
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FFmpegInfo {
    /// Path to ffmpeg binary
    pub ffmpeg_path: PathBuf,
    /// FFmpeg version string
    pub version: String,
    /// Whether the path came from configuration rather than system lookup
    pub is_configured: bool,
}

/// Resolve and validate ffmpeg.
///
/// Uses `configured` when given (it must exist), otherwise searches common
/// install directories and then `PATH`.
pub async fn detect_ffmpeg(configured: Option<&Path>) -> FFmpegResult<FFmpegInfo> {
    let (ffmpeg_path, is_configured) = match configured {
        Some(path) => {
            if !path.is_file() {
                return Err(FFmpegError::InvalidInput(format!(
                    "configured ffmpeg path does not exist: {}",
                    path.display()
                )));
            }
            (path.to_path_buf(), true)
        }
        None => (which_ffmpeg()?, false),
    };

    let version = get_ffmpeg_version(&ffmpeg_path).await?;
    info!(path = %ffmpeg_path.display(), %version, "FFmpeg detected");

    Ok(FFmpegInfo {
        ffmpeg_path,
        version,
        is_configured,
    })
}

/// Find ffmpeg binary in system PATH
fn which_ffmpeg() -> FFmpegResult<PathBuf> {
    #[cfg(target_os = "windows")]
    let binary_name = "ffmpeg.exe";

    #[cfg(not(target_os = "windows"))]
    let binary_name = "ffmpeg";

    // Try common locations first
    for dir in get_common_ffmpeg_paths() {
        let candidate = dir.join(binary_name);
        if candidate.is_file() {
            debug!(path = %candidate.display(), "Found ffmpeg in common location");
            return Ok(candidate);
        }
    }

    #[cfg(target_os = "windows")]
    let lookup = "where";

    #[cfg(not(target_os = "windows"))]
    let lookup = "which";

    let mut cmd = std::process::Command::new(lookup);
    cmd.arg("ffmpeg");
    crate::core::process::configure_std_command(&mut cmd);
    let output = cmd.output().map_err(|_| FFmpegError::NotFound)?;

    if output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        if let Some(first_line) = stdout.lines().map(str::trim).find(|l| !l.is_empty()) {
            return Ok(PathBuf::from(first_line));
        }
    }

    Err(FFmpegError::NotFound)
}

/// Get common FFmpeg installation paths for the current platform
fn get_common_ffmpeg_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    #[cfg(target_os = "windows")]
    {
        paths.push(PathBuf::from(r"C:\ffmpeg\bin"));
        paths.push(PathBuf::from(r"C:\Program Files\ffmpeg\bin"));

        // Scoop installation
        if let Ok(userprofile) = std::env::var("USERPROFILE") {
            paths.push(PathBuf::from(userprofile).join("scoop").join("shims"));
        }
    }

    #[cfg(target_os = "macos")]
    {
        paths.push(PathBuf::from("/opt/homebrew/bin"));
        paths.push(PathBuf::from("/usr/local/bin"));
    }

    #[cfg(target_os = "linux")]
    {
        paths.push(PathBuf::from("/usr/bin"));
        paths.push(PathBuf::from("/usr/local/bin"));
        paths.push(PathBuf::from("/snap/bin"));
    }

    paths
}

/// Run `ffmpeg -version` under [`VERSION_CHECK_TIMEOUT`] and parse the version
async fn get_ffmpeg_version(ffmpeg_path: &Path) -> FFmpegResult<String> {
    let mut cmd = tokio::process::Command::new(ffmpeg_path);
    cmd.arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    configure_tokio_command(&mut cmd);

    let output = tokio::time::timeout(VERSION_CHECK_TIMEOUT, cmd.output())
        .await
        .map_err(|_| FFmpegError::Timeout {
            label: "ffmpeg -version".to_string(),
            seconds: VERSION_CHECK_TIMEOUT.as_secs(),
        })?
        .map_err(FFmpegError::ProcessError)?;

    if !output.status.success() {
        return Err(FFmpegError::ExecutionFailed(
            "FFmpeg binary is not functional".to_string(),
        ));
    }

    parse_version(&String::from_utf8_lossy(&output.stdout))
}

/// Parse version from first line: "ffmpeg version X.X.X ..."
fn parse_version(output: &str) -> FFmpegResult<String> {
    let first_line = output
        .lines()
        .next()
        .filter(|l| !l.trim().is_empty())
        .ok_or_else(|| FFmpegError::ParseError("Could not parse FFmpeg version".to_string()))?;

    if let Some(version) = first_line
        .strip_prefix("ffmpeg version ")
        .and_then(|rest| rest.split_whitespace().next())
    {
        return Ok(version.to_string());
    }

    Ok(first_line.trim().to_string())
}
