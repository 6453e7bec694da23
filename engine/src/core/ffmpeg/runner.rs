//! FFmpeg Runner
//!
//! Executes encoder invocations with a hard wall-clock timeout, drains both
//! output pipes concurrently, turns progress markers into local percentages
//! and validates the output file afterwards.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

use super::builder::{DurationProbe, EncoderCommand};
use super::progress::{parse_duration_line, parse_progress_marker, ProgressEstimate, ProgressMarker};
use super::{FFmpegError, FFmpegInfo, FFmpegResult};
use crate::core::process::piped_command;
use crate::core::tasks::EventSink;

/// Bytes of stderr kept for failure messages
const STDERR_TAIL_BYTES: usize = 4096;

/// A fully built encoder call
#[derive(Debug, Clone)]
pub struct EncoderInvocation {
    pub label: String,
    pub args: Vec<String>,
    pub output: PathBuf,
    pub timeout: Duration,
    pub estimate: ProgressEstimate,
}

impl EncoderInvocation {
    /// Validates and serializes a command builder
    pub fn from_command(command: &dyn EncoderCommand, timeout: Duration) -> FFmpegResult<Self> {
        Ok(Self {
            label: command.label(),
            args: command.to_args()?,
            output: command.output().to_path_buf(),
            timeout,
            estimate: command.estimate(),
        })
    }
}

/// Result of an invocation that left a non-empty output file.
///
/// A non-zero `exit_code` means the file may be truncated; callers must
/// confirm it before use.
#[derive(Debug, Clone)]
pub struct InvocationOutput {
    pub output: PathBuf,
    pub size_bytes: u64,
    pub exit_code: Option<i32>,
}

impl InvocationOutput {
    pub fn exited_cleanly(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// FFmpeg runner for executing encoder commands
#[derive(Clone)]
pub struct FFmpegRunner {
    info: Arc<FFmpegInfo>,
}

impl FFmpegRunner {
    pub fn new(info: FFmpegInfo) -> Self {
        Self {
            info: Arc::new(info),
        }
    }

    pub fn info(&self) -> &FFmpegInfo {
        &self.info
    }

    /// Run one invocation to completion.
    ///
    /// Local progress reported to `sink` stays within 0~90 while the process
    /// runs; 100 is reported only once the output is confirmed non-empty.
    pub async fn run(
        &self,
        invocation: &EncoderInvocation,
        sink: Option<&EventSink>,
    ) -> FFmpegResult<InvocationOutput> {
        if let Some(parent) = invocation.output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FFmpegError::OutputError(format!("{}: {e}", parent.display())))?;
        }

        debug!(label = %invocation.label, args = ?invocation.args, "Running ffmpeg");

        let mut child = piped_command(&self.info.ffmpeg_path, &invocation.args)
            .spawn()
            .map_err(FFmpegError::ProcessError)?;

        let stdout_task = child.stdout.take().map(|stdout| {
            tokio::spawn(pump_lines(
                stdout,
                invocation.estimate,
                sink.cloned(),
                invocation.label.clone(),
                false,
            ))
        });
        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(pump_lines(
                stderr,
                invocation.estimate,
                sink.cloned(),
                invocation.label.clone(),
                true,
            ))
        });

        let waited = tokio::time::timeout(invocation.timeout, child.wait()).await;

        let status = match waited {
            Ok(status) => status.map_err(FFmpegError::ProcessError)?,
            Err(_) => {
                warn!(
                    label = %invocation.label,
                    timeout_secs = invocation.timeout.as_secs(),
                    "ffmpeg timed out, killing process"
                );
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill timed out ffmpeg: {}", e);
                }
                join_reader(stdout_task).await;
                join_reader(stderr_task).await;
                return Err(FFmpegError::Timeout {
                    label: invocation.label.clone(),
                    seconds: invocation.timeout.as_secs(),
                });
            }
        };

        join_reader(stdout_task).await;
        let stderr_tail = join_reader(stderr_task).await;

        let size_bytes = output_size(&invocation.output).await;
        if size_bytes > 0 {
            if !status.success() {
                warn!(
                    label = %invocation.label,
                    code = ?status.code(),
                    "ffmpeg exited with an error but left an output file"
                );
                return Ok(InvocationOutput {
                    output: invocation.output.clone(),
                    size_bytes,
                    exit_code: status.code(),
                });
            }
            if let Some(sink) = sink {
                sink.checkpoint(100.0, &format!("{} done", invocation.label))
                    .await;
            }
            info!(
                label = %invocation.label,
                output = %invocation.output.display(),
                size_bytes,
                "ffmpeg invocation completed"
            );
            return Ok(InvocationOutput {
                output: invocation.output.clone(),
                size_bytes,
                exit_code: status.code(),
            });
        }

        if !status.success() {
            return Err(FFmpegError::ExecutionFailed(format!(
                "{} exited with {:?}: {}",
                invocation.label,
                status.code(),
                stderr_tail.trim()
            )));
        }

        Err(FFmpegError::EmptyOutput(format!(
            "{}: {}",
            invocation.label,
            invocation.output.display()
        )))
    }

    /// Measures a media file's duration in seconds.
    ///
    /// `Ok(None)` when ffmpeg prints no parseable `Duration:` header.
    pub async fn probe_duration(&self, input: &Path, timeout: Duration) -> FFmpegResult<Option<f64>> {
        let args = DurationProbe {
            input: input.to_path_buf(),
        }
        .to_args()?;
        self.read_duration(&args, timeout).await
    }

    async fn read_duration(&self, args: &[String], timeout: Duration) -> FFmpegResult<Option<f64>> {
        let output = tokio::time::timeout(
            timeout,
            piped_command(&self.info.ffmpeg_path, args).output(),
        )
        .await
        .map_err(|_| FFmpegError::Timeout {
            label: "duration probe".to_string(),
            seconds: timeout.as_secs(),
        })?
        .map_err(FFmpegError::ProcessError)?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        let duration = stderr.lines().find_map(parse_duration_line);
        debug!(?duration, "Probed media duration");
        Ok(duration)
    }
}

async fn output_size(path: &Path) -> u64 {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => 0,
    }
}

async fn join_reader(task: Option<tokio::task::JoinHandle<String>>) -> String {
    match task {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    }
}

/// Reads a pipe to EOF, splitting on both `\n` and `\r` (ffmpeg redraws its
/// stats line with carriage returns). Returns the retained tail when
/// `keep_tail` is set.
async fn pump_lines<R>(
    mut reader: R,
    estimate: ProgressEstimate,
    sink: Option<EventSink>,
    label: String,
    keep_tail: bool,
) -> String
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 4096];
    let mut line: Vec<u8> = Vec::new();
    let mut tail = String::new();
    let mut marker = ProgressMarker::default();

    let mut handle_line = |bytes: &[u8], tail: &mut String| {
        if bytes.is_empty() {
            return;
        }
        let text = String::from_utf8_lossy(bytes);
        if let Some(found) = parse_progress_marker(&text) {
            marker.merge(found);
            if let (Some(sink), Some(local)) = (&sink, estimate.local_percent(&marker)) {
                sink.progress(local, &label);
            }
        } else if keep_tail {
            tail.push_str(text.trim_end());
            tail.push('\n');
            trim_tail(tail);
        }
    };

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for &byte in &buf[..n] {
                    if byte == b'\n' || byte == b'\r' {
                        handle_line(&line, &mut tail);
                        line.clear();
                    } else {
                        line.push(byte);
                    }
                }
            }
            Err(e) => {
                debug!("ffmpeg pipe read failed: {}", e);
                break;
            }
        }
    }
    handle_line(&line, &mut tail);
    tail
}

fn trim_tail(tail: &mut String) {
    if tail.len() <= STDERR_TAIL_BYTES {
        return;
    }
    let mut cut = tail.len() - STDERR_TAIL_BYTES;
    while !tail.is_char_boundary(cut) {
        cut += 1;
    }
    tail.drain(..cut);
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::tasks::{event_channel, PipelineEvent};
    use tempfile::TempDir;

    fn shell_runner() -> FFmpegRunner {
        FFmpegRunner::new(FFmpegInfo {
            ffmpeg_path: PathBuf::from("sh"),
            version: "test".to_string(),
            is_configured: true,
        })
    }

    fn script(output: &Path, body: &str, timeout: Duration) -> EncoderInvocation {
        EncoderInvocation {
            label: "test encode".to_string(),
            args: vec!["-c".to_string(), body.to_string()],
            output: output.to_path_buf(),
            timeout,
            estimate: ProgressEstimate {
                total_seconds: None,
                total_frames: Some(90),
            },
        }
    }

    #[tokio::test]
    async fn test_zero_byte_output_is_a_failure() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out.mp4");
        let inv = script(&out, &format!(": > '{}'", out.display()), Duration::from_secs(5));
        let result = shell_runner().run(&inv, None).await;
        assert!(matches!(result, Err(FFmpegError::EmptyOutput(_))));
    }

    #[tokio::test]
    async fn test_missing_output_with_error_exit_keeps_stderr() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out.mp4");
        let inv = script(&out, "echo 'Invalid argument' 1>&2; exit 1", Duration::from_secs(5));
        match shell_runner().run(&inv, None).await {
            Err(FFmpegError::ExecutionFailed(msg)) => {
                assert!(msg.contains("Invalid argument"));
                assert!(msg.contains("test encode"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_error_exit_with_output_is_reported_unclean() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out.mp4");
        let body = format!("printf 'video' > '{}'; exit 1", out.display());
        let result = shell_runner()
            .run(&script(&out, &body, Duration::from_secs(5)), None)
            .await
            .unwrap();
        assert_eq!(result.size_bytes, 5);
        assert_eq!(result.exit_code, Some(1));
        assert!(!result.exited_cleanly());
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out.mp4");
        let started = std::time::Instant::now();
        let result = shell_runner()
            .run(&script(&out, "sleep 30", Duration::from_millis(200)), None)
            .await;
        assert!(matches!(result, Err(FFmpegError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_progress_is_clamped_then_completed() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("nested").join("out.mp4");
        let body = format!(
            "printf 'frame=45\\nprogress=continue\\n'; \
             printf 'frame=  90 fps=30 time=00:00:03.00\\r' 1>&2; \
             printf 'video' > '{}'",
            out.display()
        );
        let (sink, mut rx) = event_channel(16);
        let window = sink.window(40.0, 70.0);
        shell_runner()
            .run(&script(&out, &body, Duration::from_secs(5)), Some(&window))
            .await
            .unwrap();

        let mut values = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let PipelineEvent::ProgressUpdate { percent, .. } = event {
                values.push(percent);
            }
        }
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(values.last().copied(), Some(70.0));
        // Running values never pass 90% of the window
        assert!(values[..values.len() - 1].iter().all(|v| *v <= 67.0));
    }

    #[tokio::test]
    async fn test_read_duration_from_stderr() {
        let args = vec![
            "-c".to_string(),
            "echo '  Duration: 00:00:07.20, start: 0.000000, bitrate: 900 kb/s' 1>&2; exit 1"
                .to_string(),
        ];
        let duration = shell_runner()
            .read_duration(&args, Duration::from_secs(5))
            .await
            .unwrap();
        assert!((duration.unwrap() - 7.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_read_duration_missing_header() {
        let args = vec!["-c".to_string(), "echo 'nothing here' 1>&2".to_string()];
        let duration = shell_runner()
            .read_duration(&args, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(duration, None);
    }

    #[test]
    fn test_trim_tail_keeps_recent_text() {
        let mut tail = "é".repeat(STDERR_TAIL_BYTES);
        tail.push_str("last line");
        trim_tail(&mut tail);
        assert!(tail.len() <= STDERR_TAIL_BYTES);
        assert!(tail.ends_with("last line"));
    }
}
