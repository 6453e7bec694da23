//! Encoder Pipeline
//!
//! Runs one compose task through its stages, strictly in sequence:
//!
//! | stage            | local window | notes                                   |
//! |------------------|--------------|-----------------------------------------|
//! | prepare          | 0 ~ 10       | working directory                       |
//! | sequencing       | 10 ~ 40      | frame files                             |
//! | assembly         | 40 ~ 65      | segments (split evenly) or concat       |
//! | transition merge | 65 ~ 70      | chained `xfade`, skipped for one frame  |
//! | audio mux        | 70 ~ 90      | falls back to video-only on failure     |
//! | finalize         | 90 ~ 100     | copy into `videos/`                     |
//!
//! The working directory `<storage>/temp/task_<id>` is removed after a
//! successful run unless `retain_work_dirs` is set. Failed runs keep it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::sequencer::build_sequence;
use super::{ComposeRequest, ComposedVideo, EncodeStage};
use crate::core::ffmpeg::{
    detect_ffmpeg, AudioMux, ConcatAssembly, EncoderCommand, EncoderInvocation, EncodingProfile,
    FFmpegRunner, SegmentEncode, TransitionMerge, TransitionPlan,
};
use crate::core::fs::{remove_dir_logged, task_work_dir};
use crate::core::settings::AppSettings;
use crate::core::tasks::{CancelFlag, EventSink, PipelineStage};
use crate::core::{CoreError, CoreResult};

const PREPARE: (f64, f64) = (0.0, 10.0);
const SEQUENCING: (f64, f64) = (10.0, 40.0);
const ASSEMBLY: (f64, f64) = (40.0, 65.0);
const TRANSITION_MERGE: (f64, f64) = (65.0, 70.0);
const AUDIO_MUX: (f64, f64) = (70.0, 90.0);
const FINALIZE: (f64, f64) = (90.0, 100.0);

/// Storage layout, quality and timeouts used by [`VideoComposer`]
#[derive(Debug, Clone)]
pub struct ComposerSettings {
    pub storage_root: PathBuf,
    pub retain_work_dirs: bool,
    pub profile: EncodingProfile,
    pub probe_timeout: Duration,
    pub encode_timeout: Duration,
    pub mux_timeout: Duration,
}

impl ComposerSettings {
    pub fn from_settings(settings: &AppSettings) -> Self {
        Self {
            storage_root: settings.storage.root_dir.clone(),
            retain_work_dirs: settings.storage.retain_work_dirs,
            profile: settings.encoder.profile(),
            probe_timeout: settings.encoder.probe_timeout(),
            encode_timeout: settings.encoder.encode_timeout(),
            mux_timeout: settings.encoder.mux_timeout(),
        }
    }
}

/// Composes slideshow videos with ffmpeg
#[derive(Clone)]
pub struct VideoComposer {
    runner: FFmpegRunner,
    settings: ComposerSettings,
}

impl VideoComposer {
    pub fn new(runner: FFmpegRunner, settings: ComposerSettings) -> Self {
        Self { runner, settings }
    }

    /// Locates ffmpeg (configured path first) and builds a composer
    pub async fn detect(settings: &AppSettings) -> CoreResult<Self> {
        let info = detect_ffmpeg(settings.encoder.ffmpeg_path.as_deref()).await?;
        Ok(Self::new(
            FFmpegRunner::new(info),
            ComposerSettings::from_settings(settings),
        ))
    }

    pub fn runner(&self) -> &FFmpegRunner {
        &self.runner
    }

    pub fn settings(&self) -> &ComposerSettings {
        &self.settings
    }

    pub fn work_dir(&self, task_id: &str) -> CoreResult<PathBuf> {
        task_work_dir(&self.settings.storage_root, task_id)
    }

    /// `<storage>/videos/stylized_video_<task_id>.mp4`
    pub fn output_path(&self, task_id: &str) -> PathBuf {
        self.settings
            .storage_root
            .join("videos")
            .join(format!("stylized_video_{task_id}.mp4"))
    }

    /// Runs every stage for `task_id`. Progress is reported through `sink`
    /// as local 0~100; `cancel` is checked between stages.
    pub async fn compose(
        &self,
        task_id: &str,
        request: &ComposeRequest,
        sink: &EventSink,
        cancel: &CancelFlag,
    ) -> CoreResult<ComposedVideo> {
        request.config.validate()?;
        let work_dir = self.work_dir(task_id)?;

        let mut run = ComposeRun {
            composer: self,
            task_id,
            request,
            sink,
            cancel,
            work_dir: &work_dir,
            stage: EncodeStage::Sequencing,
        };
        let result = run.execute().await;

        match &result {
            Ok(video) => {
                run.advance(EncodeStage::Done);
                info!(
                    task_id,
                    path = %video.path.display(),
                    frames = video.frame_count,
                    "Video composed"
                );
                if self.settings.retain_work_dirs {
                    debug!(task_id, dir = %work_dir.display(), "Keeping working directory");
                } else {
                    remove_dir_logged(&work_dir).await;
                }
            }
            Err(e) => {
                warn!(
                    task_id,
                    stage = %run.stage,
                    dir = %work_dir.display(),
                    "Compose failed, keeping working directory: {}",
                    e
                );
                run.advance(EncodeStage::Failed);
            }
        }
        result
    }
}

/// State of one compose call
struct ComposeRun<'a> {
    composer: &'a VideoComposer,
    task_id: &'a str,
    request: &'a ComposeRequest,
    sink: &'a EventSink,
    cancel: &'a CancelFlag,
    work_dir: &'a Path,
    stage: EncodeStage,
}

impl ComposeRun<'_> {
    fn advance(&mut self, next: EncodeStage) {
        if self.stage.can_advance_to(next) {
            debug!(task_id = self.task_id, from = %self.stage, to = %next, "Compose stage");
            self.stage = next;
        }
    }

    fn window(&self, (start, end): (f64, f64)) -> EventSink {
        self.sink.window(start, end)
    }

    fn ensure_not_cancelled(&self) -> CoreResult<()> {
        if self.cancel.is_cancelled() {
            Err(CoreError::Cancelled(self.task_id.to_string()))
        } else {
            Ok(())
        }
    }

    async fn execute(&mut self) -> CoreResult<ComposedVideo> {
        let composer = self.composer;
        let request = self.request;
        let settings = &composer.settings;
        let config = &request.config;

        // Prepare
        let prepare = self.window(PREPARE);
        tokio::fs::create_dir_all(self.work_dir).await?;
        prepare.checkpoint(100.0, "Working directory ready").await;

        // Sequencing
        self.ensure_not_cancelled()?;
        let sequencing = self.window(SEQUENCING);
        sequencing.checkpoint(0.0, "Preparing frames").await;
        let frames = build_sequence(
            &request.original,
            &request.images,
            config,
            &self.work_dir.join("frames"),
            &sequencing,
        )
        .await?;
        sequencing.stage_complete(PipelineStage::Sequencing).await;
        let frame_paths: Vec<PathBuf> = frames.iter().map(|f| f.output_path.clone()).collect();

        // Assembly
        self.ensure_not_cancelled()?;
        self.advance(EncodeStage::Assembling);
        let assembly = self.window(ASSEMBLY);
        let merge = self.window(TRANSITION_MERGE);
        let video_only = if frame_paths.len() == 1 {
            let output = self.work_dir.join("single_frame.mp4");
            let command = SegmentEncode {
                image: frame_paths[0].clone(),
                seconds: config.per_slide_seconds,
                fps: config.fps,
                size: config.size(),
                profile: settings.profile.clone(),
                output,
            };
            self.run_command(&command, settings.encode_timeout, &assembly)
                .await?;
            assembly.stage_complete(PipelineStage::Assembly).await;
            merge.checkpoint(100.0, "Single frame, no transitions").await;
            command.output
        } else if config.use_transitions {
            let segments = self.encode_segments(&frame_paths, &assembly).await?;
            assembly.stage_complete(PipelineStage::Assembly).await;

            self.ensure_not_cancelled()?;
            self.advance(EncodeStage::TransitionMerging);
            let plan = TransitionPlan::new(
                config.transition_kinds.clone(),
                config.transition_seconds,
                config.per_slide_seconds,
                segments.len(),
            );
            debug!(task_id = self.task_id, offsets = ?plan.offsets(), "Transition plan");
            let command = TransitionMerge {
                segments,
                plan,
                fps: config.fps,
                profile: settings.profile.clone(),
                output: self.work_dir.join("merged.mp4"),
            };
            self.run_command(&command, settings.encode_timeout, &merge)
                .await?;
            merge.stage_complete(PipelineStage::TransitionMerge).await;
            command.output
        } else {
            let command = ConcatAssembly {
                frames: frame_paths.clone(),
                list_file: self.work_dir.join("frames.txt"),
                seconds_per_frame: config.per_slide_seconds,
                fps: config.fps,
                profile: settings.profile.clone(),
                output: self.work_dir.join("assembled.mp4"),
            };
            tokio::fs::write(&command.list_file, command.list_contents()).await?;
            self.run_command(&command, settings.encode_timeout, &assembly)
                .await?;
            assembly.stage_complete(PipelineStage::Assembly).await;
            merge.checkpoint(100.0, "Cuts without transitions").await;
            command.output
        };

        // Audio mux
        self.ensure_not_cancelled()?;
        self.advance(EncodeStage::AudioMuxing);
        let mux = self.window(AUDIO_MUX);
        let (final_source, has_audio) = match &request.audio {
            Some(audio) => match self.mux_audio(&video_only, audio, &mux).await {
                Ok(muxed) => (muxed, true),
                Err(e) => {
                    warn!(
                        task_id = self.task_id,
                        "Audio mux failed, using video-only output: {}",
                        e
                    );
                    (video_only, false)
                }
            },
            None => (video_only, false),
        };
        mux.stage_complete(PipelineStage::AudioMux).await;

        // Finalize
        let finalize = self.window(FINALIZE);
        let destination = composer.output_path(self.task_id);
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&final_source, &destination).await?;
        let size_bytes = tokio::fs::metadata(&destination).await?.len();
        if size_bytes == 0 {
            return Err(CoreError::EncoderProcessFailure(format!(
                "final video is empty: {}",
                destination.display()
            )));
        }
        finalize.stage_complete(PipelineStage::Finalize).await;

        Ok(ComposedVideo {
            task_id: self.task_id.to_string(),
            path: destination,
            size_bytes,
            frame_count: frame_paths.len(),
            has_audio,
        })
    }

    /// One segment per frame; the assembly window is split evenly between them
    async fn encode_segments(
        &self,
        frames: &[PathBuf],
        assembly: &EventSink,
    ) -> CoreResult<Vec<PathBuf>> {
        let settings = &self.composer.settings;
        let config = &self.request.config;
        let share = 100.0 / frames.len() as f64;
        let mut segments = Vec::with_capacity(frames.len());

        for (index, frame) in frames.iter().enumerate() {
            self.ensure_not_cancelled()?;
            let command = SegmentEncode {
                image: frame.clone(),
                seconds: config.per_slide_seconds,
                fps: config.fps,
                size: config.size(),
                profile: settings.profile.clone(),
                output: self
                    .work_dir
                    .join("segments")
                    .join(format!("segment_{index:03}.mp4")),
            };
            let window = assembly.window(index as f64 * share, (index + 1) as f64 * share);
            self.run_command(&command, settings.encode_timeout, &window)
                .await?;
            segments.push(command.output);
        }
        Ok(segments)
    }

    async fn mux_audio(&self, video: &Path, audio: &Path, mux: &EventSink) -> CoreResult<PathBuf> {
        let settings = &self.composer.settings;
        let duration = match self
            .composer
            .runner
            .probe_duration(video, settings.probe_timeout)
            .await
        {
            Ok(duration) => duration,
            Err(e) => {
                warn!("Video duration probe failed, muxing with -shortest: {}", e);
                None
            }
        };
        let command = AudioMux {
            video: video.to_path_buf(),
            audio: audio.to_path_buf(),
            duration,
            profile: settings.profile.clone(),
            output: self.work_dir.join("with_audio.mp4"),
        };
        let invocation = EncoderInvocation::from_command(&command, settings.mux_timeout)?;
        let result = self.composer.runner.run(&invocation, Some(mux)).await?;
        if !result.exited_cleanly() {
            return Err(CoreError::EncoderProcessFailure(format!(
                "audio mux exited with {:?}",
                result.exit_code
            )));
        }
        Ok(command.output)
    }

    /// Runs one invocation. Output left behind by a failed exit is only kept
    /// when a duration probe can read it.
    async fn run_command(
        &self,
        command: &dyn EncoderCommand,
        timeout: Duration,
        sink: &EventSink,
    ) -> CoreResult<()> {
        let invocation = EncoderInvocation::from_command(command, timeout)?;
        let result = self.composer.runner.run(&invocation, Some(sink)).await?;
        if result.exited_cleanly() {
            return Ok(());
        }

        let probed = self
            .composer
            .runner
            .probe_duration(&result.output, self.composer.settings.probe_timeout)
            .await;
        match probed {
            Ok(Some(duration)) if duration > 0.0 => {
                warn!(
                    task_id = self.task_id,
                    label = %invocation.label,
                    code = ?result.exit_code,
                    duration,
                    "Keeping output of failed encoder run after probe"
                );
                sink.checkpoint(100.0, &format!("{} done", invocation.label))
                    .await;
                Ok(())
            }
            _ => Err(CoreError::EncoderProcessFailure(format!(
                "{} exited with {:?} and its output could not be read back",
                invocation.label, result.exit_code
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::compose::VideoConfig;
    use crate::core::tasks::{event_channel, PipelineEvent};
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn composer(root: &Path, ffmpeg: PathBuf, retain: bool) -> VideoComposer {
        let info = crate::core::ffmpeg::FFmpegInfo {
            ffmpeg_path: ffmpeg,
            version: "test".to_string(),
            is_configured: true,
        };
        VideoComposer::new(
            FFmpegRunner::new(info),
            ComposerSettings {
                storage_root: root.to_path_buf(),
                retain_work_dirs: retain,
                profile: EncodingProfile::default(),
                probe_timeout: Duration::from_secs(10),
                encode_timeout: Duration::from_secs(30),
                mux_timeout: Duration::from_secs(30),
            },
        )
    }

    fn write_image(dir: &Path, name: &str, color: [u8; 3]) -> PathBuf {
        let path = dir.join(name);
        RgbImage::from_pixel(48, 32, Rgb(color)).save(&path).unwrap();
        path
    }

    fn request(dir: &Path, generated: usize, audio: Option<PathBuf>) -> ComposeRequest {
        ComposeRequest {
            original: write_image(dir, "original.png", [250, 250, 250]),
            images: (0..generated)
                .map(|i| write_image(dir, &format!("style_{i}.png"), [40 * i as u8, 0, 0]))
                .collect(),
            audio,
            config: VideoConfig {
                width: 64,
                height: 48,
                fps: 10,
                per_slide_seconds: 1.0,
                transition_seconds: 0.25,
                ..Default::default()
            },
        }
    }

    fn drain(rx: &mut tokio::sync::mpsc::Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_paths() {
        let composer = composer(Path::new("/srv/stylize"), PathBuf::from("ffmpeg"), false);
        assert_eq!(
            composer.output_path("abc"),
            PathBuf::from("/srv/stylize/videos/stylized_video_abc.mp4")
        );
        assert_eq!(
            composer.work_dir("abc").unwrap(),
            PathBuf::from("/srv/stylize/temp/task_abc")
        );
        assert!(composer.work_dir("../abc").is_err());
    }

    #[tokio::test]
    async fn test_invalid_config_fails_before_any_work() {
        let root = TempDir::new().unwrap();
        let inputs = TempDir::new().unwrap();
        let composer = composer(root.path(), PathBuf::from("ffmpeg"), false);
        let mut req = request(inputs.path(), 1, None);
        req.config.transition_seconds = 5.0;
        let result = composer
            .compose("t1", &req, &EventSink::disconnected(), &CancelFlag::new())
            .await;
        assert!(matches!(result, Err(CoreError::ValidationError(_))));
        assert!(!root.path().join("temp").exists());
    }

    #[tokio::test]
    async fn test_cancelled_before_sequencing() {
        let root = TempDir::new().unwrap();
        let inputs = TempDir::new().unwrap();
        let composer = composer(root.path(), PathBuf::from("ffmpeg"), false);
        let cancel = CancelFlag::new();
        cancel.cancel();
        let result = composer
            .compose(
                "t2",
                &request(inputs.path(), 2, None),
                &EventSink::disconnected(),
                &cancel,
            )
            .await;
        assert!(matches!(result, Err(CoreError::Cancelled(_))));
    }

    /// Stand-in encoder scripts; the last argument is always the output
    #[cfg(unix)]
    mod fake_encoder {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        const WRITE_OUTPUT: &str = r#"#!/bin/sh
for last; do :; done
if [ "$last" = "-" ]; then
  echo "  Duration: 00:00:02.50, start: 0.000000, bitrate: 100 kb/s" >&2
  exit 0
fi
FAIL_ON
printf 'frame=5\nout_time_us=500000\nprogress=continue\n'
printf 'fake video' > "$last"
"#;

        fn install(dir: &Path, fail_on: &str) -> PathBuf {
            install_script(dir, &WRITE_OUTPUT.replace("FAIL_ON", fail_on))
        }

        fn install_script(dir: &Path, script: &str) -> PathBuf {
            let path = dir.join("fake-ffmpeg");
            std::fs::write(&path, script).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn stages(events: &[PipelineEvent]) -> Vec<PipelineStage> {
            events
                .iter()
                .filter_map(|e| match e {
                    PipelineEvent::StageComplete { stage, .. } => Some(*stage),
                    _ => None,
                })
                .collect()
        }

        #[tokio::test]
        async fn test_crossfade_path_with_audio() {
            let root = TempDir::new().unwrap();
            let inputs = TempDir::new().unwrap();
            let ffmpeg = install(inputs.path(), ":");
            let audio = inputs.path().join("track.mp3");
            std::fs::write(&audio, b"audio").unwrap();
            let composer = composer(root.path(), ffmpeg, false);

            let (sink, mut rx) = event_channel(512);
            let video = composer
                .compose("t3", &request(inputs.path(), 2, Some(audio)), &sink, &CancelFlag::new())
                .await
                .unwrap();

            assert_eq!(video.frame_count, 3);
            assert!(video.has_audio);
            assert_eq!(video.path, composer.output_path("t3"));
            assert_eq!(std::fs::read(&video.path).unwrap(), b"fake video");
            assert!(!composer.work_dir("t3").unwrap().exists());

            let events = drain(&mut rx);
            assert_eq!(
                stages(&events),
                vec![
                    PipelineStage::Sequencing,
                    PipelineStage::Assembly,
                    PipelineStage::TransitionMerge,
                    PipelineStage::AudioMux,
                    PipelineStage::Finalize,
                ]
            );
            let progress: Vec<f64> = events
                .iter()
                .filter_map(|e| match e {
                    PipelineEvent::ProgressUpdate { percent, .. } => Some(*percent),
                    _ => None,
                })
                .collect();
            assert!(progress.windows(2).all(|w| w[0] <= w[1]));
            assert_eq!(progress.last().copied(), Some(100.0));
        }

        #[tokio::test]
        async fn test_work_dir_retained_when_configured() {
            let root = TempDir::new().unwrap();
            let inputs = TempDir::new().unwrap();
            let ffmpeg = install(inputs.path(), ":");
            let composer = composer(root.path(), ffmpeg, true);
            let mut req = request(inputs.path(), 2, None);
            req.config.use_transitions = false;

            let video = composer
                .compose("t4", &req, &EventSink::disconnected(), &CancelFlag::new())
                .await
                .unwrap();
            assert!(!video.has_audio);

            let work_dir = composer.work_dir("t4").unwrap();
            let list = std::fs::read_to_string(work_dir.join("frames.txt")).unwrap();
            assert_eq!(list.matches("file '").count(), 4);
            assert!(work_dir.join("frames").join("frame_0002.jpg").is_file());
        }

        #[tokio::test]
        async fn test_encoder_failure_keeps_work_dir() {
            let root = TempDir::new().unwrap();
            let inputs = TempDir::new().unwrap();
            let ffmpeg = install(inputs.path(), "echo 'Conversion failed!' >&2; exit 1");
            let composer = composer(root.path(), ffmpeg, false);

            let result = composer
                .compose(
                    "t5",
                    &request(inputs.path(), 1, None),
                    &EventSink::disconnected(),
                    &CancelFlag::new(),
                )
                .await;
            match result {
                Err(CoreError::EncoderProcessFailure(msg)) => {
                    assert!(msg.contains("Conversion failed!"))
                }
                other => panic!("unexpected result: {other:?}"),
            }
            assert!(composer.work_dir("t5").unwrap().join("frames").is_dir());
            assert!(!composer.output_path("t5").exists());
        }

        #[tokio::test]
        async fn test_mux_failure_falls_back_to_video_only() {
            let root = TempDir::new().unwrap();
            let inputs = TempDir::new().unwrap();
            let ffmpeg = install(
                inputs.path(),
                r#"case "$*" in *-stream_loop*) exit 1;; esac"#,
            );
            let audio = inputs.path().join("track.mp3");
            std::fs::write(&audio, b"audio").unwrap();
            let composer = composer(root.path(), ffmpeg, false);

            let video = composer
                .compose(
                    "t6",
                    &request(inputs.path(), 0, Some(audio)),
                    &EventSink::disconnected(),
                    &CancelFlag::new(),
                )
                .await
                .unwrap();
            assert_eq!(video.frame_count, 1);
            assert!(!video.has_audio);
            assert!(video.path.is_file());
        }

        #[tokio::test]
        async fn test_truncated_mux_output_falls_back_to_video_only() {
            let root = TempDir::new().unwrap();
            let inputs = TempDir::new().unwrap();
            let ffmpeg = install(
                inputs.path(),
                r#"case "$*" in *-stream_loop*) printf 'trunc' > "$last"; exit 1;; esac"#,
            );
            let audio = inputs.path().join("track.mp3");
            std::fs::write(&audio, b"audio").unwrap();
            let composer = composer(root.path(), ffmpeg, false);

            let video = composer
                .compose(
                    "t7",
                    &request(inputs.path(), 1, Some(audio)),
                    &EventSink::disconnected(),
                    &CancelFlag::new(),
                )
                .await
                .unwrap();
            assert!(!video.has_audio);
            assert_eq!(std::fs::read(&video.path).unwrap(), b"fake video");
        }

        #[tokio::test]
        async fn test_unreadable_output_of_failed_assembly_is_rejected() {
            let root = TempDir::new().unwrap();
            let inputs = TempDir::new().unwrap();
            let ffmpeg = install_script(
                inputs.path(),
                r#"#!/bin/sh
for last; do :; done
if [ "$last" = "-" ]; then
  echo "moov atom not found" >&2
  exit 1
fi
printf 'trunc' > "$last"
exit 1
"#,
            );
            let composer = composer(root.path(), ffmpeg, false);
            let mut req = request(inputs.path(), 2, None);
            req.config.use_transitions = false;

            let result = composer
                .compose("t8", &req, &EventSink::disconnected(), &CancelFlag::new())
                .await;
            match result {
                Err(CoreError::EncoderProcessFailure(msg)) => {
                    assert!(msg.contains("could not be read back"), "{msg}")
                }
                other => panic!("unexpected result: {other:?}"),
            }
            assert!(!composer.output_path("t8").exists());
            assert!(composer.work_dir("t8").unwrap().join("assembled.mp4").is_file());
        }

        #[tokio::test]
        async fn test_readable_output_of_failed_assembly_is_kept() {
            let root = TempDir::new().unwrap();
            let inputs = TempDir::new().unwrap();
            let ffmpeg = install_script(
                inputs.path(),
                r#"#!/bin/sh
for last; do :; done
if [ "$last" = "-" ]; then
  echo "  Duration: 00:00:03.00, start: 0.000000, bitrate: 100 kb/s" >&2
  exit 0
fi
printf 'fake video' > "$last"
exit 1
"#,
            );
            let composer = composer(root.path(), ffmpeg, false);
            let mut req = request(inputs.path(), 2, None);
            req.config.use_transitions = false;

            let video = composer
                .compose("t9", &req, &EventSink::disconnected(), &CancelFlag::new())
                .await
                .unwrap();
            assert_eq!(std::fs::read(&video.path).unwrap(), b"fake video");
        }
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn test_compose_future_is_send() {
        let root = TempDir::new().unwrap();
        let composer = composer(root.path(), PathBuf::from("ffmpeg"), false);
        let req = request(root.path(), 1, None);
        let sink = EventSink::disconnected();
        let cancel = CancelFlag::new();
        let future = composer.compose("send", &req, &sink, &cancel);
        assert_send(&future);
    }

    /// Runs the real encoder when one is installed
    #[tokio::test]
    async fn test_short_audio_is_looped_to_video_length() {
        let Ok(info) = detect_ffmpeg(None).await else {
            eprintln!("ffmpeg not found, skipping");
            return;
        };
        let root = TempDir::new().unwrap();
        let inputs = TempDir::new().unwrap();
        let runner = FFmpegRunner::new(info.clone());

        let audio = inputs.path().join("tone.m4a");
        let status = tokio::process::Command::new(&info.ffmpeg_path)
            .args(["-hide_banner", "-v", "error", "-y", "-f", "lavfi", "-i"])
            .arg("sine=frequency=440:duration=1")
            .args(["-c:a", "aac"])
            .arg(&audio)
            .status()
            .await
            .unwrap();
        assert!(status.success());

        let composer = VideoComposer::new(
            runner.clone(),
            ComposerSettings {
                storage_root: root.path().to_path_buf(),
                retain_work_dirs: false,
                profile: EncodingProfile::default(),
                probe_timeout: Duration::from_secs(60),
                encode_timeout: Duration::from_secs(120),
                mux_timeout: Duration::from_secs(120),
            },
        );
        let mut req = request(inputs.path(), 1, Some(audio));
        req.config.per_slide_seconds = 2.0;
        req.config.transition_seconds = 0.5;

        let video = composer
            .compose("real", &req, &EventSink::disconnected(), &CancelFlag::new())
            .await
            .unwrap();
        assert!(video.has_audio);

        let duration = runner
            .probe_duration(&video.path, Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        // Two 2s segments joined by a 0.5s crossfade
        assert!((duration - 3.5).abs() < 0.2, "duration was {duration}");
    }
}
