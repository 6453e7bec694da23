//! Structured ffmpeg command builders.
//!
//! One type per encoder operation. Each validates its parameters before
//! serializing to an argument vector; no shell string is ever assembled.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::progress::ProgressEstimate;
use super::{FFmpegError, FFmpegResult};
use crate::core::Size2D;

/// Arguments shared by every invocation: overwrite, no stdin, machine-readable progress
const GLOBAL_ARGS: &[&str] = &[
    "-hide_banner",
    "-nostdin",
    "-y",
    "-v",
    "warning",
    "-progress",
    "pipe:1",
];

pub const MAX_FPS: u32 = 120;
pub const MAX_DIMENSION: u32 = 7680;
pub const MIN_DIMENSION: u32 = 16;

// =============================================================================
// Encoding Profile
// =============================================================================

/// Codec and color parameters applied to every encoded video stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodingProfile {
    pub video_codec: String,
    pub pixel_format: String,
    /// Used for colorspace, primaries and transfer characteristics
    pub color_standard: String,
    pub color_range: String,
    pub video_bitrate: String,
    pub preset: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
}

impl Default for EncodingProfile {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            pixel_format: "yuv420p".to_string(),
            color_standard: "bt709".to_string(),
            color_range: "tv".to_string(),
            video_bitrate: "6M".to_string(),
            preset: "medium".to_string(),
            audio_codec: "aac".to_string(),
            audio_bitrate: "192k".to_string(),
        }
    }
}

impl EncodingProfile {
    pub fn validate(&self) -> FFmpegResult<()> {
        for (label, value) in [
            ("video codec", &self.video_codec),
            ("pixel format", &self.pixel_format),
            ("color standard", &self.color_standard),
            ("color range", &self.color_range),
            ("preset", &self.preset),
            ("audio codec", &self.audio_codec),
        ] {
            if value.is_empty()
                || !value
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return Err(FFmpegError::InvalidParameters(format!(
                    "{label} '{value}' is not a valid identifier"
                )));
            }
        }
        validate_bitrate("video bitrate", &self.video_bitrate)?;
        validate_bitrate("audio bitrate", &self.audio_bitrate)?;
        Ok(())
    }

    fn video_args(&self) -> Vec<String> {
        strings(&[
            "-c:v",
            &self.video_codec,
            "-pix_fmt",
            &self.pixel_format,
            "-colorspace",
            &self.color_standard,
            "-color_primaries",
            &self.color_standard,
            "-color_trc",
            &self.color_standard,
            "-color_range",
            &self.color_range,
            "-b:v",
            &self.video_bitrate,
            "-preset",
            &self.preset,
        ])
    }
}

/// Accepts `6M`, `192k`, `2500000`, `1.5M`
fn validate_bitrate(label: &str, value: &str) -> FFmpegResult<()> {
    let digits = value
        .strip_suffix(['k', 'K', 'm', 'M'])
        .unwrap_or(value);
    let valid = !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
        && digits.parse::<f64>().is_ok_and(|v| v > 0.0);
    if valid {
        Ok(())
    } else {
        Err(FFmpegError::InvalidParameters(format!(
            "{label} '{value}' is not a valid bitrate"
        )))
    }
}

// =============================================================================
// Transitions
// =============================================================================

/// ffmpeg `xfade` transition types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    Fade,
    FadeBlack,
    FadeWhite,
    Dissolve,
    WipeLeft,
    WipeRight,
    WipeUp,
    WipeDown,
    SlideLeft,
    SlideRight,
    SlideUp,
    SlideDown,
    SmoothLeft,
    SmoothRight,
    SmoothUp,
    SmoothDown,
    CircleCrop,
    RectCrop,
    CircleOpen,
    CircleClose,
    Radial,
    Distance,
    Pixelize,
}

impl TransitionKind {
    pub fn all() -> &'static [TransitionKind] {
        use TransitionKind::*;
        &[
            Fade,
            FadeBlack,
            FadeWhite,
            Dissolve,
            WipeLeft,
            WipeRight,
            WipeUp,
            WipeDown,
            SlideLeft,
            SlideRight,
            SlideUp,
            SlideDown,
            SmoothLeft,
            SmoothRight,
            SmoothUp,
            SmoothDown,
            CircleCrop,
            RectCrop,
            CircleOpen,
            CircleClose,
            Radial,
            Distance,
            Pixelize,
        ]
    }

    /// Rotation used when the caller supplies no transitions
    pub fn default_rotation() -> Vec<TransitionKind> {
        vec![
            TransitionKind::SlideLeft,
            TransitionKind::SlideRight,
            TransitionKind::SlideUp,
            TransitionKind::SlideDown,
        ]
    }

    /// Name understood by the `xfade` filter
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionKind::Fade => "fade",
            TransitionKind::FadeBlack => "fadeblack",
            TransitionKind::FadeWhite => "fadewhite",
            TransitionKind::Dissolve => "dissolve",
            TransitionKind::WipeLeft => "wipeleft",
            TransitionKind::WipeRight => "wiperight",
            TransitionKind::WipeUp => "wipeup",
            TransitionKind::WipeDown => "wipedown",
            TransitionKind::SlideLeft => "slideleft",
            TransitionKind::SlideRight => "slideright",
            TransitionKind::SlideUp => "slideup",
            TransitionKind::SlideDown => "slidedown",
            TransitionKind::SmoothLeft => "smoothleft",
            TransitionKind::SmoothRight => "smoothright",
            TransitionKind::SmoothUp => "smoothup",
            TransitionKind::SmoothDown => "smoothdown",
            TransitionKind::CircleCrop => "circlecrop",
            TransitionKind::RectCrop => "rectcrop",
            TransitionKind::CircleOpen => "circleopen",
            TransitionKind::CircleClose => "circleclose",
            TransitionKind::Radial => "radial",
            TransitionKind::Distance => "distance",
            TransitionKind::Pixelize => "pixelize",
        }
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransitionKind {
    type Err = String;

    /// Accepts `slideleft`, `slide-left`, `slide_left` and `SlideLeft`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .trim()
            .chars()
            .filter(|c| *c != '-' && *c != '_' && *c != ' ')
            .collect::<String>()
            .to_ascii_lowercase();
        TransitionKind::all()
            .iter()
            .copied()
            .find(|kind| kind.as_str() == key)
            .ok_or_else(|| format!("Unknown transition type: {s}"))
    }
}

/// Pairwise crossfade layout for a list of equal-length segments
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionPlan {
    pub kinds: Vec<TransitionKind>,
    pub transition_seconds: f64,
    pub segment_seconds: f64,
    pub segment_count: usize,
}

impl TransitionPlan {
    /// An empty `kinds` list selects the default rotation
    pub fn new(
        kinds: Vec<TransitionKind>,
        transition_seconds: f64,
        segment_seconds: f64,
        segment_count: usize,
    ) -> Self {
        let kinds = if kinds.is_empty() {
            TransitionKind::default_rotation()
        } else {
            kinds
        };
        Self {
            kinds,
            transition_seconds,
            segment_seconds,
            segment_count,
        }
    }

    pub fn validate(&self) -> FFmpegResult<()> {
        if !(self.segment_seconds.is_finite() && self.segment_seconds > 0.0) {
            return Err(FFmpegError::InvalidParameters(format!(
                "segment duration must be positive, got {}",
                self.segment_seconds
            )));
        }
        if !(self.transition_seconds.is_finite()
            && self.transition_seconds >= 0.0
            && self.transition_seconds < self.segment_seconds)
        {
            return Err(FFmpegError::InvalidParameters(format!(
                "transition duration {} must be in [0, {})",
                self.transition_seconds, self.segment_seconds
            )));
        }
        Ok(())
    }

    pub fn pair_count(&self) -> usize {
        self.segment_count.saturating_sub(1)
    }

    /// Transition used between segment `pair` and `pair + 1`
    pub fn kind_for(&self, pair: usize) -> TransitionKind {
        if self.kinds.is_empty() {
            return TransitionKind::SlideLeft;
        }
        self.kinds[pair % self.kinds.len()]
    }

    /// Time at which the blend into segment `pair + 1` begins
    pub fn offset(&self, pair: usize) -> f64 {
        let step = self.segment_seconds - self.transition_seconds;
        step + pair as f64 * step
    }

    pub fn offsets(&self) -> Vec<f64> {
        (0..self.pair_count()).map(|pair| self.offset(pair)).collect()
    }

    /// Length of the merged video
    pub fn total_seconds(&self) -> f64 {
        if self.segment_count == 0 {
            return 0.0;
        }
        self.segment_count as f64 * self.segment_seconds
            - self.pair_count() as f64 * self.transition_seconds
    }

    /// Chained `xfade` filter graph; the final stream is labelled `[vout]`
    pub fn filter_graph(&self) -> String {
        let pairs = self.pair_count();
        let mut parts = Vec::with_capacity(pairs);
        let mut previous = "0:v".to_string();
        for pair in 0..pairs {
            let label = if pair + 1 == pairs {
                "vout".to_string()
            } else {
                format!("v{}", pair + 1)
            };
            parts.push(format!(
                "[{previous}][{}:v]xfade=transition={}:duration={}:offset={}[{label}]",
                pair + 1,
                self.kind_for(pair),
                fmt_secs(self.transition_seconds),
                fmt_secs(self.offset(pair)),
            ));
            previous = label;
        }
        parts.join(";")
    }
}

// =============================================================================
// Command Trait
// =============================================================================

/// A single encoder invocation that writes one output file
pub trait EncoderCommand: Send + Sync {
    /// Short human-readable name used in logs and errors
    fn label(&self) -> String;

    fn output(&self) -> &Path;

    fn validate(&self) -> FFmpegResult<()>;

    /// Serializes without validating; use [`EncoderCommand::to_args`]
    fn build_args(&self) -> Vec<String>;

    fn estimate(&self) -> ProgressEstimate;

    fn to_args(&self) -> FFmpegResult<Vec<String>> {
        self.validate()?;
        Ok(self.build_args())
    }
}

// =============================================================================
// Concat Assembly
// =============================================================================

/// Back-to-back cuts of still frames through the concat demuxer
#[derive(Debug, Clone)]
pub struct ConcatAssembly {
    pub frames: Vec<PathBuf>,
    pub list_file: PathBuf,
    pub seconds_per_frame: f64,
    pub fps: u32,
    pub profile: EncodingProfile,
    pub output: PathBuf,
}

impl ConcatAssembly {
    /// Concat list: each frame with its duration, the last frame repeated
    /// without one so the demuxer honors the final duration.
    pub fn list_contents(&self) -> String {
        let mut out = String::new();
        for frame in &self.frames {
            out.push_str(&format!("file '{}'\n", escape_concat_path(frame)));
            out.push_str(&format!("duration {}\n", fmt_secs(self.seconds_per_frame)));
        }
        if let Some(last) = self.frames.last() {
            out.push_str(&format!("file '{}'\n", escape_concat_path(last)));
        }
        out
    }
}

impl EncoderCommand for ConcatAssembly {
    fn label(&self) -> String {
        format!("concat assembly of {} frames", self.frames.len())
    }

    fn output(&self) -> &Path {
        &self.output
    }

    fn validate(&self) -> FFmpegResult<()> {
        if self.frames.is_empty() {
            return Err(FFmpegError::InvalidParameters(
                "concat assembly needs at least one frame".to_string(),
            ));
        }
        for frame in &self.frames {
            require_file(frame)?;
        }
        validate_seconds("frame duration", self.seconds_per_frame)?;
        validate_fps(self.fps)?;
        self.profile.validate()
    }

    fn build_args(&self) -> Vec<String> {
        let mut args = strings(GLOBAL_ARGS);
        args.extend(strings(&["-f", "concat", "-safe", "0", "-i"]));
        args.push(path_arg(&self.list_file));
        args.extend(strings(&["-r", &self.fps.to_string()]));
        args.extend(self.profile.video_args());
        args.push(path_arg(&self.output));
        args
    }

    fn estimate(&self) -> ProgressEstimate {
        ProgressEstimate::from_duration(
            self.frames.len() as f64 * self.seconds_per_frame,
            self.fps,
        )
    }
}

fn escape_concat_path(path: &Path) -> String {
    path.to_string_lossy().replace('\'', r"'\''")
}

// =============================================================================
// Segment Encode
// =============================================================================

/// One still frame encoded as a fixed-length clip, scaled and padded to size
#[derive(Debug, Clone)]
pub struct SegmentEncode {
    pub image: PathBuf,
    pub seconds: f64,
    pub fps: u32,
    pub size: Size2D,
    pub profile: EncodingProfile,
    pub output: PathBuf,
}

impl SegmentEncode {
    fn scale_pad_filter(&self) -> String {
        let Size2D { width, height } = self.size;
        format!(
            "scale={width}:{height}:force_original_aspect_ratio=decrease,pad={width}:{height}:(ow-iw)/2:(oh-ih)/2"
        )
    }
}

impl EncoderCommand for SegmentEncode {
    fn label(&self) -> String {
        format!(
            "segment encode of {}",
            self.image
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        )
    }

    fn output(&self) -> &Path {
        &self.output
    }

    fn validate(&self) -> FFmpegResult<()> {
        require_file(&self.image)?;
        validate_seconds("segment duration", self.seconds)?;
        validate_fps(self.fps)?;
        validate_size(self.size)?;
        self.profile.validate()
    }

    fn build_args(&self) -> Vec<String> {
        let mut args = strings(GLOBAL_ARGS);
        args.extend(strings(&["-loop", "1", "-i"]));
        args.push(path_arg(&self.image));
        args.extend(strings(&[
            "-t",
            &fmt_secs(self.seconds),
            "-r",
            &self.fps.to_string(),
            "-vf",
            &self.scale_pad_filter(),
        ]));
        args.extend(self.profile.video_args());
        args.push(path_arg(&self.output));
        args
    }

    fn estimate(&self) -> ProgressEstimate {
        ProgressEstimate::from_duration(self.seconds, self.fps)
    }
}

// =============================================================================
// Transition Merge
// =============================================================================

/// All segments merged through one chained `xfade` filter graph
#[derive(Debug, Clone)]
pub struct TransitionMerge {
    pub segments: Vec<PathBuf>,
    pub plan: TransitionPlan,
    pub fps: u32,
    pub profile: EncodingProfile,
    pub output: PathBuf,
}

impl EncoderCommand for TransitionMerge {
    fn label(&self) -> String {
        format!("transition merge of {} segments", self.segments.len())
    }

    fn output(&self) -> &Path {
        &self.output
    }

    fn validate(&self) -> FFmpegResult<()> {
        if self.segments.len() < 2 {
            return Err(FFmpegError::InvalidParameters(format!(
                "transition merge needs at least two segments, got {}",
                self.segments.len()
            )));
        }
        if self.plan.segment_count != self.segments.len() {
            return Err(FFmpegError::InvalidParameters(format!(
                "transition plan covers {} segments but {} were supplied",
                self.plan.segment_count,
                self.segments.len()
            )));
        }
        for segment in &self.segments {
            require_file(segment)?;
        }
        validate_fps(self.fps)?;
        self.plan.validate()?;
        self.profile.validate()
    }

    fn build_args(&self) -> Vec<String> {
        let mut args = strings(GLOBAL_ARGS);
        for segment in &self.segments {
            args.push("-i".to_string());
            args.push(path_arg(segment));
        }
        args.extend(strings(&[
            "-filter_complex",
            &self.plan.filter_graph(),
            "-map",
            "[vout]",
            "-r",
            &self.fps.to_string(),
        ]));
        args.extend(self.profile.video_args());
        args.push(path_arg(&self.output));
        args
    }

    fn estimate(&self) -> ProgressEstimate {
        ProgressEstimate::from_duration(self.plan.total_seconds(), self.fps)
    }
}

// =============================================================================
// Audio Mux
// =============================================================================

/// Copies the video stream and conforms a looped audio track to its length
#[derive(Debug, Clone)]
pub struct AudioMux {
    pub video: PathBuf,
    pub audio: PathBuf,
    /// Measured video duration; `None` falls back to `-shortest`
    pub duration: Option<f64>,
    pub profile: EncodingProfile,
    pub output: PathBuf,
}

impl EncoderCommand for AudioMux {
    fn label(&self) -> String {
        "audio mux".to_string()
    }

    fn output(&self) -> &Path {
        &self.output
    }

    fn validate(&self) -> FFmpegResult<()> {
        require_file(&self.video)?;
        require_file(&self.audio)?;
        if let Some(duration) = self.duration {
            validate_seconds("mux duration", duration)?;
        }
        self.profile.validate()
    }

    fn build_args(&self) -> Vec<String> {
        let mut args = strings(GLOBAL_ARGS);
        args.push("-i".to_string());
        args.push(path_arg(&self.video));
        args.extend(strings(&["-stream_loop", "-1", "-i"]));
        args.push(path_arg(&self.audio));
        args.extend(strings(&[
            "-map",
            "0:v:0",
            "-map",
            "1:a:0",
            "-c:v",
            "copy",
            "-c:a",
            &self.profile.audio_codec,
            "-b:a",
            &self.profile.audio_bitrate,
        ]));
        match self.duration {
            Some(duration) => args.extend(strings(&["-t", &fmt_secs(duration)])),
            None => args.push("-shortest".to_string()),
        }
        args.push(path_arg(&self.output));
        args
    }

    fn estimate(&self) -> ProgressEstimate {
        ProgressEstimate {
            total_seconds: self.duration,
            total_frames: None,
        }
    }
}

// =============================================================================
// Duration Probe
// =============================================================================

/// Decodes an input to the null muxer so ffmpeg prints its `Duration:` header
#[derive(Debug, Clone)]
pub struct DurationProbe {
    pub input: PathBuf,
}

impl DurationProbe {
    pub fn validate(&self) -> FFmpegResult<()> {
        require_file(&self.input)
    }

    pub fn to_args(&self) -> FFmpegResult<Vec<String>> {
        self.validate()?;
        let mut args = strings(&["-hide_banner", "-nostdin", "-i"]);
        args.push(path_arg(&self.input));
        args.extend(strings(&["-f", "null", "-"]));
        Ok(args)
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Seconds with at most millisecond precision and no trailing zeros
fn fmt_secs(seconds: f64) -> String {
    let text = format!("{seconds:.3}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text.is_empty() || text == "-" {
        "0".to_string()
    } else {
        text.to_string()
    }
}

fn require_file(path: &Path) -> FFmpegResult<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(FFmpegError::InvalidInput(path.display().to_string()))
    }
}

fn validate_seconds(label: &str, seconds: f64) -> FFmpegResult<()> {
    if seconds.is_finite() && seconds > 0.0 {
        Ok(())
    } else {
        Err(FFmpegError::InvalidParameters(format!(
            "{label} must be positive, got {seconds}"
        )))
    }
}

fn validate_fps(fps: u32) -> FFmpegResult<()> {
    if (1..=MAX_FPS).contains(&fps) {
        Ok(())
    } else {
        Err(FFmpegError::InvalidParameters(format!(
            "fps must be within 1..={MAX_FPS}, got {fps}"
        )))
    }
}

fn validate_size(size: Size2D) -> FFmpegResult<()> {
    let in_range = |v: u32| (MIN_DIMENSION..=MAX_DIMENSION).contains(&v) && v % 2 == 0;
    if in_range(size.width) && in_range(size.height) {
        Ok(())
    } else {
        Err(FFmpegError::InvalidParameters(format!(
            "frame size {size} must be even and within {MIN_DIMENSION}..={MAX_DIMENSION}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, b"data").unwrap();
        path
    }

    fn plan(segments: usize) -> TransitionPlan {
        TransitionPlan::new(Vec::new(), 0.6, 3.0, segments)
    }

    #[test]
    fn test_transition_offsets() {
        let offsets = plan(4).offsets();
        assert_eq!(offsets.len(), 3);
        assert!((offsets[0] - 2.4).abs() < 1e-9);
        assert!((offsets[1] - 4.8).abs() < 1e-9);
        assert!((offsets[2] - 7.2).abs() < 1e-9);
    }

    #[test]
    fn test_transition_kinds_rotate() {
        let plan = TransitionPlan::new(
            vec![TransitionKind::Fade, TransitionKind::WipeUp],
            0.5,
            2.0,
            5,
        );
        assert_eq!(plan.kind_for(0), TransitionKind::Fade);
        assert_eq!(plan.kind_for(1), TransitionKind::WipeUp);
        assert_eq!(plan.kind_for(2), TransitionKind::Fade);
        assert_eq!(plan.kind_for(3), TransitionKind::WipeUp);
    }

    #[test]
    fn test_default_rotation_is_slides() {
        let plan = plan(6);
        let kinds: Vec<_> = (0..5).map(|i| plan.kind_for(i).as_str()).collect();
        assert_eq!(
            kinds,
            vec!["slideleft", "slideright", "slideup", "slidedown", "slideleft"]
        );
    }

    #[test]
    fn test_total_seconds_accounts_for_overlap() {
        assert!((plan(4).total_seconds() - 10.2).abs() < 1e-9);
        assert!((plan(1).total_seconds() - 3.0).abs() < 1e-9);
        assert_eq!(plan(0).total_seconds(), 0.0);
    }

    #[test]
    fn test_filter_graph_chains_pairs() {
        assert_eq!(
            plan(3).filter_graph(),
            "[0:v][1:v]xfade=transition=slideleft:duration=0.6:offset=2.4[v1];\
             [v1][2:v]xfade=transition=slideright:duration=0.6:offset=4.8[vout]"
        );
        assert_eq!(
            plan(2).filter_graph(),
            "[0:v][1:v]xfade=transition=slideleft:duration=0.6:offset=2.4[vout]"
        );
    }

    #[test]
    fn test_plan_rejects_transition_longer_than_segment() {
        assert!(TransitionPlan::new(Vec::new(), 3.0, 3.0, 2).validate().is_err());
        assert!(TransitionPlan::new(Vec::new(), -0.1, 3.0, 2).validate().is_err());
        assert!(TransitionPlan::new(Vec::new(), 0.0, 3.0, 2).validate().is_ok());
    }

    #[test]
    fn test_transition_kind_parsing() {
        assert_eq!("slide-left".parse(), Ok(TransitionKind::SlideLeft));
        assert_eq!("SlideRight".parse(), Ok(TransitionKind::SlideRight));
        assert_eq!("circle_open".parse(), Ok(TransitionKind::CircleOpen));
        assert_eq!(" fade ".parse(), Ok(TransitionKind::Fade));
        assert!("spin".parse::<TransitionKind>().is_err());
        for kind in TransitionKind::all() {
            assert_eq!(kind.to_string().parse::<TransitionKind>(), Ok(*kind));
        }
    }

    #[test]
    fn test_fmt_secs() {
        assert_eq!(fmt_secs(2.4), "2.4");
        assert_eq!(fmt_secs(3.0 * 2.4), "7.2");
        assert_eq!(fmt_secs(3.0), "3");
        assert_eq!(fmt_secs(0.0), "0");
        assert_eq!(fmt_secs(7.2004), "7.2");
    }

    #[test]
    fn test_bitrate_validation() {
        assert!(validate_bitrate("v", "6M").is_ok());
        assert!(validate_bitrate("v", "192k").is_ok());
        assert!(validate_bitrate("v", "2500000").is_ok());
        assert!(validate_bitrate("v", "1.5M").is_ok());
        assert!(validate_bitrate("v", "").is_err());
        assert!(validate_bitrate("v", "M").is_err());
        assert!(validate_bitrate("v", "6M; rm -rf").is_err());
        assert!(validate_bitrate("v", "0k").is_err());
    }

    #[test]
    fn test_profile_rejects_injected_codec() {
        let profile = EncodingProfile {
            video_codec: "libx264 -f".to_string(),
            ..Default::default()
        };
        assert!(profile.validate().is_err());
        assert!(EncodingProfile::default().validate().is_ok());
    }

    #[test]
    fn test_segment_encode_args() {
        let dir = TempDir::new().unwrap();
        let image = touch(&dir, "frame_0000.jpg");
        let cmd = SegmentEncode {
            image: image.clone(),
            seconds: 3.0,
            fps: 30,
            size: Size2D::new(1280, 720),
            profile: EncodingProfile::default(),
            output: dir.path().join("segment_000.mp4"),
        };
        let args = cmd.to_args().unwrap();
        let joined = args.join(" ");
        assert!(joined.contains(&format!("-loop 1 -i {}", image.display())));
        assert!(joined.contains("-t 3 -r 30"));
        assert!(joined.contains(
            "scale=1280:720:force_original_aspect_ratio=decrease,pad=1280:720:(ow-iw)/2:(oh-ih)/2"
        ));
        assert!(joined.contains("-c:v libx264 -pix_fmt yuv420p"));
        assert!(joined.contains("-colorspace bt709 -color_primaries bt709 -color_trc bt709"));
        assert!(joined.contains("-color_range tv -b:v 6M -preset medium"));
        assert!(joined.contains("-progress pipe:1"));
        assert_eq!(args.last().unwrap(), &cmd.output.to_string_lossy());
        assert_eq!(cmd.estimate().total_frames, Some(90));
    }

    #[test]
    fn test_segment_encode_rejects_bad_parameters() {
        let dir = TempDir::new().unwrap();
        let image = touch(&dir, "frame.jpg");
        let base = SegmentEncode {
            image,
            seconds: 3.0,
            fps: 30,
            size: Size2D::new(1280, 720),
            profile: EncodingProfile::default(),
            output: dir.path().join("out.mp4"),
        };
        assert!(SegmentEncode { fps: 0, ..base.clone() }.validate().is_err());
        assert!(SegmentEncode { seconds: 0.0, ..base.clone() }.validate().is_err());
        assert!(SegmentEncode { size: Size2D::new(1281, 720), ..base.clone() }.validate().is_err());
        assert!(matches!(
            SegmentEncode { image: dir.path().join("missing.jpg"), ..base.clone() }.validate(),
            Err(FFmpegError::InvalidInput(_))
        ));
        assert!(base.validate().is_ok());
    }

    #[test]
    fn test_concat_list_repeats_last_frame() {
        let dir = TempDir::new().unwrap();
        let a = touch(&dir, "a.jpg");
        let b = touch(&dir, "it's.jpg");
        let cmd = ConcatAssembly {
            frames: vec![a.clone(), b.clone()],
            list_file: dir.path().join("list.txt"),
            seconds_per_frame: 3.0,
            fps: 30,
            profile: EncodingProfile::default(),
            output: dir.path().join("out.mp4"),
        };
        let escaped_b = b.to_string_lossy().replace('\'', r"'\''");
        let expected = format!(
            "file '{}'\nduration 3\nfile '{escaped_b}'\nduration 3\nfile '{escaped_b}'\n",
            a.display()
        );
        assert_eq!(cmd.list_contents(), expected);

        let joined = cmd.to_args().unwrap().join(" ");
        assert!(joined.contains("-f concat -safe 0 -i"));
        assert!(joined.contains("-r 30"));
        assert_eq!(cmd.estimate().total_frames, Some(180));
    }

    #[test]
    fn test_transition_merge_args() {
        let dir = TempDir::new().unwrap();
        let segments: Vec<_> = (0..3)
            .map(|i| touch(&dir, &format!("segment_{i:03}.mp4")))
            .collect();
        let cmd = TransitionMerge {
            segments: segments.clone(),
            plan: plan(3),
            fps: 30,
            profile: EncodingProfile::default(),
            output: dir.path().join("merged.mp4"),
        };
        let args = cmd.to_args().unwrap();
        let inputs = args.iter().filter(|a| a.as_str() == "-i").count();
        assert_eq!(inputs, 3);
        let graph_pos = args.iter().position(|a| a == "-filter_complex").unwrap();
        assert_eq!(args[graph_pos + 1], plan(3).filter_graph());
        assert!(args.join(" ").contains("-map [vout]"));
        assert!((cmd.estimate().total_seconds.unwrap() - 7.8).abs() < 1e-9);
    }

    #[test]
    fn test_transition_merge_requires_two_segments() {
        let dir = TempDir::new().unwrap();
        let cmd = TransitionMerge {
            segments: vec![touch(&dir, "only.mp4")],
            plan: plan(1),
            fps: 30,
            profile: EncodingProfile::default(),
            output: dir.path().join("merged.mp4"),
        };
        assert!(matches!(cmd.validate(), Err(FFmpegError::InvalidParameters(_))));
    }

    #[test]
    fn test_audio_mux_loops_and_truncates() {
        let dir = TempDir::new().unwrap();
        let cmd = AudioMux {
            video: touch(&dir, "video.mp4"),
            audio: touch(&dir, "audio.mp3"),
            duration: Some(7.2),
            profile: EncodingProfile::default(),
            output: dir.path().join("final.mp4"),
        };
        let joined = cmd.to_args().unwrap().join(" ");
        assert!(joined.contains("-stream_loop -1 -i"));
        assert!(joined.contains("-c:v copy -c:a aac -b:a 192k -t 7.2"));
        assert!(!joined.contains("-shortest"));

        let without_duration = AudioMux {
            duration: None,
            ..cmd
        };
        let args = without_duration.to_args().unwrap();
        let joined = args.join(" ");
        assert!(joined.contains("-stream_loop -1 -i"));
        assert_eq!(args[args.len() - 2], "-shortest");
        assert!(!joined.contains(" -t "));
    }

    #[test]
    fn test_duration_probe_args() {
        let dir = TempDir::new().unwrap();
        let probe = DurationProbe {
            input: touch(&dir, "video.mp4"),
        };
        let args = probe.to_args().unwrap();
        assert_eq!(&args[args.len() - 3..], &["-f", "null", "-"]);
        assert!(DurationProbe {
            input: dir.path().join("missing.mp4")
        }
        .to_args()
        .is_err());
    }
}
