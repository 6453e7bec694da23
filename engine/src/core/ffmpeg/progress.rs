//! Encoder progress parsing.
//!
//! ffmpeg reports progress in two shapes:
//!
//! ```text
//! frame=100                 (-progress pipe:1, one key per line)
//! out_time_ms=3333333
//! progress=continue
//!
//! frame=  100 fps= 30 q=28.0 size=  256kB time=00:00:03.33 bitrate=...  (stats line)
//! ```
//!
//! Both are reduced to a [`ProgressMarker`].

/// Processed frame count and/or elapsed media time found on one line
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProgressMarker {
    pub frame: Option<u64>,
    pub time_sec: Option<f64>,
}

impl ProgressMarker {
    fn is_empty(&self) -> bool {
        self.frame.is_none() && self.time_sec.is_none()
    }

    /// Merges newer values over older ones
    pub fn merge(&mut self, newer: ProgressMarker) {
        if newer.frame.is_some() {
            self.frame = newer.frame;
        }
        if newer.time_sec.is_some() {
            self.time_sec = newer.time_sec;
        }
    }
}

/// Parses a single output line into a progress marker.
///
/// Returns `None` for lines without a usable marker (`N/A` values included).
pub fn parse_progress_marker(line: &str) -> Option<ProgressMarker> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let mut marker = ProgressMarker::default();

    if let Some(value) = value_after(line, "frame=") {
        marker.frame = value.parse().ok();
    }

    // out_time_ms is in microseconds despite the name
    if let Some(value) = value_after(line, "out_time_us=").or_else(|| value_after(line, "out_time_ms=")) {
        marker.time_sec = value
            .parse::<i64>()
            .ok()
            .filter(|us| *us >= 0)
            .map(|us| us as f64 / 1_000_000.0);
    } else if let Some(value) = value_after(line, "out_time=").or_else(|| value_after(line, "time=")) {
        marker.time_sec = parse_timestamp(value);
    }

    if marker.is_empty() {
        None
    } else {
        Some(marker)
    }
}

/// Parses the `Duration: HH:MM:SS.cc` header ffmpeg prints for an input
pub fn parse_duration_line(line: &str) -> Option<f64> {
    let value = value_after(line.trim(), "Duration:")?;
    parse_timestamp(value.trim_end_matches(','))
}

/// Parses `HH:MM:SS(.fraction)` into seconds
fn parse_timestamp(value: &str) -> Option<f64> {
    let mut parts = value.trim().split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || hours < 0.0 || minutes < 0.0 || seconds < 0.0 {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Value token following `key`, where `key` starts the line or follows whitespace.
///
/// Whitespace between the key and its value (`frame=  100`) is skipped.
fn value_after<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let mut search_from = 0;
    while let Some(offset) = line[search_from..].find(key) {
        let start = search_from + offset;
        let at_boundary = start == 0
            || line[..start]
                .chars()
                .next_back()
                .is_some_and(char::is_whitespace);
        if at_boundary {
            let rest = line[start + key.len()..].trim_start();
            let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
            let token = &rest[..end];
            return if token.is_empty() { None } else { Some(token) };
        }
        search_from = start + key.len();
    }
    None
}

/// Expected size of one encoder invocation's output, used for local percentages.
///
/// The totals are estimates supplied by the command builders; the resulting
/// percentage is display feedback only.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProgressEstimate {
    pub total_seconds: Option<f64>,
    pub total_frames: Option<u64>,
}

impl ProgressEstimate {
    /// Highest local percentage reported while the process is still running
    pub const RUNNING_CEILING: f64 = 90.0;

    pub fn from_duration(total_seconds: f64, fps: u32) -> Self {
        let frames = (total_seconds * fps as f64).round();
        Self {
            total_seconds: Some(total_seconds).filter(|s| *s > 0.0),
            total_frames: if frames >= 1.0 { Some(frames as u64) } else { None },
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    /// Local percentage for the latest marker, clamped to `[0, 90]`
    pub fn local_percent(&self, marker: &ProgressMarker) -> Option<f64> {
        let raw = match (marker.time_sec, self.total_seconds, marker.frame, self.total_frames) {
            (Some(time), Some(total), _, _) if total > 0.0 => time / total * 100.0,
            (_, _, Some(frame), Some(total)) if total > 0 => frame as f64 / total as f64 * 100.0,
            _ => return None,
        };
        Some(raw.clamp(0.0, Self::RUNNING_CEILING))
    }
}
