//! Progress Projection
//!
//! Maps a stage's local 0~100 progress into the task's global progress window
//! and guards the global value against regressions.

use super::Percent;

/// Projects a local stage percentage into the global window `[start, end]`.
///
/// `start + local * (end - start) / 100`. Local input is clamped to 0~100.
pub fn project(local: Percent, start: Percent, end: Percent) -> Percent {
    let local = if local.is_finite() {
        local.clamp(0.0, 100.0)
    } else {
        0.0
    };
    start + local * (end - start) / 100.0
}

/// A `[start, end]` slice of the global progress scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageWindow {
    pub start: Percent,
    pub end: Percent,
}

impl StageWindow {
    pub const FULL: StageWindow = StageWindow {
        start: 0.0,
        end: 100.0,
    };

    pub fn new(start: Percent, end: Percent) -> Self {
        Self { start, end }
    }

    /// Global value for a local percentage inside this window
    pub fn project(&self, local: Percent) -> Percent {
        project(local, self.start, self.end)
    }

    /// Nested window: `[start, end]` given in this window's local scale
    pub fn sub(&self, start: Percent, end: Percent) -> StageWindow {
        StageWindow {
            start: self.project(start),
            end: self.project(end),
        }
    }
}

impl Default for StageWindow {
    fn default() -> Self {
        Self::FULL
    }
}

/// Non-decreasing global progress value.
#[derive(Debug, Default, Clone)]
pub struct MonotonicProgress {
    last: Percent,
}

impl MonotonicProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts a candidate value and returns what may be emitted.
    ///
    /// Values below the previous emission are raised to it.
    pub fn advance(&mut self, candidate: Percent) -> Percent {
        if candidate.is_finite() && candidate > self.last {
            self.last = candidate.min(100.0);
        }
        self.last
    }

    pub fn current(&self) -> Percent {
        self.last
    }
}
