//! Progress event types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Sub-range of the job's 0-100 scale covered by the tool's own report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressWindow {
    pub floor: u8,
    pub ceiling: u8,
}

impl ProgressWindow {
    pub const fn new(floor: u8, ceiling: u8) -> Self {
        Self { floor, ceiling }
    }

    /// Map a raw tool percentage onto the window, rounding down.
    ///
    /// Raw values above 100 are treated as 100.
    pub fn map(&self, raw_percent: u32) -> u8 {
        let raw = raw_percent.min(100);
        let span = u32::from(self.ceiling.saturating_sub(self.floor));
        let offset = u8::try_from(raw * span / 100).unwrap_or(u8::MAX);
        self.floor.saturating_add(offset).min(self.ceiling)
    }
}

impl Default for ProgressWindow {
    fn default() -> Self {
        Self::new(40, 85)
    }
}

/// One recognised progress report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSample {
    /// Percentage as printed by the tool (clamped to 100).
    pub raw_percent: u8,
    /// Percentage on the job scale.
    pub mapped_percent: u8,
    /// Position in the render timeline; detailed lines only.
    pub elapsed: Option<Duration>,
    /// Length of the render timeline; detailed lines only.
    pub total: Option<Duration>,
}

/// Classification of a single output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// A report that moved the ratchet forward and should be published.
    Advanced(ProgressSample),
    /// A recognised report at or below the last published value.
    Stale(ProgressSample),
    /// A line shaped like a report whose numbers could not be read.
    Malformed { reason: String },
    /// A line the tool flagged as an error.
    Diagnostic,
    /// Anything else; only logged.
    Other,
}
