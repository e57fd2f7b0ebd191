//! Line-oriented progress parser.
//!
//! Recognises, in order:
//! - detailed: `[00:03:00/00:12:00] 45% Playing Animation: ...`
//! - simple:   `Progress: 45%`
//!
//! First match wins. Numeric failures are logged and never stop the stream.

use std::sync::LazyLock;
use std::time::Duration;

use regex::{Captures, Regex};
use tracing::warn;

use super::types::{LineEvent, ProgressSample, ProgressWindow};

static DETAILED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(\d{2}):(\d{2}):(\d{2})/(\d{2}):(\d{2}):(\d{2})\]\s+(\d+)%\s+Playing Animation:")
        .expect("static regex is valid")
});

static SIMPLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Progress:\s*(\d+)%").expect("static regex is valid"));

/// Whether the tool flagged this line as an error.
pub fn is_diagnostic(line: &str) -> bool {
    let upper = line.to_uppercase();
    upper.contains("ERROR") || upper.contains("FATAL")
}

/// Stateful parser holding only the last published percentage.
///
/// One instance spans every attempt of a job so a retried render never
/// lowers what pollers have already seen.
#[derive(Debug, Clone)]
pub struct ProgressParser {
    window: ProgressWindow,
    last_reported: u8,
}

impl ProgressParser {
    /// Create a parser whose ratchet starts at the window floor.
    pub const fn new(window: ProgressWindow) -> Self {
        Self {
            window,
            last_reported: window.floor,
        }
    }

    /// Last value published through this parser.
    pub const fn last_reported(&self) -> u8 {
        self.last_reported
    }

    /// Classify one line of output, advancing the ratchet when appropriate.
    pub fn parse_line(&mut self, line: &str) -> LineEvent {
        let line = line.trim_end();

        if let Some(caps) = DETAILED_RE.captures(line) {
            return match parse_detailed(&caps) {
                Ok((raw, elapsed, total)) => self.ratchet(raw, Some(elapsed), Some(total)),
                Err(reason) => malformed(line, "detailed", reason),
            };
        }

        if let Some(caps) = SIMPLE_RE.captures(line) {
            return match caps[1].parse::<u32>() {
                Ok(raw) => self.ratchet(raw, None, None),
                Err(e) => malformed(line, "simple", e.to_string()),
            };
        }

        if is_diagnostic(line) {
            LineEvent::Diagnostic
        } else {
            LineEvent::Other
        }
    }

    /// Close out a stream: if the ratchet sits below the window ceiling, jump
    /// to the ceiling and return it so the caller can publish it.
    pub fn finish_stream(&mut self) -> Option<u8> {
        if self.last_reported < self.window.ceiling {
            self.last_reported = self.window.ceiling;
            Some(self.last_reported)
        } else {
            None
        }
    }

    fn ratchet(
        &mut self,
        raw: u32,
        elapsed: Option<Duration>,
        total: Option<Duration>,
    ) -> LineEvent {
        let mapped = self.window.map(raw);
        let sample = ProgressSample {
            raw_percent: u8::try_from(raw.min(100)).unwrap_or(100),
            mapped_percent: mapped,
            elapsed,
            total,
        };
        if mapped > self.last_reported {
            self.last_reported = mapped;
            LineEvent::Advanced(sample)
        } else {
            LineEvent::Stale(sample)
        }
    }
}

fn malformed(line: &str, shape: &str, reason: String) -> LineEvent {
    warn!(line, shape, error = %reason, "Failed to parse render progress");
    LineEvent::Malformed { reason }
}

fn parse_detailed(caps: &Captures<'_>) -> Result<(u32, Duration, Duration), String> {
    let field = |i: usize| caps[i].parse::<u64>().map_err(|e| e.to_string());
    let elapsed = timecode(field(1)?, field(2)?, field(3)?);
    let total = timecode(field(4)?, field(5)?, field(6)?);
    let raw = caps[7].parse::<u32>().map_err(|e| e.to_string())?;
    Ok((raw, elapsed, total))
}

const fn timecode(hours: u64, minutes: u64, seconds: u64) -> Duration {
    Duration::from_secs(hours * 3600 + minutes * 60 + seconds)
}
