//! Render subprocess supervisor.
//!
//! Launches the tool for each strategy in turn, streams its merged
//! stdout/stderr line by line into the progress parser and the status store,
//! and decides per attempt whether the job produced an output.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use strobe_core::Config;
use strobe_core::progress::{LineEvent, ProgressParser};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::error::{AttemptFailure, JobError};
use super::strategy::{RenderInvocation, Strategy};
use crate::artifacts::ArtifactLifecycle;
use crate::status::{StatusStore, StepCounters};

/// Buffered output lines between the reader tasks and the parser.
const LINE_CHANNEL_CAPACITY: usize = 256;

/// Longest renderer line copied into the task label.
const TASK_LINE_LIMIT: usize = 160;

/// Result of a successful render.
#[derive(Debug)]
pub struct RenderOutcome {
    /// Where the tool's output was found (not yet copied to canonical).
    pub output: PathBuf,
    pub strategy: Strategy,
    /// Attempts that failed before the successful one.
    pub failed_attempts: Vec<AttemptFailure>,
}

/// Runs render attempts and reports their progress.
#[derive(Debug, Clone)]
pub struct SubprocessSupervisor {
    program: String,
    required_binaries: Vec<String>,
    settle_delay: Duration,
    tail_lines: usize,
    artifacts: Arc<ArtifactLifecycle>,
    status: Arc<StatusStore>,
}

impl SubprocessSupervisor {
    pub fn new(config: &Config, artifacts: Arc<ArtifactLifecycle>, status: Arc<StatusStore>) -> Self {
        Self {
            program: config.render.program.clone(),
            required_binaries: config.render.required_binaries.clone(),
            settle_delay: Duration::from_millis(config.render.settle_delay_ms),
            tail_lines: config.render.diagnostic_tail_lines,
            artifacts,
            status,
        }
    }

    /// Verify the tool and its helper binaries resolve on `PATH`.
    pub fn check_dependencies(&self) -> Result<(), JobError> {
        for binary in std::iter::once(&self.program).chain(&self.required_binaries) {
            match which::which(binary) {
                Ok(path) => debug!(binary = %binary, path = %path.display(), "Dependency found"),
                Err(e) => {
                    warn!(binary = %binary, error = %e, "Required executable not found");
                    return Err(JobError::MissingDependency {
                        binary: binary.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Run the primary strategy, then the fallback if the primary fails.
    ///
    /// `parser` is shared across attempts, so nothing published by an earlier
    /// attempt is ever lowered by a later one. The window ceiling is
    /// published only once an attempt has produced its output.
    pub async fn run(
        &self,
        job_id: &str,
        invocation: &RenderInvocation,
        parser: &mut ProgressParser,
    ) -> Result<RenderOutcome, JobError> {
        let mut failures: Vec<AttemptFailure> = Vec::new();
        let mut next = Some(Strategy::Primary);

        while let Some(strategy) = next {
            if strategy == Strategy::Fallback {
                warn!(
                    job_id,
                    renderer = invocation.renderer(strategy),
                    "Primary renderer failed, retrying with fallback"
                );
            }
            match self.attempt(job_id, invocation, strategy, parser).await {
                Ok(output) => {
                    info!(job_id, %strategy, output = %output.display(), "Render attempt succeeded");
                    return Ok(RenderOutcome {
                        output,
                        strategy,
                        failed_attempts: failures,
                    });
                }
                Err(failure) => {
                    warn!(job_id, %strategy, error = %failure, "Render attempt failed");
                    failures.push(failure);
                }
            }
            next = strategy.next();
        }

        Err(JobError::AttemptsExhausted { attempts: failures })
    }

    async fn attempt(
        &self,
        job_id: &str,
        invocation: &RenderInvocation,
        strategy: Strategy,
        parser: &mut ProgressParser,
    ) -> Result<PathBuf, AttemptFailure> {
        let renderer = invocation.renderer(strategy).to_string();
        info!(
            job_id,
            %strategy,
            renderer = %renderer,
            command = %invocation.display(strategy),
            "Launching renderer"
        );

        let mut child = invocation
            .command(strategy)
            .spawn()
            .map_err(|e| AttemptFailure::Spawn {
                strategy,
                renderer: renderer.clone(),
                reason: e.to_string(),
            })?;

        let (tx, mut rx) = mpsc::channel::<String>(LINE_CHANNEL_CAPACITY);
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_lines(stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_lines(stderr, tx.clone())));
        }
        drop(tx);

        self.status
            .update(
                parser.last_reported(),
                format!("Rendering animation ({renderer})"),
                None,
            )
            .await;

        let mut tail = DiagnosticTail::new(self.tail_lines);
        while let Some(line) = rx.recv().await {
            self.observe_line(job_id, strategy, &line, parser).await;
            tail.push(line);
        }
        for reader in readers {
            if let Err(e) = reader.await {
                warn!(job_id, %strategy, error = %e, "Output reader task failed");
            }
        }

        let exit = match child.wait().await {
            Ok(exit) => exit,
            Err(e) => {
                return Err(AttemptFailure::Subprocess {
                    strategy,
                    renderer,
                    exit_code: None,
                    diagnostics: format!("failed to wait for renderer: {e}"),
                });
            }
        };
        info!(job_id, %strategy, exit_code = ?exit.code(), "Renderer exited");

        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }

        if !exit.success() {
            return Err(AttemptFailure::Subprocess {
                strategy,
                renderer,
                exit_code: exit.code(),
                diagnostics: tail.render(),
            });
        }

        let artifacts = Arc::clone(&self.artifacts);
        let id = job_id.to_string();
        let found = tokio::task::spawn_blocking(move || artifacts.discover_output(&id))
            .await
            .unwrap_or_else(|e| {
                warn!(job_id, error = %e, "Output discovery task failed");
                None
            });

        let output = found.ok_or_else(|| AttemptFailure::ArtifactMissing {
            strategy,
            renderer,
            expected: self.artifacts.canonical_output_path(job_id),
            diagnostics: tail.render(),
        })?;

        // Only a successful attempt closes the window.
        if let Some(ceiling) = parser.finish_stream() {
            self.status
                .update(ceiling, "Finalizing animation", None)
                .await;
        }
        Ok(output)
    }

    async fn observe_line(
        &self,
        job_id: &str,
        strategy: Strategy,
        line: &str,
        parser: &mut ProgressParser,
    ) {
        debug!(job_id, %strategy, line, "renderer");
        match parser.parse_line(line) {
            LineEvent::Advanced(sample) => {
                let counters = sample
                    .elapsed
                    .zip(sample.total)
                    .map(|(elapsed, total)| StepCounters {
                        current: elapsed.as_secs(),
                        total: total.as_secs(),
                    });
                self.status
                    .update(
                        sample.mapped_percent,
                        format!("Rendering animation: {}%", sample.raw_percent),
                        counters,
                    )
                    .await;
            }
            LineEvent::Diagnostic => {
                error!(job_id, %strategy, line, "Renderer reported an error");
                self.status
                    .update(
                        parser.last_reported(),
                        format!("Renderer error: {}", clip(line, TASK_LINE_LIMIT)),
                        None,
                    )
                    .await;
            }
            LineEvent::Stale(_) | LineEvent::Malformed { .. } | LineEvent::Other => {}
        }
    }
}

/// Last `capacity` output lines of an attempt, kept for failure reports.
#[derive(Debug)]
struct DiagnosticTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl DiagnosticTail {
    fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(LINE_CHANNEL_CAPACITY)),
            capacity,
        }
    }

    fn push(&mut self, line: String) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    fn render(&self) -> String {
        if self.lines.is_empty() {
            return "(no output)".to_string();
        }
        self.lines
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

/// Forward every line of `reader` into `tx`.
///
/// Both `\n` and `\r` end a line so carriage-return progress bars arrive as
/// separate updates. Invalid UTF-8 is replaced rather than dropped.
async fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut pending = Vec::new();
    loop {
        let (lines, consumed) = match reader.fill_buf().await {
            Ok([]) => break,
            Ok(chunk) => (split_chunk(&mut pending, chunk), chunk.len()),
            Err(e) => {
                warn!(error = %e, "Failed to read renderer output");
                break;
            }
        };
        reader.consume(consumed);
        for line in lines {
            if tx.send(line).await.is_err() {
                return;
            }
        }
    }
    if !pending.is_empty() {
        let _ = tx.send(String::from_utf8_lossy(&pending).into_owned()).await;
    }
}

/// Split `chunk` on line terminators, carrying any partial line in `pending`.
fn split_chunk(pending: &mut Vec<u8>, chunk: &[u8]) -> Vec<String> {
    let mut lines = Vec::new();
    for &byte in chunk {
        if byte == b'\n' || byte == b'\r' {
            if !pending.is_empty() {
                lines.push(String::from_utf8_lossy(pending).into_owned());
                pending.clear();
            }
        } else {
            pending.push(byte);
        }
    }
    lines
}

fn clip(line: &str, limit: usize) -> &str {
    match line.char_indices().nth(limit) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn carriage_returns_and_newlines_both_split() {
        let mut pending = Vec::new();
        let lines = split_chunk(&mut pending, b"Progress: 10%\rProgress: 20%\r\nfoo");
        assert_eq!(lines, ["Progress: 10%", "Progress: 20%"]);
        assert_eq!(pending, b"foo");

        let lines = split_chunk(&mut pending, b"bar\n");
        assert_eq!(lines, ["foobar"]);
        assert!(pending.is_empty());
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let mut pending = Vec::new();
        let lines = split_chunk(&mut pending, b"bad \xff byte\n");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("bad "));
        assert!(lines[0].ends_with(" byte"));
    }

    #[tokio::test]
    async fn reader_flushes_trailing_partial_line() {
        let (tx, mut rx) = mpsc::channel(8);
        forward_lines(&b"one\ntwo"[..], tx).await;
        assert_eq!(rx.recv().await.as_deref(), Some("one"));
        assert_eq!(rx.recv().await.as_deref(), Some("two"));
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn tail_keeps_only_the_newest_lines() {
        let mut tail = DiagnosticTail::new(2);
        for line in ["a", "b", "c"] {
            tail.push(line.to_string());
        }
        assert_eq!(tail.render(), "b | c");
        assert_eq!(DiagnosticTail::new(3).render(), "(no output)");
    }

    #[test]
    fn clip_respects_char_boundaries() {
        assert_eq!(clip("héllo", 2), "hé");
        assert_eq!(clip("ok", 10), "ok");
    }

    #[test]
    fn missing_program_is_reported_by_name() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default().resolve_paths(dir.path());
        config.render.program = "strobe-no-such-render-tool".to_string();
        let supervisor = SubprocessSupervisor::new(
            &config,
            Arc::new(ArtifactLifecycle::from_config(&config)),
            Arc::new(StatusStore::new()),
        );
        let err = supervisor.check_dependencies().unwrap_err();
        assert!(matches!(
            err,
            JobError::MissingDependency { ref binary } if binary == "strobe-no-such-render-tool"
        ));
    }
}
