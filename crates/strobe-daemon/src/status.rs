//! Shared job-progress record.
//!
//! One writer (the active render worker) and any number of pollers share a
//! single record behind one mutex. Locks are held only for the copy in or
//! out, never across job execution.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Serialize, Serializer};
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Label used before any estimate is known.
pub const UNKNOWN_ESTIMATE: &str = "unknown";

/// Optional step counters attached to a progress update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepCounters {
    pub current: u64,
    pub total: u64,
}

/// Snapshot of the current (or last) job's progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    pub job_id: Option<String>,
    pub running: bool,
    /// 0-100 on the job's own scale.
    pub progress: u8,
    pub current_task: String,
    pub error: Option<String>,
    #[serde(serialize_with = "unix_secs")]
    pub start_time: Option<SystemTime>,
    pub estimate: String,
    #[serde(serialize_with = "fractional_secs")]
    pub elapsed: Duration,
    pub current_step: Option<u64>,
    pub total_steps: Option<u64>,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self {
            job_id: None,
            running: false,
            progress: 0,
            current_task: String::new(),
            error: None,
            start_time: None,
            estimate: UNKNOWN_ESTIMATE.to_string(),
            elapsed: Duration::ZERO,
            current_step: None,
            total_steps: None,
        }
    }
}

impl JobStatus {
    /// Elapsed time formatted for display, e.g. `12.3s`.
    pub fn elapsed_label(&self) -> String {
        format!("{:.1}s", self.elapsed.as_secs_f64())
    }

    /// Whether the job finished without error.
    pub const fn succeeded(&self) -> bool {
        !self.running && self.error.is_none() && self.progress == 100
    }
}

#[derive(Debug, Default)]
struct StatusRecord {
    status: JobStatus,
    started: Option<Instant>,
}

/// Lock-guarded job status shared between the worker and pollers.
#[derive(Debug, Default)]
pub struct StatusStore {
    inner: Mutex<StatusRecord>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to a fresh in-progress record for `job_id`.
    pub async fn start(&self, job_id: &str, estimate: &str) {
        let mut record = self.inner.lock().await;
        record.started = Some(Instant::now());
        record.status = JobStatus {
            job_id: Some(job_id.to_string()),
            running: true,
            progress: 0,
            current_task: "Preparing render".to_string(),
            error: None,
            start_time: Some(SystemTime::now()),
            estimate: if estimate.is_empty() {
                UNKNOWN_ESTIMATE.to_string()
            } else {
                estimate.to_string()
            },
            elapsed: Duration::ZERO,
            current_step: None,
            total_steps: None,
        };
    }

    /// Merge a progress report. `percent` is clamped to 100 but not ratcheted.
    pub async fn update(
        &self,
        percent: u8,
        task: impl Into<String>,
        counters: Option<StepCounters>,
    ) {
        let task = task.into();
        let mut record = self.inner.lock().await;
        record.status.progress = percent.min(100);
        record.status.current_task = task;
        if let Some(counters) = counters {
            record.status.current_step = Some(counters.current);
            record.status.total_steps = Some(counters.total);
        }
    }

    /// Mark the job terminal. Success forces progress to 100; failure keeps
    /// the last recorded value.
    pub async fn finish(&self, success: bool, error: Option<String>) {
        let mut record = self.inner.lock().await;
        let elapsed = record.started.map(|s| s.elapsed()).unwrap_or_default();
        let status = &mut record.status;
        status.running = false;
        status.elapsed = elapsed;
        if success {
            status.progress = 100;
            status.current_task = "Render complete".to_string();
            status.error = None;
        } else {
            let message = error.unwrap_or_else(|| "render failed".to_string());
            status.current_task = format!("Render failed: {message}");
            status.error = Some(message);
        }
    }

    /// Consistent snapshot; elapsed time is recomputed while running.
    pub async fn read(&self) -> JobStatus {
        let record = self.inner.lock().await;
        let mut status = record.status.clone();
        if status.running
            && let Some(started) = record.started
        {
            status.elapsed = started.elapsed();
        }
        status
    }
}

#[allow(clippy::ref_option)]
fn unix_secs<S: Serializer>(time: &Option<SystemTime>, serializer: S) -> Result<S::Ok, S::Error> {
    match time.and_then(|t| t.duration_since(UNIX_EPOCH).ok()) {
        Some(d) => serializer.serialize_some(&d.as_secs_f64()),
        None => serializer.serialize_none(),
    }
}

fn fractional_secs<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(d.as_secs_f64())
}
