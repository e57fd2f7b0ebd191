//! Sequential batch rendering from a TOML manifest.
//!
//! ```toml
//! [[jobs]]
//! label = "slow-rotation"
//! rotation_speed = 30
//! flash_frequency = 0.5
//! quality = 1
//! ```
//!
//! Each job is submitted through the shared [`RenderContext`], retried with
//! backoff while the context is busy, awaited by polling, and its output is
//! copied to `<target_dir>/<label>.<ext>`. Jobs whose target already exists
//! are skipped.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use strobe_core::{JobRequest, QualityLevel};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::context::RenderContext;
use crate::gate::Admission;
use crate::status::JobStatus;

/// One labelled job in a manifest.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BatchJob {
    pub label: String,
    pub rotation_speed: f64,
    pub flash_frequency: f64,
    #[serde(default = "default_quality", deserialize_with = "quality_field")]
    pub quality: QualityLevel,
}

const fn default_quality() -> QualityLevel {
    QualityLevel::Low
}

/// Accepts `quality = 2` as well as `quality = "medium"`.
fn quality_field<'de, D: Deserializer<'de>>(deserializer: D) -> Result<QualityLevel, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Level(u8),
        Name(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Level(level) => QualityLevel::try_from(level).map_err(serde::de::Error::custom),
        Raw::Name(name) => name.parse().map_err(serde::de::Error::custom),
    }
}

/// A list of jobs to run in order.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BatchManifest {
    #[serde(default)]
    pub jobs: Vec<BatchJob>,
}

impl BatchManifest {
    pub fn from_toml_str(content: &str) -> Result<Self, BatchError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, BatchError> {
        let content = std::fs::read_to_string(path).map_err(|source| BatchError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }
}

/// Errors for a single batch job (or manifest loading).
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Invalid batch manifest: {0}")]
    Manifest(#[from] toml::de::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Renderer stayed busy after {attempts} submission attempts")]
    Busy { attempts: u32 },

    #[error("Job {job_id} did not finish within {}s", .waited.as_secs())]
    Timeout { job_id: String, waited: Duration },

    #[error("Render failed: {0}")]
    Render(String),

    #[error("Job {job_id} finished but its output is missing")]
    NoOutput { job_id: String },
}

/// Retry, polling and placement settings.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub target_dir: PathBuf,
    pub submit_attempts: u32,
    pub initial_backoff: Duration,
    pub backoff_factor: f64,
    pub poll_interval: Duration,
    pub deadline: Duration,
}

impl BatchOptions {
    pub fn new(target_dir: impl Into<PathBuf>) -> Self {
        Self {
            target_dir: target_dir.into(),
            submit_attempts: 3,
            initial_backoff: Duration::from_secs(2),
            backoff_factor: 1.5,
            poll_interval: Duration::from_secs(2),
            deadline: Duration::from_secs(30 * 60),
        }
    }
}

/// Outcome of one batch job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    pub label: String,
    pub success: bool,
    pub path: Option<PathBuf>,
    pub skipped: bool,
    pub error: Option<String>,
}

impl BatchResult {
    fn done(label: &str, path: PathBuf, skipped: bool) -> Self {
        Self {
            label: label.to_string(),
            success: true,
            path: Some(path),
            skipped,
            error: None,
        }
    }

    fn failed(label: &str, err: &BatchError) -> Self {
        Self {
            label: label.to_string(),
            success: false,
            path: None,
            skipped: false,
            error: Some(err.to_string()),
        }
    }
}

/// Runs manifest jobs one at a time through a [`RenderContext`].
#[derive(Debug, Clone)]
pub struct BatchRunner {
    ctx: RenderContext,
    options: BatchOptions,
}

impl BatchRunner {
    pub const fn new(ctx: RenderContext, options: BatchOptions) -> Self {
        Self { ctx, options }
    }

    /// `<target_dir>/<label>.<ext>`
    pub fn target_path(&self, job: &BatchJob) -> PathBuf {
        self.options.target_dir.join(format!(
            "{}.{}",
            job.label,
            self.ctx.artifacts().output_extension()
        ))
    }

    pub async fn run(&self, jobs: &[BatchJob]) -> Vec<BatchResult> {
        let mut results = Vec::with_capacity(jobs.len());
        for (index, job) in jobs.iter().enumerate() {
            info!(index, total = jobs.len(), label = %job.label, "Batch job starting");
            let result = match self.run_one(job).await {
                Ok(result) => result,
                Err(e) => {
                    error!(label = %job.label, error = %e, "Batch job failed");
                    BatchResult::failed(&job.label, &e)
                }
            };
            results.push(result);
        }
        let succeeded = results.iter().filter(|r| r.success).count();
        info!(succeeded, total = results.len(), "Batch finished");
        results
    }

    async fn run_one(&self, job: &BatchJob) -> Result<BatchResult, BatchError> {
        let target = self.target_path(job);
        if target.exists() {
            info!(label = %job.label, path = %target.display(), "Target exists, skipping");
            return Ok(BatchResult::done(&job.label, target, true));
        }

        let job_id = uuid::Uuid::new_v4().simple().to_string();
        let request = JobRequest::new(
            job_id.clone(),
            job.rotation_speed,
            job.flash_frequency,
            job.quality,
        );
        self.submit_with_retry(&request).await?;

        let status = self.wait_until_done(&job_id).await?;
        if let Some(message) = status.error {
            return Err(BatchError::Render(message));
        }

        let output = self
            .ctx
            .output_path(&job_id)
            .ok_or_else(|| BatchError::NoOutput {
                job_id: job_id.clone(),
            })?;
        std::fs::create_dir_all(&self.options.target_dir).map_err(|source| BatchError::Io {
            path: self.options.target_dir.clone(),
            source,
        })?;
        std::fs::copy(&output, &target).map_err(|source| BatchError::Io {
            path: target.clone(),
            source,
        })?;
        info!(label = %job.label, job_id = %job_id, path = %target.display(), "Batch job saved");
        Ok(BatchResult::done(&job.label, target, false))
    }

    async fn submit_with_retry(&self, request: &JobRequest) -> Result<(), BatchError> {
        let attempts = self.options.submit_attempts.max(1);
        let mut delay = self.options.initial_backoff;
        for attempt in 1..=attempts {
            if self.ctx.submit(request.clone()).await == Admission::Accepted {
                return Ok(());
            }
            if attempt < attempts {
                warn!(
                    job_id = %request.job_id,
                    attempt,
                    retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Renderer busy, retrying submission"
                );
                tokio::time::sleep(delay).await;
                delay = delay.mul_f64(self.options.backoff_factor);
            }
        }
        Err(BatchError::Busy { attempts })
    }

    async fn wait_until_done(&self, job_id: &str) -> Result<JobStatus, BatchError> {
        let poll = async {
            loop {
                let status = self.ctx.status().await;
                if !status.running && status.job_id.as_deref() == Some(job_id) {
                    return status;
                }
                tokio::time::sleep(self.options.poll_interval).await;
            }
        };
        tokio::time::timeout(self.options.deadline, poll)
            .await
            .map_err(|_| BatchError::Timeout {
                job_id: job_id.to_string(),
                waited: self.options.deadline,
            })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use strobe_core::Config;
    use tempfile::TempDir;

    #[test]
    fn manifest_accepts_numeric_and_named_quality() {
        let manifest = BatchManifest::from_toml_str(
            r#"
            [[jobs]]
            label = "a"
            rotation_speed = 30
            flash_frequency = 0.5
            quality = 2

            [[jobs]]
            label = "b"
            rotation_speed = 60.0
            flash_frequency = 1.0
            quality = "high"

            [[jobs]]
            label = "c"
            rotation_speed = 10.0
            flash_frequency = 0.0
            "#,
        )
        .unwrap();
        let qualities: Vec<_> = manifest.jobs.iter().map(|j| j.quality).collect();
        assert_eq!(
            qualities,
            [QualityLevel::Medium, QualityLevel::High, QualityLevel::Low]
        );
        assert!((manifest.jobs[0].rotation_speed - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn out_of_range_quality_is_rejected() {
        let err = BatchManifest::from_toml_str(
            "[[jobs]]\nlabel = \"x\"\nrotation_speed = 1.0\nflash_frequency = 1.0\nquality = 7\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("quality level"));
    }

    #[test]
    fn empty_manifest_has_no_jobs() {
        assert!(BatchManifest::from_toml_str("").unwrap().jobs.is_empty());
    }

    #[tokio::test]
    async fn existing_target_is_skipped_without_rendering() {
        let dir = TempDir::new().unwrap();
        let ctx = RenderContext::new(Config::default().resolve_paths(dir.path()));
        let target_dir = dir.path().join("experiments");
        std::fs::create_dir_all(&target_dir).unwrap();
        std::fs::write(target_dir.join("done.mp4"), b"mp4").unwrap();

        let runner = BatchRunner::new(ctx.clone(), BatchOptions::new(&target_dir));
        let job = BatchJob {
            label: "done".into(),
            rotation_speed: 30.0,
            flash_frequency: 0.5,
            quality: QualityLevel::Low,
        };
        let results = runner.run(&[job]).await;

        assert_eq!(results.len(), 1);
        assert!(results[0].success && results[0].skipped);
        assert_eq!(results[0].path, Some(target_dir.join("done.mp4")));
        assert!(ctx.status().await.job_id.is_none());
    }
}
