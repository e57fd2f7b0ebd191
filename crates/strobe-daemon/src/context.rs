//! Render context: the one object front ends hold.
//!
//! Owns the status store, the admission gate and the artifact layout, and
//! runs the job pipeline on the admitted worker task:
//!
//! ```text
//! check deps -> generate input -> supervise attempts -> settle output
//!            -> discard input -> publish terminal status -> release slot
//! ```

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use strobe_core::progress::{ProgressParser, ProgressWindow, checkpoint};
use strobe_core::{Config, JobRequest};
use tracing::{error, info, warn};

use crate::artifacts::ArtifactLifecycle;
use crate::gate::{Admission, JobGate};
use crate::render::{JobError, RenderInvocation, SubprocessSupervisor};
use crate::scene::{SceneSource, TemplateScene};
use crate::status::{JobStatus, StatusStore};

/// Shared handle to the render pipeline. Cheap to clone.
#[derive(Clone)]
pub struct RenderContext {
    config: Arc<Config>,
    status: Arc<StatusStore>,
    gate: Arc<JobGate>,
    artifacts: Arc<ArtifactLifecycle>,
    scenes: Arc<dyn SceneSource>,
    supervisor: SubprocessSupervisor,
}

impl fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderContext")
            .field("artifacts", &self.artifacts)
            .field("busy", &self.gate.is_busy())
            .finish_non_exhaustive()
    }
}

impl RenderContext {
    /// Build a context from a configuration whose paths are resolved.
    pub fn new(config: Config) -> Self {
        let artifacts = Arc::new(ArtifactLifecycle::from_config(&config));
        let status = Arc::new(StatusStore::new());
        let scenes: Arc<dyn SceneSource> = Arc::new(TemplateScene::new(
            &config.paths.scenes_dir,
            config.render.font_family.clone(),
        ));
        let supervisor =
            SubprocessSupervisor::new(&config, Arc::clone(&artifacts), Arc::clone(&status));
        Self {
            config: Arc::new(config),
            status,
            gate: Arc::new(JobGate::new()),
            artifacts,
            scenes,
            supervisor,
        }
    }

    /// Replace the scene generator.
    #[must_use]
    pub fn with_scene_source(mut self, scenes: Arc<dyn SceneSource>) -> Self {
        self.scenes = scenes;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn artifacts(&self) -> &ArtifactLifecycle {
        &self.artifacts
    }

    /// Submit a job without waiting for it.
    ///
    /// Returns [`Admission::Busy`] immediately if another job holds the slot;
    /// in that case no status, file or process is created.
    pub async fn submit(&self, request: JobRequest) -> Admission {
        let Some(slot) = self.gate.try_admit(&request.job_id) else {
            return Admission::Busy;
        };

        let estimate = &self.config.quality.get(request.quality).time_estimate;
        self.status.start(&request.job_id, estimate).await;
        info!(
            job_id = %request.job_id,
            quality = %request.quality,
            rotation_speed_rpm = request.rotation_speed_rpm,
            flash_frequency_hz = request.flash_frequency_hz,
            "Render job accepted"
        );

        let ctx = self.clone();
        self.gate
            .launch(slot, async move { ctx.execute(request).await })
            .await;
        Admission::Accepted
    }

    pub fn is_busy(&self) -> bool {
        self.gate.is_busy()
    }

    /// Snapshot of the current or last job.
    pub async fn status(&self) -> JobStatus {
        self.status.read().await
    }

    /// Wait until the running job (if any) has fully finished.
    pub async fn wait_idle(&self) {
        self.gate.wait_idle().await;
    }

    /// Canonical output for `job_id`, if the render produced one.
    pub fn output_path(&self, job_id: &str) -> Option<PathBuf> {
        self.artifacts.existing_output(job_id)
    }

    /// Delete aged artifacts; see [`ArtifactLifecycle::sweep`].
    pub async fn sweep(&self, max_age: Duration, force: bool) -> usize {
        let artifacts = Arc::clone(&self.artifacts);
        tokio::task::spawn_blocking(move || artifacts.sweep(max_age, force))
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Sweep task failed");
                0
            })
    }

    fn progress_window(&self) -> ProgressWindow {
        ProgressWindow::new(
            self.config.render.progress_floor,
            self.config.render.progress_ceiling,
        )
    }

    async fn execute(&self, request: JobRequest) {
        let job_id = request.job_id.as_str();
        match self.run_pipeline(&request).await {
            Ok(output) => {
                info!(job_id, output = %output.display(), "Render job completed");
                self.status.finish(true, None).await;
            }
            Err(e) => {
                error!(job_id, error = %e, "Render job failed");
                self.status.finish(false, Some(e.to_string())).await;
            }
        }
    }

    async fn run_pipeline(&self, request: &JobRequest) -> Result<PathBuf, JobError> {
        let job_id = request.job_id.as_str();
        self.supervisor.check_dependencies()?;
        self.artifacts.ensure_directories()?;

        self.status
            .update(checkpoint::GENERATING_SCENE, "Generating scene", None)
            .await;
        let script = self.scenes.render_scene(request)?;
        let input = self.artifacts.write_input(job_id, &script)?;

        self.status
            .update(
                checkpoint::PREPARING_ARGUMENTS,
                "Preparing render arguments",
                None,
            )
            .await;
        let profile = self.config.quality.get(request.quality);
        let invocation = RenderInvocation::new(
            &self.config.render,
            profile,
            self.artifacts.output_dir(),
            self.artifacts.output_file_name(job_id),
            input.path(),
        );

        self.status
            .update(checkpoint::LAUNCHING, "Launching renderer", None)
            .await;
        let mut parser = ProgressParser::new(self.progress_window());
        let result = self.supervisor.run(job_id, &invocation, &mut parser).await;
        input.discard();
        let outcome = result?;

        for failure in &outcome.failed_attempts {
            warn!(
                job_id,
                failed_strategy = %failure.strategy(),
                recovered_by = %outcome.strategy,
                error = %failure,
                "Render recovered after a failed attempt"
            );
        }

        self.status
            .update(
                checkpoint::PROCESSING_OUTPUT,
                "Processing output file",
                None,
            )
            .await;
        Ok(self.settle(job_id, outcome.output).await)
    }

    /// Copy the output to its canonical path and drop metadata files.
    async fn settle(&self, job_id: &str, found: PathBuf) -> PathBuf {
        let artifacts = Arc::clone(&self.artifacts);
        let id = job_id.to_string();
        let discovered = found.clone();
        let settled = tokio::task::spawn_blocking(move || {
            let settled = artifacts.settle_output(&discovered, &id);
            artifacts.remove_sidecar(&discovered);
            if settled != discovered {
                artifacts.remove_sidecar(&settled);
            }
            settled
        })
        .await;
        settled.unwrap_or_else(|e| {
            warn!(job_id, error = %e, "Output settle task failed, reporting discovered path");
            found
        })
    }
}
