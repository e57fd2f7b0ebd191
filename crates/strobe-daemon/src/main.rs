//! strobe daemon
//!
//! Command-line front end over the render context: render one animation and
//! follow its progress, sweep stale artifacts, or run a batch manifest.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use strobe_core::config::{CONFIG_FILE_NAME, load_config};
use strobe_core::tracing_init::{default_filter, init_tracing};
use strobe_core::{JobRequest, QualityLevel};
use strobe_daemon::batch::{BatchManifest, BatchOptions, BatchRunner};
use strobe_daemon::{Admission, RenderContext};

#[derive(Parser, Debug)]
#[command(name = "strobe-daemon")]
#[command(version, about = "strobe daemon - stroboscope animation renderer")]
struct Args {
    /// Config file. Defaults to `<project-root>/strobe.toml`, then the user
    /// config directory.
    #[arg(long, global = true, env = "STROBE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory that relative paths are resolved against (defaults to the
    /// current directory).
    #[arg(long, global = true, env = "STROBE_PROJECT_ROOT")]
    project_root: Option<PathBuf>,

    /// Log level filter (e.g. "info", "debug", "warn").
    #[arg(long, global = true, default_value = "info", env = "STROBE_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, global = true, env = "STROBE_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render one animation and print status snapshots until it finishes
    Render {
        /// Disk rotation speed (rpm)
        #[arg(long)]
        rotation_speed: f64,

        /// Strobe flash frequency (Hz)
        #[arg(long)]
        flash_frequency: f64,

        /// Quality level: 1-3 or low/medium/high
        #[arg(long, default_value = "1")]
        quality: QualityLevel,

        /// Job identifier (random when omitted)
        #[arg(long)]
        job_id: Option<String>,

        /// Status poll interval in milliseconds
        #[arg(long, default_value_t = 500)]
        poll_ms: u64,
    },

    /// Delete aged artifacts and print the number removed
    Sweep {
        /// Age threshold in hours (defaults to `cleanup.max_age_hours`)
        #[arg(long)]
        max_age_hours: Option<u64>,

        /// Delete every generated scene input regardless of age
        #[arg(long)]
        force: bool,
    },

    /// Run every job of a TOML manifest in order
    Batch {
        /// Manifest with `[[jobs]]` entries
        manifest: PathBuf,

        /// Directory receiving `<label>.<ext>` copies
        #[arg(long)]
        target_dir: PathBuf,

        /// Per-job completion deadline in minutes
        #[arg(long, default_value_t = 30)]
        deadline_minutes: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    init_tracing(&default_filter(&args.log_level), args.log_json);

    let project_root = match args.project_root {
        Some(root) => root,
        None => std::env::current_dir().context("Cannot determine working directory")?,
    };
    let config_path = args
        .config
        .clone()
        .or_else(|| user_config_path(&project_root));
    let config = load_config(config_path.as_deref(), &project_root)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        project_root = %project_root.display(),
        config = ?config_path,
        output_dir = %config.paths.output_dir.display(),
        "Starting strobe-daemon"
    );

    let ctx = RenderContext::new(config);
    ctx.artifacts().ensure_directories()?;

    match args.command {
        Command::Sweep {
            max_age_hours,
            force,
        } => {
            let hours = max_age_hours.unwrap_or(ctx.config().cleanup.max_age_hours);
            let deleted = ctx.sweep(hours_to_duration(hours), force).await;
            print_json(&serde_json::json!({ "deleted": deleted }))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Render {
            rotation_speed,
            flash_frequency,
            quality,
            job_id,
            poll_ms,
        } => {
            startup_sweep(&ctx).await;
            let job_id = job_id.unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
            let request = JobRequest::new(job_id, rotation_speed, flash_frequency, quality);
            render_one(&ctx, request, Duration::from_millis(poll_ms)).await
        }
        Command::Batch {
            manifest,
            target_dir,
            deadline_minutes,
        } => {
            startup_sweep(&ctx).await;
            let manifest = BatchManifest::load(&manifest)?;
            let mut options = BatchOptions::new(target_dir);
            options.deadline = Duration::from_secs(deadline_minutes.saturating_mul(60));
            let results = BatchRunner::new(ctx, options).run(&manifest.jobs).await;
            print_json(&results)?;
            if results.iter().all(|r| r.success) {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
    }
}

/// Submit `request` and print a JSON snapshot whenever progress or the task
/// label changes.
async fn render_one(
    ctx: &RenderContext,
    request: JobRequest,
    poll: Duration,
) -> anyhow::Result<ExitCode> {
    let job_id = request.job_id.clone();
    if ctx.submit(request).await == Admission::Busy {
        anyhow::bail!("A render is already in progress");
    }

    let follow = async {
        let mut last: Option<(u8, String)> = None;
        loop {
            let status = ctx.status().await;
            let key = (status.progress, status.current_task.clone());
            if last.as_ref() != Some(&key) {
                print_json(&status)?;
                last = Some(key);
            }
            if !status.running {
                return anyhow::Ok(());
            }
            tokio::time::sleep(poll).await;
        }
    };

    tokio::select! {
        result = follow => result?,
        _ = tokio::signal::ctrl_c() => {
            warn!(job_id = %job_id, "Interrupted, abandoning render");
            return Ok(ExitCode::FAILURE);
        }
    }

    ctx.wait_idle().await;
    let status = ctx.status().await;
    if !status.succeeded() {
        return Ok(ExitCode::FAILURE);
    }
    if let Some(path) = ctx.output_path(&job_id) {
        print_json(&serde_json::json!({
            "job_id": job_id,
            "output": path,
            "elapsed": status.elapsed_label(),
        }))?;
    }
    Ok(ExitCode::SUCCESS)
}

async fn startup_sweep(ctx: &RenderContext) {
    let cleanup = &ctx.config().cleanup;
    if !cleanup.sweep_on_startup {
        return;
    }
    let deleted = ctx
        .sweep(hours_to_duration(cleanup.max_age_hours), false)
        .await;
    info!(deleted, "Startup sweep finished");
}

/// `<user config dir>/strobe/strobe.toml`, used only when the project root
/// has no config of its own.
fn user_config_path(project_root: &Path) -> Option<PathBuf> {
    if project_root.join(CONFIG_FILE_NAME).exists() {
        return None;
    }
    dirs::config_dir()
        .map(|dir| dir.join("strobe").join(CONFIG_FILE_NAME))
        .filter(|path| path.is_file())
}

const fn hours_to_duration(hours: u64) -> Duration {
    Duration::from_secs(hours.saturating_mul(3600))
}

#[allow(clippy::print_stdout)]
fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}
