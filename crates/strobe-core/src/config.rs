//! Configuration resolution for strobe.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. TOML config file (`strobe.toml` in the project root, or `--config`)
//! 3. Environment variables (`STROBE_*`)
//! 4. CLI arguments (highest priority, applied by the binary)

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::job::QualityLevel;
use crate::progress::checkpoint;

/// Name of the project-local config file.
pub const CONFIG_FILE_NAME: &str = "strobe.toml";

/// Complete strobe configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub render: RenderConfig,
    pub quality: QualityProfiles,
    pub cleanup: CleanupConfig,
}

/// Directories managed by the artifact lifecycle.
///
/// Relative entries are resolved against the project root by
/// [`Config::resolve_paths`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Ephemeral scene inputs, deleted after every job.
    pub scenes_dir: PathBuf,
    /// Canonical output directory for finished renders.
    pub output_dir: PathBuf,
    /// Scratch files; swept by age only.
    pub temp_dir: PathBuf,
    /// Additional roots searched when the render lands outside `output_dir`.
    pub extra_search_roots: Vec<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            scenes_dir: PathBuf::from("manim_scenes"),
            output_dir: PathBuf::from("static/animations"),
            temp_dir: PathBuf::from("temp_files"),
            extra_search_roots: vec![PathBuf::from("media"), PathBuf::from("media/videos")],
        }
    }
}

/// How the external render tool is invoked and how its output is read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Executable launched for every attempt.
    pub program: String,
    /// Arguments placed before the generated flags.
    pub program_args: Vec<String>,
    /// Executables that must resolve on `PATH` before a job may start.
    pub required_binaries: Vec<String>,
    pub primary_renderer: String,
    pub fallback_renderer: String,
    pub output_format: String,
    pub output_prefix: String,
    pub input_prefix: String,
    pub input_extension: String,
    /// Extension of the metadata file the tool may drop next to its output.
    pub sidecar_extension: String,
    /// Scene class rendered from the generated input.
    pub entry_point: String,
    pub font_family: String,
    /// Start of the job-progress window the tool's 0-100% is mapped onto.
    pub progress_floor: u8,
    /// End of the job-progress window; published once the stream ends.
    pub progress_ceiling: u8,
    /// Pause between child exit and the artifact probe.
    pub settle_delay_ms: u64,
    /// Output lines retained per attempt for failure messages.
    pub diagnostic_tail_lines: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            program_args: vec!["-m".to_string(), "manim".to_string(), "render".to_string()],
            required_binaries: vec!["ffmpeg".to_string()],
            primary_renderer: "opengl".to_string(),
            fallback_renderer: "cairo".to_string(),
            output_format: "mp4".to_string(),
            output_prefix: "stroboscope".to_string(),
            input_prefix: "manim_scene_".to_string(),
            input_extension: "py".to_string(),
            sidecar_extension: "json".to_string(),
            entry_point: "StroboscopicEffectDynamic".to_string(),
            font_family: "Noto Sans CJK SC".to_string(),
            progress_floor: 40,
            progress_ceiling: 85,
            settle_delay_ms: 1000,
            diagnostic_tail_lines: 40,
        }
    }
}

/// Render settings for one quality level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityProfile {
    /// Tool flag selecting the resolution preset (e.g. `-ql`).
    pub flag: String,
    pub name: String,
    pub resolution: String,
    pub fps: u32,
    /// Human label shown to pollers as the job's estimate.
    pub time_estimate: String,
}

/// The three quality profiles, keyed by level.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityProfiles {
    pub low: QualityProfile,
    pub medium: QualityProfile,
    pub high: QualityProfile,
}

impl Default for QualityProfiles {
    fn default() -> Self {
        Self {
            low: QualityProfile {
                flag: "-ql".to_string(),
                name: "fast".to_string(),
                resolution: "480p".to_string(),
                fps: 15,
                time_estimate: "15-30s".to_string(),
            },
            medium: QualityProfile {
                flag: "-qm".to_string(),
                name: "standard".to_string(),
                resolution: "720p".to_string(),
                fps: 30,
                time_estimate: "30-60s".to_string(),
            },
            high: QualityProfile {
                flag: "-qh".to_string(),
                name: "high".to_string(),
                resolution: "1080p".to_string(),
                fps: 60,
                time_estimate: "60-120s".to_string(),
            },
        }
    }
}

impl QualityProfiles {
    pub const fn get(&self, level: QualityLevel) -> &QualityProfile {
        match level {
            QualityLevel::Low => &self.low,
            QualityLevel::Medium => &self.medium,
            QualityLevel::High => &self.high,
        }
    }
}

/// Sweep defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub max_age_hours: u64,
    pub sweep_on_startup: bool,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            max_age_hours: 1,
            sweep_on_startup: true,
        }
    }
}

impl Config {
    /// Check cross-field invariants the rest of the system relies on.
    pub fn validate(&self) -> Result<()> {
        let render = &self.render;
        if render.program.trim().is_empty() {
            return Err(Error::Config("render.program must not be empty".into()));
        }
        if render.progress_floor >= render.progress_ceiling {
            return Err(Error::Config(format!(
                "render.progress_floor ({}) must be below render.progress_ceiling ({})",
                render.progress_floor, render.progress_ceiling
            )));
        }
        if render.progress_floor < checkpoint::LAUNCHING {
            return Err(Error::Config(format!(
                "render.progress_floor must be at least {}, got {}",
                checkpoint::LAUNCHING,
                render.progress_floor
            )));
        }
        if render.progress_ceiling > checkpoint::PROCESSING_OUTPUT {
            return Err(Error::Config(format!(
                "render.progress_ceiling must be at most {}, got {}",
                checkpoint::PROCESSING_OUTPUT,
                render.progress_ceiling
            )));
        }
        for level in [QualityLevel::Low, QualityLevel::Medium, QualityLevel::High] {
            if self.quality.get(level).fps == 0 {
                return Err(Error::Config(format!("quality.{level}.fps must be positive")));
            }
        }
        Ok(())
    }

    /// Return a copy whose relative paths are anchored at `root`.
    #[must_use]
    pub fn resolve_paths(mut self, root: &Path) -> Self {
        let anchor = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                root.join(p)
            }
        };
        self.paths.scenes_dir = anchor(&self.paths.scenes_dir);
        self.paths.output_dir = anchor(&self.paths.output_dir);
        self.paths.temp_dir = anchor(&self.paths.temp_dir);
        self.paths.extra_search_roots = self
            .paths
            .extra_search_roots
            .iter()
            .map(|p| anchor(p))
            .collect();
        self
    }
}

/// Load configuration with hierarchical resolution.
///
/// `explicit` is a file named on the command line and must exist; otherwise
/// `<project_root>/strobe.toml` is used when present.
pub fn load_config(explicit: Option<&Path>, project_root: &Path) -> Result<Config> {
    let mut config = match explicit {
        Some(path) => load_config_file(path)?,
        None => {
            let local = project_root.join(CONFIG_FILE_NAME);
            if local.exists() {
                load_config_file(&local)?
            } else {
                Config::default()
            }
        }
    };

    apply_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config.resolve_paths(project_root))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    if content.trim().is_empty() {
        return Ok(Config::default());
    }
    Ok(toml::from_str(&content)?)
}

/// Apply `STROBE_*` overrides read through `lookup`.
pub fn apply_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("STROBE_RENDER_PROGRAM") {
        config.render.program = val;
    }
    if let Some(val) = lookup("STROBE_PRIMARY_RENDERER") {
        config.render.primary_renderer = val;
    }
    if let Some(val) = lookup("STROBE_FALLBACK_RENDERER") {
        config.render.fallback_renderer = val;
    }
    if let Some(val) = lookup("STROBE_OUTPUT_DIR") {
        config.paths.output_dir = PathBuf::from(val);
    }
    if let Some(val) = lookup("STROBE_SCENES_DIR") {
        config.paths.scenes_dir = PathBuf::from(val);
    }
    if let Some(val) = lookup("STROBE_FONT_FAMILY") {
        config.render.font_family = val;
    }
    if let Some(val) = lookup("STROBE_CLEANUP_HOURS")
        && let Ok(n) = val.parse()
    {
        config.cleanup.max_age_hours = n;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn default_progress_window_is_40_to_85() {
        let config = Config::default();
        assert_eq!(config.render.progress_floor, 40);
        assert_eq!(config.render.progress_ceiling, 85);
    }

    #[test]
    fn partial_toml_keeps_remaining_defaults() {
        let config: Config = toml::from_str(
            r#"
[render]
program = "manim"
program_args = []

[quality.high]
flag = "-qk"
name = "4k"
resolution = "2160p"
fps = 60
time_estimate = "5-10min"
"#,
        )
        .unwrap();
        assert_eq!(config.render.program, "manim");
        assert!(config.render.program_args.is_empty());
        assert_eq!(config.render.fallback_renderer, "cairo");
        assert_eq!(config.quality.high.flag, "-qk");
        assert_eq!(config.quality.low.flag, "-ql");
        assert_eq!(config.cleanup.max_age_hours, 1);
    }

    #[test]
    fn legacy_logs_dir_key_is_ignored() {
        let config: Config =
            toml::from_str("[paths]\nlogs_dir = \"logs\"\noutput_dir = \"out\"\n").unwrap();
        assert_eq!(config.paths.output_dir, PathBuf::from("out"));
        config.validate().unwrap();
    }

    #[test]
    fn inverted_window_is_rejected() {
        let mut config = Config::default();
        config.render.progress_floor = 90;
        config.render.progress_ceiling = 80;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn ceiling_above_100_is_rejected() {
        let mut config = Config::default();
        config.render.progress_ceiling = 120;
        assert!(config.validate().is_err());
    }

    #[test]
    fn floor_below_launch_checkpoint_is_rejected() {
        let mut config = Config::default();
        config.render.progress_floor = 20;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("progress_floor must be at least 30"), "{err}");

        config.render.progress_floor = checkpoint::LAUNCHING;
        config.validate().unwrap();
    }

    #[test]
    fn ceiling_above_processing_checkpoint_is_rejected() {
        let mut config = Config::default();
        config.render.progress_ceiling = 95;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("progress_ceiling must be at most 90"), "{err}");

        config.render.progress_ceiling = checkpoint::PROCESSING_OUTPUT;
        config.validate().unwrap();
    }

    #[test]
    fn overrides_replace_values() {
        let mut config = Config::default();
        apply_overrides(&mut config, |key| match key {
            "STROBE_RENDER_PROGRAM" => Some("/opt/manim".to_string()),
            "STROBE_CLEANUP_HOURS" => Some("6".to_string()),
            _ => None,
        });
        assert_eq!(config.render.program, "/opt/manim");
        assert_eq!(config.cleanup.max_age_hours, 6);
    }

    #[test]
    fn unparsable_numeric_override_is_ignored() {
        let mut config = Config::default();
        apply_overrides(&mut config, |key| {
            (key == "STROBE_CLEANUP_HOURS").then(|| "soon".to_string())
        });
        assert_eq!(config.cleanup.max_age_hours, 1);
    }

    #[test]
    fn relative_paths_resolve_against_root() {
        let root = Path::new("/srv/strobe");
        let config = Config::default().resolve_paths(root);
        assert_eq!(config.paths.output_dir, root.join("static/animations"));
        assert_eq!(config.paths.extra_search_roots[0], root.join("media"));
    }

    #[test]
    fn load_reads_project_local_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[cleanup]\nmax_age_hours = 12\nsweep_on_startup = false\n",
        )
        .unwrap();
        let config = load_config(None, dir.path()).unwrap();
        assert!(!config.cleanup.sweep_on_startup);
        assert_eq!(config.paths.scenes_dir, dir.path().join("manim_scenes"));
    }

    #[test]
    fn load_reports_malformed_toml() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "[render\nprogram = 1\n").unwrap();
        assert!(matches!(load_config(None, dir.path()), Err(Error::Toml(_))));
    }

    #[test]
    fn load_fails_for_missing_explicit_file() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            load_config(Some(&missing), dir.path()),
            Err(Error::Config(_))
        ));
    }
}
