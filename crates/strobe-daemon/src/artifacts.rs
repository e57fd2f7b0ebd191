//! Render artifact lifecycle.
//!
//! Two kinds of files are managed:
//! - the ephemeral scene *input*, written just before a job invokes the tool
//!   and deleted exactly once when the job ends;
//! - the rendered *output*, which lives until a sweep removes it.
//!
//! The tool does not always honour the requested output location, so output
//! discovery falls back to a fixed-order search and relocates what it finds to
//! the canonical `<prefix>_<job-id>.<ext>` path.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use strobe_core::Config;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Errors from artifact operations that must fail the job.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ArtifactError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Ephemeral scene input for one job.
///
/// Deleted exactly once: by [`InputArtifact::discard`], or on drop if the
/// job path never got that far.
#[derive(Debug)]
pub struct InputArtifact {
    path: PathBuf,
    removed: bool,
}

impl InputArtifact {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the input file. Failures are logged, never propagated.
    pub fn discard(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => info!(path = %self.path.display(), "Removed scene input"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Scene input already gone");
            }
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove scene input"),
        }
    }
}

impl Drop for InputArtifact {
    fn drop(&mut self) {
        self.remove();
    }
}

/// Filesystem layout and naming rules for render artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactLifecycle {
    scenes_dir: PathBuf,
    output_dir: PathBuf,
    temp_dir: PathBuf,
    extra_search_roots: Vec<PathBuf>,
    output_prefix: String,
    output_extension: String,
    input_prefix: String,
    input_extension: String,
    sidecar_extension: String,
}

impl ArtifactLifecycle {
    /// Build from a configuration whose paths are already resolved.
    pub fn from_config(config: &Config) -> Self {
        Self {
            scenes_dir: config.paths.scenes_dir.clone(),
            output_dir: config.paths.output_dir.clone(),
            temp_dir: config.paths.temp_dir.clone(),
            extra_search_roots: config.paths.extra_search_roots.clone(),
            output_prefix: config.render.output_prefix.clone(),
            output_extension: config.render.output_format.clone(),
            input_prefix: config.render.input_prefix.clone(),
            input_extension: config.render.input_extension.clone(),
            sidecar_extension: config.render.sidecar_extension.clone(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn output_extension(&self) -> &str {
        &self.output_extension
    }

    /// Create every managed directory.
    pub fn ensure_directories(&self) -> Result<(), ArtifactError> {
        for dir in [&self.scenes_dir, &self.output_dir, &self.temp_dir] {
            std::fs::create_dir_all(dir).map_err(|e| ArtifactError::io(dir, e))?;
        }
        Ok(())
    }

    /// `<prefix>_<job-id>.<ext>`
    pub fn output_file_name(&self, job_id: &str) -> String {
        format!("{}_{}.{}", self.output_prefix, job_id, self.output_extension)
    }

    pub fn canonical_output_path(&self, job_id: &str) -> PathBuf {
        self.output_dir.join(self.output_file_name(job_id))
    }

    pub fn input_path(&self, job_id: &str) -> PathBuf {
        self.scenes_dir
            .join(format!("{}{}.{}", self.input_prefix, job_id, self.input_extension))
    }

    /// Write the scene input for `job_id`.
    pub fn write_input(&self, job_id: &str, content: &str) -> Result<InputArtifact, ArtifactError> {
        std::fs::create_dir_all(&self.scenes_dir)
            .map_err(|e| ArtifactError::io(&self.scenes_dir, e))?;
        let path = self.input_path(job_id);
        std::fs::write(&path, content).map_err(|e| ArtifactError::io(&path, e))?;
        info!(job_id, path = %path.display(), "Wrote scene input");
        Ok(InputArtifact {
            path,
            removed: false,
        })
    }

    /// Canonical output for `job_id`, if it exists.
    pub fn existing_output(&self, job_id: &str) -> Option<PathBuf> {
        let path = self.canonical_output_path(job_id);
        path.is_file().then_some(path)
    }

    /// Roots searched, in order, when the canonical path is empty.
    pub fn search_roots(&self) -> Vec<PathBuf> {
        let mut roots = vec![self.output_dir.clone(), self.output_dir.join("videos")];
        roots.extend(self.extra_search_roots.iter().cloned());
        roots
    }

    /// Locate the rendered output for `job_id`.
    ///
    /// Checks the canonical path first, then walks each search root in a fixed
    /// order (entries sorted by name) for a file named exactly as expected or
    /// carrying the job id as a `_`, `-` or `.` delimited token with the output
    /// extension. First match wins. Id `1` does not match `stroboscope_12.mp4`.
    pub fn discover_output(&self, job_id: &str) -> Option<PathBuf> {
        if let Some(path) = self.existing_output(job_id) {
            debug!(job_id, path = %path.display(), "Output found at canonical path");
            return Some(path);
        }

        let expected = self.output_file_name(job_id);
        for root in self.search_roots() {
            if !root.is_dir() {
                continue;
            }
            debug!(job_id, root = %root.display(), "Searching for render output");
            let direct = root.join(&expected);
            if direct.is_file() {
                return Some(direct);
            }
            let found = WalkDir::new(&root)
                .sort_by_file_name()
                .into_iter()
                .filter_map(Result::ok)
                .filter(|entry| entry.file_type().is_file())
                .find(|entry| {
                    self.matches_output(&entry.file_name().to_string_lossy(), job_id, &expected)
                });
            if let Some(entry) = found {
                info!(job_id, path = %entry.path().display(), "Output found by search");
                return Some(entry.into_path());
            }
        }

        self.log_snapshot();
        warn!(job_id, expected = %expected, "Render output not found in any search root");
        None
    }

    fn matches_output(&self, name: &str, job_id: &str, expected: &str) -> bool {
        name == expected
            || (contains_id_token(name, job_id)
                && Path::new(name)
                    .extension()
                    .is_some_and(|ext| ext == self.output_extension.as_str()))
    }

    fn log_snapshot(&self) {
        for dir in [self.output_dir.clone(), self.output_dir.join("videos")] {
            match std::fs::read_dir(&dir) {
                Ok(entries) => {
                    let mut names: Vec<String> = entries
                        .filter_map(Result::ok)
                        .map(|e| e.file_name().to_string_lossy().into_owned())
                        .collect();
                    names.sort();
                    warn!(dir = %dir.display(), entries = %names.join(", "), "Output directory snapshot");
                }
                Err(e) => warn!(dir = %dir.display(), error = %e, "Output directory not readable"),
            }
        }
    }

    /// Make a discovered output addressable at its canonical path.
    ///
    /// The file is copied, not moved. If the copy fails the discovered path is
    /// returned instead and the job still succeeds.
    pub fn settle_output(&self, found: &Path, job_id: &str) -> PathBuf {
        let canonical = self.canonical_output_path(job_id);
        if found == canonical {
            return canonical;
        }
        let copied = std::fs::create_dir_all(&self.output_dir)
            .and_then(|()| std::fs::copy(found, &canonical));
        match copied {
            Ok(_) => {
                info!(job_id, from = %found.display(), to = %canonical.display(), "Copied output to canonical path");
                canonical
            }
            Err(e) => {
                warn!(
                    job_id,
                    found = %found.display(),
                    error = %e,
                    "Failed to copy output to canonical path, reporting original location"
                );
                found.to_path_buf()
            }
        }
    }

    /// Delete the metadata file the tool may leave beside `output`.
    pub fn remove_sidecar(&self, output: &Path) {
        let sidecar = output.with_extension(&self.sidecar_extension);
        match std::fs::remove_file(&sidecar) {
            Ok(()) => info!(path = %sidecar.display(), "Removed render metadata file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %sidecar.display(), error = %e, "Failed to remove render metadata file"),
        }
    }

    /// Delete aged artifacts; returns the number of files removed.
    ///
    /// Scratch files and outputs are removed when older than `max_age`.
    /// Scene inputs are removed when older than `max_age`, or unconditionally
    /// under `force`. Per-file failures are logged and skipped.
    ///
    /// The age threshold is the only protection for a running job's input.
    pub fn sweep(&self, max_age: Duration, force: bool) -> usize {
        let now = SystemTime::now();
        let mut deleted = 0;

        for path in top_level_files(&self.temp_dir) {
            if is_older(&path, now, max_age) && remove_swept(&path, "scratch") {
                deleted += 1;
            }
        }

        if self.output_dir.is_dir() {
            let outputs: Vec<PathBuf> = WalkDir::new(&self.output_dir)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
                .map(walkdir::DirEntry::into_path)
                .filter(|p| self.is_output_like(p))
                .collect();
            for path in outputs {
                if is_older(&path, now, max_age) && remove_swept(&path, "output") {
                    deleted += 1;
                }
            }
        }

        for path in top_level_files(&self.scenes_dir) {
            if !self.is_generated_input(&path) {
                continue;
            }
            if (force || is_older(&path, now, max_age)) && remove_swept(&path, "scene input") {
                deleted += 1;
            }
        }

        info!(deleted, max_age_secs = max_age.as_secs(), force, "Sweep finished");
        deleted
    }

    fn is_output_like(&self, path: &Path) -> bool {
        path.extension().is_some_and(|ext| {
            ext == self.output_extension.as_str() || ext == self.sidecar_extension.as_str()
        })
    }

    fn is_generated_input(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
            return false;
        };
        name.starts_with(&self.input_prefix)
            && path
                .extension()
                .is_some_and(|ext| ext == self.input_extension.as_str())
    }
}

fn contains_id_token(name: &str, job_id: &str) -> bool {
    let delimits = |c: Option<char>| c.is_none_or(|c| matches!(c, '_' | '-' | '.'));
    !job_id.is_empty()
        && name.match_indices(job_id).any(|(start, _)| {
            delimits(name[..start].chars().next_back())
                && delimits(name[start + job_id.len()..].chars().next())
        })
}

fn top_level_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect()
}

fn is_older(path: &Path, now: SystemTime, max_age: Duration) -> bool {
    match std::fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => now.duration_since(modified).unwrap_or_default() > max_age,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cannot read file age, skipping");
            false
        }
    }
}

fn remove_swept(path: &Path, kind: &str) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => {
            info!(path = %path.display(), kind, "Swept file");
            true
        }
        Err(e) => {
            warn!(path = %path.display(), kind, error = %e, "Failed to sweep file");
            false
        }
    }
}
