//! Invocation strategies and command construction.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use strobe_core::config::{QualityProfile, RenderConfig};
use tokio::process::Command;

/// Which backend variant of the render tool an attempt uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    Primary,
    Fallback,
}

impl Strategy {
    /// The attempt that follows a failure of this one, if any.
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Primary => Some(Self::Fallback),
            Self::Fallback => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to launch the render tool for one job.
#[derive(Debug, Clone)]
pub struct RenderInvocation {
    pub program: String,
    pub program_args: Vec<String>,
    pub primary_renderer: String,
    pub fallback_renderer: String,
    pub output_format: String,
    pub quality_flag: String,
    pub fps: u32,
    /// Directory handed to the tool as its media root.
    pub media_dir: PathBuf,
    pub output_file: String,
    pub input_path: PathBuf,
    pub entry_point: String,
}

impl RenderInvocation {
    pub fn new(
        render: &RenderConfig,
        profile: &QualityProfile,
        media_dir: &Path,
        output_file: String,
        input_path: &Path,
    ) -> Self {
        Self {
            program: render.program.clone(),
            program_args: render.program_args.clone(),
            primary_renderer: render.primary_renderer.clone(),
            fallback_renderer: render.fallback_renderer.clone(),
            output_format: render.output_format.clone(),
            quality_flag: profile.flag.clone(),
            fps: profile.fps,
            media_dir: absolute(media_dir),
            output_file,
            input_path: absolute(input_path),
            entry_point: render.entry_point.clone(),
        }
    }

    pub fn renderer(&self, strategy: Strategy) -> &str {
        match strategy {
            Strategy::Primary => &self.primary_renderer,
            Strategy::Fallback => &self.fallback_renderer,
        }
    }

    /// Full argument vector for `strategy`, excluding the program itself.
    pub fn args(&self, strategy: Strategy) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.program_args.iter().map(OsString::from).collect();
        args.extend(
            [
                "--renderer",
                self.renderer(strategy),
                "--format",
                self.output_format.as_str(),
                self.quality_flag.as_str(),
                "--disable_caching",
                "--media_dir",
            ]
            .map(OsString::from),
        );
        args.push(self.media_dir.clone().into_os_string());
        args.push("--output_file".into());
        args.push(self.output_file.clone().into());
        args.push("--progress_bar".into());
        args.push("display".into());
        args.push("--fps".into());
        args.push(self.fps.to_string().into());
        args.push(self.input_path.clone().into_os_string());
        args.push(self.entry_point.clone().into());
        args
    }

    /// Command for `strategy` with stdout and stderr piped for streaming.
    pub fn command(&self, strategy: Strategy) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args(strategy))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Command line rendered for logs.
    pub fn display(&self, strategy: Strategy) -> String {
        std::iter::once(self.program.clone())
            .chain(
                self.args(strategy)
                    .iter()
                    .map(|a| a.to_string_lossy().into_owned()),
            )
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strobe_core::Config;

    fn invocation() -> RenderInvocation {
        let config = Config::default();
        RenderInvocation::new(
            &config.render,
            &config.quality.medium,
            Path::new("/srv/out"),
            "stroboscope_j1.mp4".to_string(),
            Path::new("/srv/scenes/manim_scene_j1.py"),
        )
    }

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn attempts_form_a_two_step_sequence() {
        assert_eq!(Strategy::Primary.next(), Some(Strategy::Fallback));
        assert_eq!(Strategy::Fallback.next(), None);
    }

    #[test]
    fn primary_args_carry_every_flag_in_order() {
        let args = strings(invocation().args(Strategy::Primary));
        assert_eq!(
            args,
            [
                "-m",
                "manim",
                "render",
                "--renderer",
                "opengl",
                "--format",
                "mp4",
                "-qm",
                "--disable_caching",
                "--media_dir",
                "/srv/out",
                "--output_file",
                "stroboscope_j1.mp4",
                "--progress_bar",
                "display",
                "--fps",
                "30",
                "/srv/scenes/manim_scene_j1.py",
                "StroboscopicEffectDynamic",
            ]
        );
    }

    #[test]
    fn fallback_differs_only_in_renderer() {
        let inv = invocation();
        let primary = strings(inv.args(Strategy::Primary));
        let fallback = strings(inv.args(Strategy::Fallback));
        let diffs: Vec<_> = primary
            .iter()
            .zip(&fallback)
            .filter(|(a, b)| a != b)
            .collect();
        assert_eq!(diffs, [(&"opengl".to_string(), &"cairo".to_string())]);
    }

    #[test]
    fn display_starts_with_program() {
        assert!(invocation()
            .display(Strategy::Primary)
            .starts_with("python3 -m manim render --renderer opengl"));
    }
}
