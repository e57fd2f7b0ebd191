//! Scene input generation.
//!
//! The render tool consumes a generated script. Only the seam matters to the
//! job pipeline: a [`SceneSource`] turns a request into script text.

use std::path::{Path, PathBuf};

use strobe_core::JobRequest;
use tracing::debug;

/// File name of an on-disk template override inside the scenes directory.
pub const TEMPLATE_FILE_NAME: &str = "manim_template.py";

/// Placeholders substituted into the template.
const RPM_PLACEHOLDER: &str = "{rotation_speed_rpm}";
const HZ_PLACEHOLDER: &str = "{flash_frequency_hz}";
const FONT_PLACEHOLDER: &str = "{font_family}";

const BUILTIN_TEMPLATE: &str = r#"from manim import *
import numpy as np


class StroboscopicEffectDynamic(Scene):
    def construct(self):
        rotation_speed_rpm = {rotation_speed_rpm}
        flash_frequency_hz = {flash_frequency_hz}
        duration = 12

        title = Text("Stroboscopic effect", font="{font_family}").to_edge(UP)
        disk = Circle(radius=1.8, color=BLUE, fill_opacity=0.3)
        pointer = Line(ORIGIN, 1.4 * RIGHT, color=YELLOW, stroke_width=6)
        self.add(title, disk, pointer)

        if flash_frequency_hz == 0:
            angle = rotation_speed_rpm * 2 * PI / 60 * duration
            self.play(Rotate(pointer, angle=angle, about_point=ORIGIN, run_time=duration),
                      rate_func=linear)
        else:
            relative = flash_frequency_hz - rotation_speed_rpm / 60
            unit = abs(relative) - int(np.floor(abs(relative)))
            fr = unit if relative >= 0 else -unit
            frame = 1.0 / config.frame_rate
            for _ in range(int(duration * config.frame_rate)):
                self.play(Rotate(pointer, angle=fr * 2 * PI * frame, about_point=ORIGIN,
                                 run_time=frame), rate_func=linear)
        self.wait(1)
"#;

/// Errors producing scene text.
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("Failed to read scene template {path}: {source}")]
    Template {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Produces the tool's input script for a request.
pub trait SceneSource: Send + Sync {
    fn render_scene(&self, request: &JobRequest) -> Result<String, SceneError>;
}

/// Template-based scene source.
///
/// The override file is re-read for every job so edits apply without a
/// restart; the built-in template is used when it is absent.
#[derive(Debug, Clone)]
pub struct TemplateScene {
    template_path: PathBuf,
    font_family: String,
}

impl TemplateScene {
    pub fn new(scenes_dir: &Path, font_family: impl Into<String>) -> Self {
        Self {
            template_path: scenes_dir.join(TEMPLATE_FILE_NAME),
            font_family: font_family.into(),
        }
    }

    fn load_template(&self) -> Result<String, SceneError> {
        if self.template_path.exists() {
            debug!(path = %self.template_path.display(), "Loading scene template override");
            std::fs::read_to_string(&self.template_path).map_err(|source| SceneError::Template {
                path: self.template_path.clone(),
                source,
            })
        } else {
            Ok(BUILTIN_TEMPLATE.to_string())
        }
    }
}

impl SceneSource for TemplateScene {
    fn render_scene(&self, request: &JobRequest) -> Result<String, SceneError> {
        let template = self.load_template()?;
        Ok(template
            .replace(RPM_PLACEHOLDER, &format_number(request.rotation_speed_rpm))
            .replace(HZ_PLACEHOLDER, &format_number(request.flash_frequency_hz))
            .replace(FONT_PLACEHOLDER, &self.font_family))
    }
}

/// Python-literal rendering of a float (always carries a decimal point).
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use strobe_core::QualityLevel;
    use tempfile::TempDir;

    fn request() -> JobRequest {
        JobRequest::new("job-1", 30.0, 25.5, QualityLevel::Low)
    }

    #[test]
    fn builtin_template_substitutes_parameters() {
        let dir = TempDir::new().unwrap();
        let scene = TemplateScene::new(dir.path(), "DejaVu Sans");
        let text = scene.render_scene(&request()).unwrap();
        assert!(text.contains("rotation_speed_rpm = 30.0"));
        assert!(text.contains("flash_frequency_hz = 25.5"));
        assert!(text.contains("font=\"DejaVu Sans\""));
        assert!(!text.contains('{'));
    }

    #[test]
    fn override_file_is_preferred_and_reread() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(TEMPLATE_FILE_NAME);
        std::fs::write(&path, "rpm={rotation_speed_rpm}").unwrap();
        let scene = TemplateScene::new(dir.path(), "x");
        assert_eq!(scene.render_scene(&request()).unwrap(), "rpm=30.0");

        std::fs::write(&path, "hz={flash_frequency_hz}").unwrap();
        assert_eq!(scene.render_scene(&request()).unwrap(), "hz=25.5");
    }
}
