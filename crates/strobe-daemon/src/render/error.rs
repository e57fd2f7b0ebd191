//! Job failure taxonomy.

use std::path::PathBuf;

use thiserror::Error;

use super::strategy::Strategy;
use crate::artifacts::ArtifactError;
use crate::scene::SceneError;

/// Why a single render attempt failed.
#[derive(Debug, Clone, Error)]
pub enum AttemptFailure {
    #[error("{strategy} renderer '{renderer}' could not be started: {reason}")]
    Spawn {
        strategy: Strategy,
        renderer: String,
        reason: String,
    },

    #[error("{strategy} renderer '{renderer}' exited with {}. Output: {diagnostics}", describe_exit(*.exit_code))]
    Subprocess {
        strategy: Strategy,
        renderer: String,
        exit_code: Option<i32>,
        diagnostics: String,
    },

    #[error(
        "{strategy} renderer '{renderer}' reported success but no output was found (expected {}). Output: {diagnostics}",
        expected.display()
    )]
    ArtifactMissing {
        strategy: Strategy,
        renderer: String,
        expected: PathBuf,
        diagnostics: String,
    },
}

impl AttemptFailure {
    pub const fn strategy(&self) -> Strategy {
        match self {
            Self::Spawn { strategy, .. }
            | Self::Subprocess { strategy, .. }
            | Self::ArtifactMissing { strategy, .. } => *strategy,
        }
    }
}

/// Terminal job failure; its message is what pollers see.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Required executable not found: {binary}")]
    MissingDependency { binary: String },

    #[error("Failed to generate scene input: {0}")]
    Scene(#[from] SceneError),

    #[error("Failed to prepare job files: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("{}", summarize(.attempts))]
    AttemptsExhausted { attempts: Vec<AttemptFailure> },
}

fn describe_exit(code: Option<i32>) -> String {
    code.map_or_else(
        || "no exit code (terminated by signal)".to_string(),
        |c| format!("exit code {c}"),
    )
}

fn summarize(attempts: &[AttemptFailure]) -> String {
    let details = attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    format!("Render failed after {} attempt(s): {details}", attempts.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_message_mentions_both_attempts() {
        let err = JobError::AttemptsExhausted {
            attempts: vec![
                AttemptFailure::Subprocess {
                    strategy: Strategy::Primary,
                    renderer: "opengl".into(),
                    exit_code: Some(1),
                    diagnostics: "no GL context".into(),
                },
                AttemptFailure::ArtifactMissing {
                    strategy: Strategy::Fallback,
                    renderer: "cairo".into(),
                    expected: PathBuf::from("/out/stroboscope_j.mp4"),
                    diagnostics: "done".into(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("Render failed after 2 attempt(s)"));
        assert!(msg.contains("primary renderer 'opengl' exited with exit code 1"));
        assert!(msg.contains("no GL context"));
        assert!(msg.contains("fallback renderer 'cairo' reported success"));
        assert!(msg.contains("/out/stroboscope_j.mp4"));
    }

    #[test]
    fn signal_exit_is_described() {
        let failure = AttemptFailure::Subprocess {
            strategy: Strategy::Fallback,
            renderer: "cairo".into(),
            exit_code: None,
            diagnostics: String::new(),
        };
        assert!(failure.to_string().contains("terminated by signal"));
        assert_eq!(failure.strategy(), Strategy::Fallback);
    }
}
