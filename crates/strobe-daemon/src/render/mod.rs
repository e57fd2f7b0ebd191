//! Render tool supervision.
//!
//! A job's render runs as a finite sequence of attempts: the primary
//! strategy, then at most one fallback. Each attempt's diagnostics are kept
//! so a final failure can report both.

pub mod error;
pub mod strategy;
pub mod supervisor;

pub use error::{AttemptFailure, JobError};
pub use strategy::{RenderInvocation, Strategy};
pub use supervisor::{RenderOutcome, SubprocessSupervisor};
