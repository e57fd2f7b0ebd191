//! strobe Core Library
//!
//! Shared functionality for strobe components:
//! - Progress parsing for the render tool's text output
//! - Configuration resolution and hierarchy
//! - Job request and quality profile model
//! - Common error types

pub mod config;
pub mod error;
pub mod job;
pub mod progress;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use job::{JobRequest, QualityLevel};
