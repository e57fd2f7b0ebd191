//! strobe Daemon Library
//!
//! Runtime for single-flight render jobs:
//! - Admission gate allowing one job at a time
//! - Shared status store polled by front ends
//! - Render subprocess supervision with a fallback strategy
//! - Scene input generation and output artifact lifecycle
//! - Sequential batch runner

pub mod artifacts;
pub mod batch;
pub mod context;
pub mod gate;
pub mod render;
pub mod scene;
pub mod status;

pub use context::RenderContext;
pub use gate::Admission;
pub use status::JobStatus;
