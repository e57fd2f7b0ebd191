//! Progress parser for the render tool's text output.
//!
//! The tool reports its own 0-100% in one of two line shapes. Reports are
//! mapped onto a sub-range of the job's progress scale and ratcheted so a
//! published value never goes backwards.

mod parser;
mod types;

pub use parser::{ProgressParser, is_diagnostic};
pub use types::*;

/// Job-progress values the worker publishes outside the tool's window.
///
/// The window must sit between [`LAUNCHING`](checkpoint::LAUNCHING) and
/// [`PROCESSING_OUTPUT`](checkpoint::PROCESSING_OUTPUT) for polled progress
/// to stay non-decreasing; `Config::validate` enforces this.
pub mod checkpoint {
    pub const GENERATING_SCENE: u8 = 10;
    pub const PREPARING_ARGUMENTS: u8 = 20;
    pub const LAUNCHING: u8 = 30;
    pub const PROCESSING_OUTPUT: u8 = 90;
}
