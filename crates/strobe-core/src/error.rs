//! Error types for the strobe core library.

use thiserror::Error;

/// Result type alias using strobe's core Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for strobe operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// TOML configuration could not be parsed
    #[error("Failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),
}
