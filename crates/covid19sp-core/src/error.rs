//! Error types for configuration loading and validation

use thiserror::Error;

/// Result type alias for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating the offline cache configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Invalid cache version: {0}")]
    InvalidVersion(String),
}

impl ConfigError {
    /// Create a new scope error
    pub fn scope(msg: impl Into<String>) -> Self {
        Self::InvalidScope(msg.into())
    }

    /// Create a new manifest error
    pub fn manifest(msg: impl Into<String>) -> Self {
        Self::InvalidManifest(msg.into())
    }
}
