//! Error types shared across refload crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Common error type
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid cloud URL '{url}': {reason}")]
    InvalidCloudUrl { url: String, reason: String },

    #[error("Unsupported cloud URL scheme '{scheme}' in '{url}'")]
    UnsupportedScheme { url: String, scheme: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CommonError {
    pub fn invalid_cloud_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidCloudUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }
}
