//! Error types for the loader
//!
//! Per-file and per-bundle failures are values of [`LoaderError`]; the bundle
//! loader turns them into batch accounting entries. Only a structurally
//! invalid batch document or an interrupt stops a whole run.

use refload_common::CommonError;
use thiserror::Error;

/// Result type alias for loader operations
pub type Result<T> = std::result::Result<T, LoaderError>;

/// A batch entry (or the whole batch document) does not have the expected shape.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Parse error: {0}")]
pub struct ParseError(pub String);

impl ParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Main error type for loading operations
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A file cannot be accessed through the given URL
    #[error("File URL error: {0}")]
    FileUrl(String),

    #[error("No input file size is available for file being loaded by reference: {filename}")]
    MissingInputFileSize { filename: String },

    #[error("Input file size does not match actual {provider} file size: input size: {declared}, {provider} actual size: {observed}")]
    InconsistentFileSizeValues {
        provider: String,
        declared: u64,
        observed: u64,
    },

    /// The destination store answered with a status outside its contract
    #[error("Received unexpected response code {status} from the data store ({context})")]
    UnexpectedResponse { status: u16, context: String },

    #[error("File {source_url}: registration FAILED (timed out after {elapsed_secs}s)")]
    RegistrationTimedOut { source_url: String, elapsed_secs: u64 },

    #[error("File {source_url}: Unexpected server response during registration (status {status})")]
    RegistrationFailed { source_url: String, status: u16 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Staging error: {0}")]
    Staging(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LoaderError {
    pub fn file_url(msg: impl Into<String>) -> Self {
        Self::FileUrl(msg.into())
    }

    pub fn staging(msg: impl Into<String>) -> Self {
        Self::Staging(msg.into())
    }

    pub fn credential(msg: impl Into<String>) -> Self {
        Self::Credential(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn unexpected_response(status: u16, context: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            status,
            context: context.into(),
        }
    }
}

impl From<CommonError> for LoaderError {
    fn from(err: CommonError) -> Self {
        match err {
            CommonError::InvalidCloudUrl { .. } | CommonError::UnsupportedScheme { .. } => {
                LoaderError::FileUrl(err.to_string())
            },
            CommonError::Io(e) => LoaderError::Io(e),
            CommonError::Serialization(e) => LoaderError::Json(e),
            CommonError::Config(msg) => LoaderError::Config(msg),
        }
    }
}
