//! Configuration for the loader
//!
//! Values come from the environment (a `.env` file is honoured by the binary)
//! and are then overridden by command-line flags.

use crate::aws::S3Settings;
use crate::error::{LoaderError, Result};
use crate::registrar::{CopyPolicy, DEFAULT_COPY_TIMEOUT_SECS};
use crate::store::dss::DEFAULT_API_TIMEOUT_SECS;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

// ============================================================================
// Loader Configuration Constants
// ============================================================================

/// Project billed for requester-pays GCS reads when none is configured.
pub const DEFAULT_GOOGLE_PROJECT_ID: &str = "platform-dev-178517";

/// Loader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Base URL of the DSS API, e.g. `https://dss.example.org/v1`
    pub dss_endpoint: Option<String>,

    /// Bucket files are staged in before the store copies them
    pub staging_bucket: Option<String>,

    pub google_project_id: String,

    /// File holding an IAM role ARN for S3 metadata reads
    pub aws_metadata_cred: Option<PathBuf>,

    /// `authorized_user` JSON for GCS metadata reads
    pub gcp_metadata_cred: Option<PathBuf>,

    /// Access token for GCS reads without elevated credentials
    #[serde(skip_serializing)]
    pub gcs_access_token: Option<String>,

    /// Overrides the dialect's metadata schema
    pub schema_url: Option<String>,

    pub copy_timeout_secs: u64,

    pub api_timeout_secs: u64,

    #[serde(default)]
    pub s3: S3Settings,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            dss_endpoint: None,
            staging_bucket: None,
            google_project_id: DEFAULT_GOOGLE_PROJECT_ID.to_string(),
            aws_metadata_cred: None,
            gcp_metadata_cred: None,
            gcs_access_token: None,
            schema_url: None,
            copy_timeout_secs: DEFAULT_COPY_TIMEOUT_SECS,
            api_timeout_secs: DEFAULT_API_TIMEOUT_SECS,
            s3: S3Settings::default(),
        }
    }
}

fn env_secs(name: &str, default: u64) -> Result<u64> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| LoaderError::config(format!("{} must be a whole number of seconds, got {:?}", name, value))),
        Err(_) => Ok(default),
    }
}

impl LoaderConfig {
    /// Load config from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            dss_endpoint: std::env::var("REFLOAD_DSS_ENDPOINT").ok(),
            staging_bucket: std::env::var("REFLOAD_STAGING_BUCKET").ok(),
            google_project_id: std::env::var("REFLOAD_GOOGLE_PROJECT_ID").unwrap_or(defaults.google_project_id),
            aws_metadata_cred: std::env::var("REFLOAD_AWS_METADATA_CRED").ok().map(PathBuf::from),
            gcp_metadata_cred: std::env::var("REFLOAD_GCP_METADATA_CRED").ok().map(PathBuf::from),
            gcs_access_token: std::env::var("GOOGLE_OAUTH_ACCESS_TOKEN").ok(),
            schema_url: std::env::var("REFLOAD_SCHEMA_URL").ok(),
            copy_timeout_secs: env_secs("REFLOAD_COPY_TIMEOUT_SECS", defaults.copy_timeout_secs)?,
            api_timeout_secs: env_secs("REFLOAD_API_TIMEOUT_SECS", defaults.api_timeout_secs)?,
            s3: S3Settings::from_env(),
        })
    }

    /// Check required settings; warns about a lone metadata credential.
    pub fn validate(&self) -> Result<()> {
        self.dss_endpoint()?;
        self.staging_bucket()?;

        match (&self.aws_metadata_cred, &self.gcp_metadata_cred) {
            (Some(_), None) => warn!("Only AWS metadata credentials were given; GCS metadata uses default access"),
            (None, Some(_)) => warn!("Only GCP metadata credentials were given; S3 metadata uses default access"),
            _ => {},
        }
        Ok(())
    }

    pub fn dss_endpoint(&self) -> Result<&str> {
        self.dss_endpoint
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| LoaderError::config("DSS endpoint is required (--dss-endpoint or REFLOAD_DSS_ENDPOINT)"))
    }

    pub fn staging_bucket(&self) -> Result<&str> {
        self.staging_bucket
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                LoaderError::config("Staging bucket is required (--staging-bucket or REFLOAD_STAGING_BUCKET)")
            })
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    pub fn copy_policy(&self) -> CopyPolicy {
        CopyPolicy::default().with_timeout(Duration::from_secs(self.copy_timeout_secs))
    }
}
