//! AWS SDK client construction
//!
//! Clients come from the default provider chain unless an explicit endpoint
//! or static key pair is configured (MinIO and local testing).

use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::Credentials;
use aws_sdk_s3::Client;
use serde::{Deserialize, Serialize};
use std::env;
use tracing::debug;

/// Connection settings shared by every S3 client the loader builds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct S3Settings {
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub access_key: Option<String>,
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
    pub path_style: bool,
}

impl S3Settings {
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var("REFLOAD_S3_ENDPOINT").ok(),
            region: env::var("REFLOAD_S3_REGION").ok(),
            access_key: env::var("REFLOAD_S3_ACCESS_KEY").ok(),
            secret_key: env::var("REFLOAD_S3_SECRET_KEY").ok(),
            path_style: env::var("REFLOAD_S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        }
    }

    pub fn for_minio(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            region: Some("us-east-1".to_string()),
            access_key: Some("minioadmin".to_string()),
            secret_key: Some("minioadmin".to_string()),
            path_style: true,
        }
    }

    fn static_credentials(&self) -> Option<Credentials> {
        match (&self.access_key, &self.secret_key) {
            (Some(access), Some(secret)) => {
                Some(Credentials::new(access, secret, None, None, "refload-static"))
            },
            _ => None,
        }
    }
}

/// Load the shared SDK configuration for `settings`.
pub async fn load_sdk_config(settings: &S3Settings) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = &settings.region {
        loader = loader.region(Region::new(region.clone()));
    }
    if let Some(credentials) = settings.static_credentials() {
        loader = loader.credentials_provider(credentials);
    }
    loader.load().await
}

/// Build an S3 client from a loaded SDK config, applying endpoint overrides.
pub fn s3_client(sdk_config: &SdkConfig, settings: &S3Settings) -> Client {
    let mut builder = aws_sdk_s3::config::Builder::from(sdk_config).force_path_style(settings.path_style);
    if let Some(endpoint) = &settings.endpoint {
        debug!(endpoint = %endpoint, "Using custom S3 endpoint");
        builder = builder.endpoint_url(endpoint);
    }
    Client::from_conf(builder.build())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_for_minio() {
        let settings = S3Settings::for_minio("http://localhost:9000");
        assert_eq!(settings.endpoint.as_deref(), Some("http://localhost:9000"));
        assert!(settings.path_style);
        assert!(settings.static_credentials().is_some());
    }

    #[test]
    fn test_partial_key_pair_is_ignored() {
        let settings = S3Settings {
            access_key: Some("key".to_string()),
            ..Default::default()
        };
        assert!(settings.static_credentials().is_none());
    }

    #[test]
    fn test_secret_not_serialized() {
        let json = serde_json::to_string(&S3Settings::for_minio("http://localhost:9000")).unwrap();
        assert!(!json.contains("secret_key"));
    }
}
