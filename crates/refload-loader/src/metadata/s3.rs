//! S3 metadata backend

use super::{ClientHandle, CredentialSource, FileMetadata, HeadError, ObjectHeadClient};
use crate::aws::S3Settings;
use crate::error::{LoaderError, Result};
use async_trait::async_trait;
use aws_config::sts::AssumeRoleProvider;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::types::RequestPayer;
use aws_sdk_s3::Client;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Session name used for assumed-role metadata credentials.
pub const ASSUME_ROLE_SESSION_NAME: &str = "refload";

/// Lifetime requested for assumed-role sessions.
pub const ASSUME_ROLE_SESSION_LENGTH: Duration = Duration::from_secs(12 * 60 * 60);

/// Head requests against S3, billed to the requester.
pub struct S3HeadClient {
    client: Client,
}

impl S3HeadClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn classify(err: SdkError<HeadObjectError, HttpResponse>) -> HeadError {
    match err.raw_response().map(|raw| raw.status().as_u16()) {
        Some(404) => HeadError::NotFound,
        Some(401) | Some(403) => HeadError::Forbidden,
        _ => HeadError::Other(DisplayErrorContext(&err).to_string()),
    }
}

#[async_trait]
impl ObjectHeadClient for S3HeadClient {
    async fn head(&self, bucket: &str, key: &str) -> std::result::Result<FileMetadata, HeadError> {
        let output = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .request_payer(RequestPayer::Requester)
            .send()
            .await
            .map_err(classify)?;

        let mut metadata = FileMetadata {
            size: output.content_length().and_then(|n| u64::try_from(n).ok()),
            content_type: output.content_type().map(str::to_string),
            ..Default::default()
        };
        if let Some(etag) = output.e_tag() {
            metadata.checksums.insert("s3_etag".to_string(), etag.to_string());
        }
        Ok(metadata)
    }
}

/// Elevated S3 credentials obtained by assuming a role.
///
/// The role ARN is read from a file on every connect so a rotated role takes
/// effect on the next refresh.
pub struct AssumeRoleSource {
    role_arn_file: PathBuf,
    settings: S3Settings,
}

impl AssumeRoleSource {
    pub fn new(role_arn_file: impl Into<PathBuf>, settings: S3Settings) -> Self {
        Self {
            role_arn_file: role_arn_file.into(),
            settings,
        }
    }

    async fn read_role_arn(&self) -> Result<String> {
        let contents = tokio::fs::read_to_string(&self.role_arn_file).await.map_err(|e| {
            LoaderError::credential(format!(
                "cannot read role ARN file {}: {}",
                self.role_arn_file.display(),
                e
            ))
        })?;
        let arn = contents.trim();
        if arn.is_empty() {
            return Err(LoaderError::credential(format!(
                "role ARN file {} is empty",
                self.role_arn_file.display()
            )));
        }
        Ok(arn.to_string())
    }
}

#[async_trait]
impl CredentialSource for AssumeRoleSource {
    fn describe(&self) -> String {
        format!("s3 assume-role ({})", self.role_arn_file.display())
    }

    async fn connect(&self) -> Result<ClientHandle> {
        let role_arn = self.read_role_arn().await?;
        debug!(role_arn = %role_arn, "Assuming role for S3 metadata access");

        let sdk_config = crate::aws::load_sdk_config(&self.settings).await;
        let provider = AssumeRoleProvider::builder(role_arn)
            .session_name(ASSUME_ROLE_SESSION_NAME)
            .session_length(ASSUME_ROLE_SESSION_LENGTH)
            .configure(&sdk_config)
            .build()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config)
            .credentials_provider(provider)
            .force_path_style(self.settings.path_style);
        if let Some(endpoint) = &self.settings.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Ok(Arc::new(S3HeadClient::new(Client::from_conf(builder.build()))))
    }
}
