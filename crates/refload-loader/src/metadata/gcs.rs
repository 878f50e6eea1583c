//! Google Cloud Storage metadata backend
//!
//! Object metadata is read through the GCS JSON API. Requester-pays buckets
//! are billed to the configured project.

use super::{ClientHandle, CredentialSource, FileMetadata, HeadError, ObjectHeadClient};
use crate::error::{LoaderError, Result};
use async_trait::async_trait;
use refload_common::checksum::crc32c_base64_to_hex;
use reqwest::StatusCode;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Base URL of the GCS JSON API.
pub const GCS_API_BASE: &str = "https://storage.googleapis.com/storage/v1";

/// OAuth2 token endpoint used for authorized-user credentials.
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Object resource fields the loader cares about.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectResource {
    /// uint64 encoded as a decimal string
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
    /// Base64 of the big-endian CRC32C
    #[serde(default)]
    crc32c: Option<String>,
}

/// Head requests against the GCS JSON API.
#[derive(Clone)]
pub struct GcsHeadClient {
    http: reqwest::Client,
    base_url: Url,
    user_project: Option<String>,
    access_token: Option<String>,
}

impl GcsHeadClient {
    pub fn new(base_url: &str, user_project: Option<String>, access_token: Option<String>) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| LoaderError::config(format!("invalid GCS API URL {}: {}", base_url, e)))?;
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url,
            user_project,
            access_token,
        })
    }

    fn object_url(&self, bucket: &str, key: &str) -> std::result::Result<Url, HeadError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| HeadError::Other(format!("GCS API URL cannot be a base: {}", self.base_url)))?
            .pop_if_empty()
            .extend(["b", bucket, "o", key]);
        if let Some(project) = &self.user_project {
            url.query_pairs_mut().append_pair("userProject", project);
        }
        Ok(url)
    }
}

impl ObjectResource {
    fn into_metadata(self) -> FileMetadata {
        let mut metadata = FileMetadata {
            size: self.size.as_deref().and_then(|s| s.parse().ok()),
            content_type: self.content_type,
            ..Default::default()
        };
        if let Some(crc) = self.crc32c.as_deref().and_then(crc32c_base64_to_hex) {
            metadata.checksums.insert("crc32c".to_string(), crc);
        }
        metadata
    }
}

#[async_trait]
impl ObjectHeadClient for GcsHeadClient {
    async fn head(&self, bucket: &str, key: &str) -> std::result::Result<FileMetadata, HeadError> {
        let url = self.object_url(bucket, key)?;
        let mut request = self.http.get(url);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| HeadError::Other(e.to_string()))?;
        match response.status() {
            StatusCode::OK => {
                let resource: ObjectResource =
                    response.json().await.map_err(|e| HeadError::Other(e.to_string()))?;
                Ok(resource.into_metadata())
            },
            StatusCode::NOT_FOUND => Err(HeadError::NotFound),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(HeadError::Forbidden),
            status => Err(HeadError::Other(format!("GCS returned status {}", status))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AuthorizedUser {
    client_id: String,
    client_secret: String,
    refresh_token: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Elevated GCS credentials from an `authorized_user` JSON file.
///
/// Every connect exchanges the refresh token for a new access token.
pub struct AuthorizedUserSource {
    credentials_file: PathBuf,
    token_url: String,
    api_base: String,
    user_project: Option<String>,
}

impl AuthorizedUserSource {
    pub fn new(credentials_file: impl Into<PathBuf>, user_project: Option<String>) -> Self {
        Self {
            credentials_file: credentials_file.into(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            api_base: GCS_API_BASE.to_string(),
            user_project,
        }
    }

    /// Point the source at other token and API endpoints.
    pub fn with_endpoints(mut self, token_url: impl Into<String>, api_base: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self.api_base = api_base.into();
        self
    }

    async fn read_credentials(&self) -> Result<AuthorizedUser> {
        let contents = tokio::fs::read_to_string(&self.credentials_file).await.map_err(|e| {
            LoaderError::credential(format!(
                "cannot read GCP credentials file {}: {}",
                self.credentials_file.display(),
                e
            ))
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            LoaderError::credential(format!(
                "GCP credentials file {} is not an authorized_user document: {}",
                self.credentials_file.display(),
                e
            ))
        })
    }

    async fn exchange(&self, user: &AuthorizedUser) -> Result<String> {
        let response = reqwest::Client::new()
            .post(&self.token_url)
            .timeout(REQUEST_TIMEOUT)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", user.client_id.as_str()),
                ("client_secret", user.client_secret.as_str()),
                ("refresh_token", user.refresh_token.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LoaderError::credential(format!(
                "token exchange failed with status {}",
                status
            )));
        }
        let token: TokenResponse = response.json().await?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl CredentialSource for AuthorizedUserSource {
    fn describe(&self) -> String {
        format!("gcp authorized-user ({})", self.credentials_file.display())
    }

    async fn connect(&self) -> Result<ClientHandle> {
        let user = self.read_credentials().await?;
        let token = self.exchange(&user).await?;
        debug!("Obtained GCP access token for metadata reads");
        Ok(Arc::new(GcsHeadClient::new(
            &self.api_base,
            self.user_project.clone(),
            Some(token),
        )?))
    }
}
