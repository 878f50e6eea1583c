//! HTTP client for the data storage service (DSS)

use super::{endpoints, BundleFile, DataStore, HeadStatus, PutFileResponse, PutFileStatus, CREATOR_UID};
use crate::error::{LoaderError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Default timeout for store requests in seconds.
/// Can be overridden via REFLOAD_API_TIMEOUT_SECS.
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Serialize)]
struct PutFileRequest<'a> {
    source_url: &'a str,
    creator_uid: u32,
}

#[derive(Debug, Serialize)]
struct PutBundleRequest<'a> {
    creator_uid: u32,
    files: &'a [BundleFile],
}

#[derive(Debug, Default, Deserialize)]
struct VersionResponse {
    #[serde(default)]
    version: Option<String>,
}

/// DSS API client
pub struct DssClient {
    client: Client,
    base_url: String,
}

impl DssClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn read_version(response: reqwest::Response) -> Option<String> {
        response
            .json::<VersionResponse>()
            .await
            .ok()
            .and_then(|body| body.version)
    }
}

#[async_trait]
impl DataStore for DssClient {
    async fn put_file_by_copy(
        &self,
        file_uuid: Uuid,
        version: Option<&str>,
        source_url: &str,
    ) -> Result<PutFileResponse> {
        let url = endpoints::file_url(&self.base_url, file_uuid);
        let mut request = self.client.put(&url).json(&PutFileRequest {
            source_url,
            creator_uid: CREATOR_UID,
        });
        if let Some(version) = version {
            request = request.query(&[("version", version)]);
        }

        let response = request.send().await?;
        let status = match response.status() {
            StatusCode::OK => PutFileStatus::AlreadyPresent,
            StatusCode::CREATED => PutFileStatus::Created,
            StatusCode::ACCEPTED => PutFileStatus::Accepted,
            other => {
                return Err(LoaderError::unexpected_response(
                    other.as_u16(),
                    format!("put file {}", file_uuid),
                ))
            },
        };
        let http_status = response.status().as_u16();
        let version = Self::read_version(response)
            .await
            .or_else(|| version.map(str::to_string))
            .ok_or_else(|| {
                LoaderError::unexpected_response(http_status, format!("put file {} returned no version", file_uuid))
            })?;

        debug!(file_uuid = %file_uuid, version = %version, status = ?status, "Put file by copy");
        Ok(PutFileResponse { status, version })
    }

    async fn head_file(&self, file_uuid: Uuid, version: &str) -> Result<HeadStatus> {
        let url = endpoints::file_url(&self.base_url, file_uuid);
        let response = self
            .client
            .head(&url)
            .query(&[("replica", endpoints::REPLICA), ("version", version)])
            .send()
            .await?;

        Ok(match response.status() {
            status if status.is_success() => HeadStatus::Found,
            StatusCode::NOT_FOUND => HeadStatus::NotFound,
            other => HeadStatus::Other(other.as_u16()),
        })
    }

    async fn put_bundle(&self, bundle_uuid: Uuid, version: &str, files: &[BundleFile]) -> Result<String> {
        let url = endpoints::bundle_url(&self.base_url, bundle_uuid);
        let response = self
            .client
            .put(&url)
            .query(&[("replica", endpoints::REPLICA), ("version", version)])
            .json(&PutBundleRequest {
                creator_uid: CREATOR_UID,
                files,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LoaderError::unexpected_response(
                status.as_u16(),
                format!("put bundle {}", bundle_uuid),
            ));
        }

        Ok(Self::read_version(response)
            .await
            .unwrap_or_else(|| version.to_string()))
    }
}
