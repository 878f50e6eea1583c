//! Cloud object metadata resolution
//!
//! Fetches size, content type and provider checksums for an object named by a
//! [`CloudUrl`]. Resolution is best effort: a missing or forbidden object
//! yields an empty record plus a classified warning, never an error, so an
//! unreachable provider cannot block a reference registration.

pub mod credentials;
pub mod gcs;
pub mod s3;

use async_trait::async_trait;
use refload_common::types::{CloudScheme, CloudUrl};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub use credentials::{ClientHandle, CredentialSet, CredentialSource};

/// Metadata observed for one cloud object.
///
/// A `None` field means the provider did not report it, which is distinct
/// from a reported zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    #[serde(rename = "content-type", skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Provider-specific checksums, e.g. `s3_etag` or `crc32c`
    #[serde(flatten)]
    pub checksums: BTreeMap<String, String>,
}

impl FileMetadata {
    pub fn is_empty(&self) -> bool {
        self.size.is_none() && self.content_type.is_none() && self.checksums.is_empty()
    }

    /// Overlay `other` onto `self`; fields present in `other` win.
    pub fn merge(&mut self, other: FileMetadata) {
        if other.size.is_some() {
            self.size = other.size;
        }
        if other.content_type.is_some() {
            self.content_type = other.content_type;
        }
        self.checksums.extend(other.checksums);
    }
}

/// Why a provider could not answer a head request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadError {
    NotFound,
    /// 401 or 403
    Forbidden,
    Other(String),
}

impl std::fmt::Display for HeadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeadError::NotFound => f.write_str("not found"),
            HeadError::Forbidden => f.write_str("access forbidden"),
            HeadError::Other(cause) => f.write_str(cause),
        }
    }
}

/// A provider backend able to report metadata for one object.
#[async_trait]
pub trait ObjectHeadClient: Send + Sync {
    async fn head(&self, bucket: &str, key: &str) -> Result<FileMetadata, HeadError>;
}

/// Outcome of one resolution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataFetch {
    Found(FileMetadata),
    NotFound,
    Forbidden,
    Failed(String),
}

impl MetadataFetch {
    pub fn is_found(&self) -> bool {
        matches!(self, MetadataFetch::Found(_))
    }

    /// The metadata to proceed with; empty unless the object was found.
    pub fn into_metadata(self) -> FileMetadata {
        match self {
            MetadataFetch::Found(metadata) => metadata,
            _ => FileMetadata::default(),
        }
    }
}

/// Routes URLs to the provider of their scheme, with one credential set each.
pub struct MetadataResolver {
    s3: CredentialSet,
    gs: CredentialSet,
}

impl MetadataResolver {
    pub fn new(s3: CredentialSet, gs: CredentialSet) -> Self {
        Self { s3, gs }
    }

    fn credentials_for(&self, scheme: CloudScheme) -> &CredentialSet {
        match scheme {
            CloudScheme::S3 => &self.s3,
            CloudScheme::Gs => &self.gs,
        }
    }

    /// Resolve metadata for `url`.
    ///
    /// An authorization failure triggers one refresh of the elevated
    /// credential (when configured) and exactly one retry.
    pub async fn fetch(&self, url: &CloudUrl) -> MetadataFetch {
        let credentials = self.credentials_for(url.scheme());
        let mut client = credentials.current().await;
        let mut attempt_refresh = true;

        loop {
            match client.head(url.bucket(), url.key()).await {
                Ok(metadata) => {
                    debug!(url = %url, size = ?metadata.size, "Fetched cloud object metadata");
                    return MetadataFetch::Found(metadata);
                },
                Err(HeadError::NotFound) => {
                    warn!(
                        url = %url,
                        warning = "NotFound",
                        "Could not find cloud object; its metadata will be missing from the file reference"
                    );
                    return MetadataFetch::NotFound;
                },
                Err(HeadError::Forbidden) if attempt_refresh && credentials.has_elevated() => {
                    attempt_refresh = false;
                    debug!(url = %url, "Access forbidden, refreshing metadata credentials");
                    match credentials.refresh().await {
                        Some(refreshed) => client = refreshed,
                        None => {
                            warn!(
                                url = %url,
                                warning = "AccessForbidden",
                                "Access forbidden and metadata credentials could not be refreshed"
                            );
                            return MetadataFetch::Forbidden;
                        },
                    }
                },
                Err(HeadError::Forbidden) => {
                    warn!(
                        url = %url,
                        warning = "AccessForbidden",
                        "Access to cloud object forbidden; supply metadata credentials for {} to include its metadata",
                        url.scheme()
                    );
                    return MetadataFetch::Forbidden;
                },
                Err(HeadError::Other(cause)) => {
                    warn!(
                        url = %url,
                        warning = "AccessWarning",
                        error = %cause,
                        "Could not access cloud object; its metadata will be missing from the file reference"
                    );
                    return MetadataFetch::Failed(cause);
                },
            }
        }
    }
}
