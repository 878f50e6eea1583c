//! Staging area for objects the data store copies in
//!
//! Objects are written under `{file_uuid}/{filename}` and tagged with the
//! checksums the store verifies on copy.

use crate::error::{LoaderError, Result};
use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Tag, Tagging};
use aws_sdk_s3::Client;
use refload_common::checksum::{compute_checksums, compute_file_checksums, StagedChecksums};
use std::path::Path;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Location of a staged object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedObject {
    pub bucket: String,
    pub key: String,
}

impl StagedObject {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    pub fn source_url(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }

    /// Last segment of the key; a key naming a directory is rejected.
    pub fn filename(&self) -> Result<&str> {
        if self.key.ends_with('/') {
            return Err(LoaderError::file_url(format!(
                "Please specify a filename, not a directory ({} cannot end in \"/\")",
                self.key
            )));
        }
        Ok(self.key.rsplit('/').next().unwrap_or(&self.key))
    }
}

/// Build the staging key for a file.
pub fn staging_key(file_uuid: Uuid, filename: &str) -> String {
    format!("{}/{}", file_uuid, filename)
}

/// Guess a content type from a file extension, defaulting to
/// `application/octet-stream`.
pub fn guess_content_type(path: &Path) -> mime::Mime {
    mime_guess::from_path(path).first_or_octet_stream()
}

#[async_trait]
pub trait Stager: Send + Sync {
    async fn stage_bytes(
        &self,
        file_uuid: Uuid,
        filename: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StagedObject>;

    async fn stage_file(&self, file_uuid: Uuid, path: &Path, content_type: &str) -> Result<StagedObject>;
}

/// Stages objects into an S3 bucket.
#[derive(Clone)]
pub struct S3Stager {
    client: Client,
    bucket: String,
}

impl S3Stager {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(
        &self,
        key: &str,
        body: ByteStream,
        content_type: &str,
        checksums: &StagedChecksums,
    ) -> Result<StagedObject> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| LoaderError::staging(format!("upload of {} failed: {}", key, DisplayErrorContext(&e))))?;

        let tag_set = checksums
            .as_tags()
            .into_iter()
            .map(|(key, value)| Tag::builder().key(key).value(value).build())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| LoaderError::staging(format!("invalid checksum tag: {}", e)))?;
        let tagging = Tagging::builder()
            .set_tag_set(Some(tag_set))
            .build()
            .map_err(|e| LoaderError::staging(format!("invalid tagging: {}", e)))?;

        self.client
            .put_object_tagging()
            .bucket(&self.bucket)
            .key(key)
            .tagging(tagging)
            .send()
            .await
            .map_err(|e| LoaderError::staging(format!("tagging of {} failed: {}", key, DisplayErrorContext(&e))))?;

        info!("Staged s3://{}/{}", self.bucket, key);
        Ok(StagedObject::new(&self.bucket, key))
    }
}

#[async_trait]
impl Stager for S3Stager {
    #[instrument(skip(self, bytes))]
    async fn stage_bytes(
        &self,
        file_uuid: Uuid,
        filename: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StagedObject> {
        let checksums = compute_checksums(&mut bytes.as_slice())?;
        let key = staging_key(file_uuid, filename);
        debug!("Staging {} bytes to s3://{}/{}", bytes.len(), self.bucket, key);
        self.put(&key, ByteStream::from(bytes), content_type, &checksums).await
    }

    #[instrument(skip(self))]
    async fn stage_file(&self, file_uuid: Uuid, path: &Path, content_type: &str) -> Result<StagedObject> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| LoaderError::file_url(format!("{} does not name a file", path.display())))?;

        let owned = path.to_path_buf();
        let checksums = tokio::task::spawn_blocking(move || compute_file_checksums(owned))
            .await
            .map_err(|e| LoaderError::staging(format!("checksum task failed: {}", e)))??;

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| LoaderError::staging(format!("cannot read {}: {}", path.display(), e)))?;
        let key = staging_key(file_uuid, filename);
        self.put(&key, body, content_type, &checksums).await
    }
}
