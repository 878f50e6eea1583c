//! Destination data store
//!
//! The registrar talks to the store only through [`DataStore`]; [`DssClient`]
//! is the HTTP implementation.

pub mod dss;
pub mod endpoints;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use dss::DssClient;

/// Creator id stamped on every file and bundle the loader writes.
pub const CREATOR_UID: u32 = 20;

/// Outcome of a copy registration request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutFileStatus {
    /// 200: an identical file is already registered
    AlreadyPresent,
    /// 201: the copy finished synchronously
    Created,
    /// 202: the copy continues in the background
    Accepted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutFileResponse {
    pub status: PutFileStatus,
    /// Version as formatted by the store
    pub version: String,
}

/// Visibility of a file version in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadStatus {
    Found,
    NotFound,
    Other(u16),
}

/// One entry of a bundle listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleFile {
    pub uuid: Uuid,
    pub version: String,
    pub name: String,
    pub indexed: bool,
}

#[async_trait]
pub trait DataStore: Send + Sync {
    /// Ask the store to copy `source_url` into `(file_uuid, version)`.
    async fn put_file_by_copy(
        &self,
        file_uuid: Uuid,
        version: Option<&str>,
        source_url: &str,
    ) -> Result<PutFileResponse>;

    async fn head_file(&self, file_uuid: Uuid, version: &str) -> Result<HeadStatus>;

    /// Register a bundle and return the version the store recorded.
    async fn put_bundle(&self, bundle_uuid: Uuid, version: &str, files: &[BundleFile]) -> Result<String>;
}
