//! In-memory collaborators for loader integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use refload_loader::metadata::{CredentialSet, FileMetadata, HeadError, MetadataResolver, ObjectHeadClient};
use refload_loader::registrar::{CopyPolicy, Registrar};
use refload_loader::staging::{staging_key, StagedObject, Stager};
use refload_loader::store::{BundleFile, DataStore, HeadStatus, PutFileResponse, PutFileStatus};
use refload_loader::Result;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const STAGING_BUCKET: &str = "staging";

/// Polls that never see the object
pub const NEVER_VISIBLE: usize = usize::MAX;

/// Data store keyed by `(file_uuid, version)`.
#[derive(Default)]
pub struct MemoryStore {
    files: Mutex<HashMap<(Uuid, String), String>>,
    bundles: Mutex<Vec<(Uuid, String, Vec<BundleFile>)>>,
    pending: Mutex<HashMap<Uuid, usize>>,
    head_override: Mutex<Option<HeadStatus>>,
    pub puts: AtomicUsize,
    pub heads: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer copies of `file_uuid` with 202 and hide the object for `polls` heads.
    pub fn accept_async(&self, file_uuid: Uuid, polls: usize) {
        self.pending.lock().unwrap().insert(file_uuid, polls);
    }

    pub fn fail_heads_with(&self, status: u16) {
        *self.head_override.lock().unwrap() = Some(HeadStatus::Other(status));
    }

    pub fn file_count(&self) -> usize {
        self.files.lock().unwrap().len()
    }

    pub fn source_of(&self, file_uuid: Uuid, version: &str) -> Option<String> {
        self.files
            .lock()
            .unwrap()
            .get(&(file_uuid, version.to_string()))
            .cloned()
    }

    pub fn bundles(&self) -> Vec<(Uuid, String, Vec<BundleFile>)> {
        self.bundles.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn put_file_by_copy(
        &self,
        file_uuid: Uuid,
        version: Option<&str>,
        source_url: &str,
    ) -> Result<PutFileResponse> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        let version = version.unwrap_or("2000-01-01T00:00:00Z").to_string();
        let key = (file_uuid, version.clone());

        let mut files = self.files.lock().unwrap();
        if files.contains_key(&key) {
            return Ok(PutFileResponse {
                status: PutFileStatus::AlreadyPresent,
                version,
            });
        }
        files.insert(key, source_url.to_string());

        let status = if self.pending.lock().unwrap().contains_key(&file_uuid) {
            PutFileStatus::Accepted
        } else {
            PutFileStatus::Created
        };
        Ok(PutFileResponse { status, version })
    }

    async fn head_file(&self, file_uuid: Uuid, version: &str) -> Result<HeadStatus> {
        self.heads.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = *self.head_override.lock().unwrap() {
            return Ok(status);
        }

        let mut pending = self.pending.lock().unwrap();
        if let Some(remaining) = pending.get_mut(&file_uuid) {
            if *remaining > 0 {
                if *remaining != NEVER_VISIBLE {
                    *remaining -= 1;
                }
                return Ok(HeadStatus::NotFound);
            }
        }

        let present = self
            .files
            .lock()
            .unwrap()
            .contains_key(&(file_uuid, version.to_string()));
        Ok(if present { HeadStatus::Found } else { HeadStatus::NotFound })
    }

    async fn put_bundle(&self, bundle_uuid: Uuid, version: &str, files: &[BundleFile]) -> Result<String> {
        self.bundles
            .lock()
            .unwrap()
            .push((bundle_uuid, version.to_string(), files.to_vec()));
        Ok(version.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct StagedRecord {
    pub object: StagedObject,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Stager that keeps objects in memory.
#[derive(Default)]
pub struct MemoryStager {
    staged: Mutex<Vec<StagedRecord>>,
}

impl MemoryStager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn staged(&self) -> Vec<StagedRecord> {
        self.staged.lock().unwrap().clone()
    }

    pub fn staged_json(&self, filename: &str) -> Vec<Value> {
        self.staged()
            .into_iter()
            .filter(|r| r.object.key.ends_with(&format!("/{filename}")))
            .map(|r| serde_json::from_slice(&r.bytes).unwrap())
            .collect()
    }

    fn record(&self, file_uuid: Uuid, filename: &str, bytes: Vec<u8>, content_type: &str) -> StagedObject {
        let object = StagedObject::new(STAGING_BUCKET, staging_key(file_uuid, filename));
        self.staged.lock().unwrap().push(StagedRecord {
            object: object.clone(),
            bytes,
            content_type: content_type.to_string(),
        });
        object
    }
}

#[async_trait]
impl Stager for MemoryStager {
    async fn stage_bytes(
        &self,
        file_uuid: Uuid,
        filename: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StagedObject> {
        Ok(self.record(file_uuid, filename, bytes, content_type))
    }

    async fn stage_file(&self, file_uuid: Uuid, path: &Path, content_type: &str) -> Result<StagedObject> {
        let bytes = tokio::fs::read(path).await?;
        let filename = path.file_name().unwrap().to_str().unwrap().to_string();
        Ok(self.record(file_uuid, &filename, bytes, content_type))
    }
}

/// Cloud provider answering from a fixed table; unknown objects are 404.
#[derive(Default)]
pub struct FakeProvider {
    objects: Mutex<HashMap<(String, String), FileMetadata>>,
    pub calls: AtomicUsize,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, url: &str, size: u64) {
        let (bucket, key) = url
            .split_once("://")
            .and_then(|(_, rest)| rest.split_once('/'))
            .unwrap();
        let mut metadata = FileMetadata {
            size: Some(size),
            content_type: Some("application/octet-stream".to_string()),
            ..Default::default()
        };
        metadata
            .checksums
            .insert("s3_etag".to_string(), format!("\"etag-{size}\""));
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), metadata);
    }
}

#[async_trait]
impl ObjectHeadClient for FakeProvider {
    async fn head(&self, bucket: &str, key: &str) -> std::result::Result<FileMetadata, HeadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or(HeadError::NotFound)
    }
}

/// Default backoff with a short overall timeout.
pub fn test_policy() -> CopyPolicy {
    CopyPolicy::default().with_timeout(Duration::from_secs(30))
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub stager: Arc<MemoryStager>,
    pub provider: Arc<FakeProvider>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            store: MemoryStore::new(),
            stager: MemoryStager::new(),
            provider: FakeProvider::new(),
        }
    }

    pub fn registrar(&self) -> Registrar {
        let resolver = MetadataResolver::new(
            CredentialSet::new(self.provider.clone()),
            CredentialSet::new(self.provider.clone()),
        );
        Registrar::new(self.store.clone(), self.stager.clone(), Arc::new(resolver)).with_policy(test_policy())
    }
}

/// A standard-dialect bundle entry with one data file.
pub fn standard_bundle(bundle_uuid: Uuid, file_uuid: Uuid, url: &str, size: u64) -> Value {
    json!({
        "data_bundle": {
            "id": bundle_uuid.to_string(),
            "user_metadata": {"bundle": bundle_uuid.to_string()}
        },
        "data_objects": {
            (format!("dg.4503/{file_uuid}")): {
                "name": "reads.bam",
                "created": "2018-01-01T00:00:00Z",
                "size": size,
                "urls": [{"url": url}]
            }
        }
    })
}
