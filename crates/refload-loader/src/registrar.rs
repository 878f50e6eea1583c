//! File and bundle registration
//!
//! Every file reaches the data store by copy from the staging area. A copy
//! request moves through these states:
//!
//! ```text
//! Requested ─┬─ 200 ─▶ AlreadyPresent
//!            ├─ 201 ─▶ SyncCompleted
//!            └─ 202 ─▶ AsyncPending ─┬─▶ AsyncCompleted
//!                                    └─▶ TimedOut
//! ```
//!
//! While pending, the store is polled with bounded exponential backoff. The
//! wait between polls races a [`CancellationToken`] so an interrupt does not
//! sit out the full timeout.

use crate::consolidate::{consolidate, FILEREF_CONTENT_TYPE};
use crate::error::{LoaderError, Result};
use crate::metadata::MetadataResolver;
use crate::parser::FileDescriptor;
use crate::staging::{guess_content_type, StagedObject, Stager};
use crate::store::{BundleFile, DataStore, HeadStatus, PutFileStatus};
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Default overall limit on an asynchronous copy in seconds.
/// Can be overridden via REFLOAD_COPY_TIMEOUT_SECS.
pub const DEFAULT_COPY_TIMEOUT_SECS: u64 = 1200;

/// Polling schedule for asynchronous copies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CopyPolicy {
    pub initial_wait: Duration,
    pub backoff_factor: f64,
    pub max_wait: Duration,
    pub timeout: Duration,
}

impl Default for CopyPolicy {
    fn default() -> Self {
        Self {
            initial_wait: Duration::from_secs(1),
            backoff_factor: 1.618,
            max_wait: Duration::from_secs(10),
            timeout: Duration::from_secs(DEFAULT_COPY_TIMEOUT_SECS),
        }
    }
}

impl CopyPolicy {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Wait to use after `current`.
    pub fn next_wait(&self, current: Duration) -> Duration {
        current.mul_f64(self.backoff_factor).min(self.max_wait)
    }
}

/// States of one copy registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyState {
    Requested,
    AlreadyPresent,
    SyncCompleted,
    AsyncPending,
    AsyncCompleted,
    TimedOut,
}

impl From<PutFileStatus> for CopyState {
    fn from(status: PutFileStatus) -> Self {
        match status {
            PutFileStatus::AlreadyPresent => CopyState::AlreadyPresent,
            PutFileStatus::Created => CopyState::SyncCompleted,
            PutFileStatus::Accepted => CopyState::AsyncPending,
        }
    }
}

/// What a registration produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationResult {
    pub file_uuid: Uuid,
    /// Version as recorded by the store
    pub version: String,
    pub filename: String,
    /// True when the store already held this `(file_uuid, version)`
    pub already_present: bool,
}

impl RegistrationResult {
    /// Listing entry for a bundle.
    pub fn bundle_file(&self, indexed: bool) -> BundleFile {
        BundleFile {
            uuid: self.file_uuid,
            version: self.version.clone(),
            name: self.filename.clone(),
            indexed,
        }
    }
}

/// A fresh RFC3339 timestamp usable as a store version.
pub fn new_version() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Registers files and bundles with the data store.
pub struct Registrar {
    store: Arc<dyn DataStore>,
    stager: Arc<dyn Stager>,
    resolver: Arc<MetadataResolver>,
    policy: CopyPolicy,
    dry_run: bool,
    cancel: CancellationToken,
}

impl Registrar {
    pub fn new(store: Arc<dyn DataStore>, stager: Arc<dyn Stager>, resolver: Arc<MetadataResolver>) -> Self {
        Self {
            store,
            stager,
            resolver,
            policy: CopyPolicy::default(),
            dry_run: false,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_policy(mut self, policy: CopyPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    fn dry_run_result(&self, file_uuid: Uuid, filename: &str, version: Option<&str>) -> RegistrationResult {
        RegistrationResult {
            file_uuid,
            version: version.map_or_else(new_version, str::to_string),
            filename: filename.to_string(),
            already_present: false,
        }
    }

    /// Register a file left in place in one or more cloud buckets.
    ///
    /// Metadata is resolved even in dry-run mode; only writes are skipped.
    pub async fn register_by_reference(&self, descriptor: &FileDescriptor) -> Result<RegistrationResult> {
        if self.dry_run {
            info!(
                "DRY RUN: register by reference: {} {} {:?} {:?} {}",
                descriptor.filename, descriptor.file_uuid, descriptor.cloud_urls, descriptor.size, descriptor.guid
            );
        }

        let reference = consolidate(
            &self.resolver,
            &descriptor.cloud_urls,
            descriptor.size,
            &descriptor.guid,
            &descriptor.filename,
        )
        .await?;
        let value = serde_json::to_value(&reference)?;

        self.register_json(
            &value,
            &descriptor.filename,
            descriptor.file_uuid,
            descriptor.version.as_deref(),
            FILEREF_CONTENT_TYPE,
        )
        .await
    }

    /// Stage an in-memory JSON document and register it by copy.
    pub async fn register_json(
        &self,
        value: &Value,
        filename: &str,
        file_uuid: Uuid,
        version: Option<&str>,
        content_type: &str,
    ) -> Result<RegistrationResult> {
        if self.dry_run {
            info!("DRY RUN: stage {} ({}) as {}", filename, content_type, file_uuid);
            return Ok(self.dry_run_result(file_uuid, filename, version));
        }

        let bytes = serde_json::to_vec(value)?;
        let staged = self
            .stager
            .stage_bytes(file_uuid, filename, bytes, content_type)
            .await?;
        self.register_by_copy(&staged, file_uuid, version).await
    }

    /// Stage a local file and register it by copy.
    pub async fn register_local_file(
        &self,
        path: &Path,
        file_uuid: Uuid,
        version: Option<&str>,
    ) -> Result<RegistrationResult> {
        let content_type = guess_content_type(path);
        if self.dry_run {
            let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            info!("DRY RUN: stage local file {} ({}) as {}", path.display(), content_type, file_uuid);
            return Ok(self.dry_run_result(file_uuid, filename, version));
        }

        let staged = self
            .stager
            .stage_file(file_uuid, path, content_type.as_ref())
            .await?;
        self.register_by_copy(&staged, file_uuid, version).await
    }

    /// Ask the store to copy a staged object in, waiting out an async copy.
    pub async fn register_by_copy(
        &self,
        staged: &StagedObject,
        file_uuid: Uuid,
        version: Option<&str>,
    ) -> Result<RegistrationResult> {
        let filename = staged.filename()?.to_string();
        let source_url = staged.source_url();

        if self.dry_run {
            info!(
                "DRY RUN: put file: uuid={} version={:?} source_url={}",
                file_uuid, version, source_url
            );
            return Ok(self.dry_run_result(file_uuid, &filename, version));
        }

        let started = Instant::now();
        debug!(file_uuid = %file_uuid, state = ?CopyState::Requested, "File {}: requesting copy", source_url);
        let response = self.store.put_file_by_copy(file_uuid, version, &source_url).await?;
        let version = response.version;

        let state = match CopyState::from(response.status) {
            CopyState::AlreadyPresent => {
                info!(
                    "File {}: Already exists -> {} ({} seconds)",
                    source_url,
                    version,
                    started.elapsed().as_secs()
                );
                CopyState::AlreadyPresent
            },
            CopyState::SyncCompleted => {
                info!(
                    "File {}: Sync copy -> {} ({} seconds)",
                    source_url,
                    version,
                    started.elapsed().as_secs()
                );
                CopyState::SyncCompleted
            },
            _ => {
                info!("File {}: Starting async copy -> {}", source_url, version);
                self.await_async_copy(&source_url, file_uuid, &version, started).await?
            },
        };
        debug!(file_uuid = %file_uuid, state = ?state, "File {}: registered", source_url);

        Ok(RegistrationResult {
            file_uuid,
            version,
            filename,
            already_present: state == CopyState::AlreadyPresent,
        })
    }

    async fn await_async_copy(
        &self,
        source_url: &str,
        file_uuid: Uuid,
        version: &str,
        started: Instant,
    ) -> Result<CopyState> {
        let deadline = Instant::now() + self.policy.timeout;
        let mut wait = self.policy.initial_wait;

        while Instant::now() < deadline {
            match self.store.head_file(file_uuid, version).await? {
                HeadStatus::Found => {
                    info!(
                        "File {}: Finished async copy -> {} (approximately {} seconds)",
                        source_url,
                        version,
                        started.elapsed().as_secs()
                    );
                    return Ok(CopyState::AsyncCompleted);
                },
                HeadStatus::NotFound => {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(LoaderError::Cancelled),
                        _ = tokio::time::sleep(wait) => {},
                    }
                    wait = self.policy.next_wait(wait);
                },
                HeadStatus::Other(status) => {
                    return Err(LoaderError::RegistrationFailed {
                        source_url: source_url.to_string(),
                        status,
                    })
                },
            }
        }

        debug!(state = ?CopyState::TimedOut, "File {}: giving up on async copy", source_url);
        Err(LoaderError::RegistrationTimedOut {
            source_url: source_url.to_string(),
            elapsed_secs: started.elapsed().as_secs(),
        })
    }

    /// Register a bundle listing `files` under a fresh version.
    ///
    /// Returns the fully qualified id `{bundle_uuid}.{version}`.
    pub async fn register_bundle(&self, bundle_uuid: Uuid, files: &[BundleFile]) -> Result<String> {
        let version = new_version();
        if self.dry_run {
            info!(
                "DRY RUN: put bundle: uuid={} version={} files={}",
                bundle_uuid,
                version,
                files.len()
            );
            return Ok(format!("{}.{}", bundle_uuid, version));
        }

        let version = self.store.put_bundle(bundle_uuid, &version, files).await?;
        let bundle_fqid = format!("{}.{}", bundle_uuid, version);
        info!("Loaded bundle: {}", bundle_fqid);
        Ok(bundle_fqid)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule_is_capped() {
        let policy = CopyPolicy::default();
        let mut wait = policy.initial_wait;
        let mut schedule = vec![wait];
        for _ in 0..6 {
            wait = policy.next_wait(wait);
            schedule.push(wait);
        }

        assert_eq!(schedule[0], Duration::from_secs(1));
        assert!(schedule[1] > Duration::from_millis(1617) && schedule[1] <= Duration::from_millis(1618));
        assert!(schedule.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*schedule.last().unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn test_copy_state_from_status() {
        assert_eq!(CopyState::from(PutFileStatus::AlreadyPresent), CopyState::AlreadyPresent);
        assert_eq!(CopyState::from(PutFileStatus::Created), CopyState::SyncCompleted);
        assert_eq!(CopyState::from(PutFileStatus::Accepted), CopyState::AsyncPending);
    }

    #[test]
    fn test_new_version_is_rfc3339() {
        let version = new_version();
        assert!(chrono::DateTime::parse_from_rfc3339(&version).is_ok());
        assert!(version.ends_with("+00:00"));
    }

    #[test]
    fn test_bundle_file_from_result() {
        let result = RegistrationResult {
            file_uuid: Uuid::nil(),
            version: "v1".to_string(),
            filename: "metadata.json".to_string(),
            already_present: true,
        };
        let entry = result.bundle_file(true);
        assert_eq!(entry.name, "metadata.json");
        assert_eq!(entry.version, "v1");
        assert!(entry.indexed);
    }
}
