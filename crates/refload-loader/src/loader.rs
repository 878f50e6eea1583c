//! Bundle loading and batch accounting
//!
//! Every entry of a batch ends in exactly one of four buckets: unparsed,
//! load-failed, loaded or unattempted. A failing bundle never stops the
//! batch; only a non-list document or an interrupt does.

use crate::error::{LoaderError, Result};
use crate::parser::{parse_all, BundleParser, ParsedBundle};
use crate::registrar::{new_version, Registrar};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Name the metadata payload is registered under.
pub const METADATA_FILENAME: &str = "metadata.json";

const METADATA_CONTENT_TYPE: &str = "application/json";

/// A bundle that made it into the store.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedBundle {
    pub bundle: ParsedBundle,
    /// `{bundle_uuid}.{version}`
    pub bundle_fqid: String,
}

/// A parsed bundle whose registration failed.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedBundle {
    pub bundle: ParsedBundle,
    pub error: String,
}

/// Outcome of one batch run.
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub parsed: Vec<ParsedBundle>,
    pub unparsed: Vec<Value>,
    pub loaded: Vec<LoadedBundle>,
    pub load_failed: Vec<FailedBundle>,
    /// Number of entries in the input document
    pub total: usize,
    /// True when the run stopped early on cancellation
    pub interrupted: bool,
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub unparsed: usize,
    pub load_failed: usize,
    pub loaded: usize,
    pub unattempted: usize,
}

impl BatchSummary {
    pub fn all_loaded(&self) -> bool {
        self.unparsed == 0 && self.load_failed == 0 && self.unattempted == 0
    }
}

impl BatchResult {
    pub fn summary(&self) -> BatchSummary {
        let unparsed = self.unparsed.len();
        let load_failed = self.load_failed.len();
        let loaded = self.loaded.len();
        BatchSummary {
            unparsed,
            load_failed,
            loaded,
            unattempted: self.total.saturating_sub(unparsed + load_failed + loaded),
        }
    }

    /// Bundle ids of everything that failed to load, in batch order.
    pub fn failed_bundle_ids(&self) -> Vec<Uuid> {
        self.load_failed.iter().map(|f| f.bundle.bundle_uuid).collect()
    }

    pub fn log_summary(&self) {
        let summary = self.summary();
        if summary.unattempted > 0 {
            warn!("Did not yet attempt to load {} bundles", summary.unattempted);
        }
        if summary.unparsed > 0 || summary.load_failed > 0 {
            error!("Could not parse {} bundles", summary.unparsed);
            error!("Could not load {} bundles", summary.load_failed);
            for failed in &self.load_failed {
                error!(bundle_uuid = %failed.bundle.bundle_uuid, "Load failure: {}", failed.error);
            }
        }
        if summary.all_loaded() {
            info!("Successfully loaded all bundles!");
        } else {
            info!("Successfully loaded {} bundles", summary.loaded);
        }
    }
}

/// Metadata payload with its schema reference attached.
///
/// A payload that is not an object is wrapped under `user_metadata`.
pub fn described_metadata(metadata: &Value, schema_url: &str) -> Value {
    match metadata {
        Value::Object(map) => {
            let mut map = map.clone();
            map.insert("describedBy".to_string(), Value::String(schema_url.to_string()));
            Value::Object(map)
        },
        other => json!({"user_metadata": other, "describedBy": schema_url}),
    }
}

/// Loads parsed bundles into the store through a [`Registrar`].
pub struct BundleLoader {
    registrar: Registrar,
    parser: Box<dyn BundleParser>,
    schema_url: String,
}

impl BundleLoader {
    pub fn new(registrar: Registrar, parser: Box<dyn BundleParser>) -> Self {
        let schema_url = parser.default_schema_url().to_string();
        Self {
            registrar,
            parser,
            schema_url,
        }
    }

    pub fn with_schema_url(mut self, schema_url: impl Into<String>) -> Self {
        self.schema_url = schema_url.into();
        self
    }

    pub fn schema_url(&self) -> &str {
        &self.schema_url
    }

    pub fn registrar(&self) -> &Registrar {
        &self.registrar
    }

    /// Register the metadata payload, every data file, then the bundle.
    ///
    /// Returns the bundle's fully qualified id. Nothing is rolled back when a
    /// later step fails.
    pub async fn load_bundle(&self, bundle: &ParsedBundle) -> Result<String> {
        info!("Attempting to load bundle with uuid {}", bundle.bundle_uuid);

        let metadata = described_metadata(&bundle.metadata, &self.schema_url);
        let metadata_version = new_version();
        let registered = self
            .registrar
            .register_json(
                &metadata,
                METADATA_FILENAME,
                Uuid::new_v4(),
                Some(&metadata_version),
                METADATA_CONTENT_TYPE,
            )
            .await?;
        debug!(
            "Uploaded metadata file: {} with uuid:version {}:{}",
            registered.filename, registered.file_uuid, registered.version
        );

        let mut files = Vec::with_capacity(bundle.data_files.len() + 1);
        files.push(registered.bundle_file(true));

        for data_file in &bundle.data_files {
            debug!(
                "Attempting to upload data file: {} with uuid:version {}:{:?}...",
                data_file.filename, data_file.file_uuid, data_file.version
            );
            let registered = if data_file.version.is_some() {
                self.registrar.register_by_reference(data_file).await?
            } else {
                let mut versioned = data_file.clone();
                versioned.version = Some(new_version());
                self.registrar.register_by_reference(&versioned).await?
            };
            debug!(
                "...Successfully uploaded data file: {} with uuid:version {}:{}",
                registered.filename, registered.file_uuid, registered.version
            );
            files.push(registered.bundle_file(false));
        }

        self.registrar.register_bundle(bundle.bundle_uuid, &files).await
    }

    /// Parse `raw` and load every bundle it describes.
    ///
    /// Fails only when `raw` is not a list. On cancellation the bundle in
    /// flight and all later bundles are left unattempted.
    pub async fn load_all(&self, raw: &Value) -> Result<BatchResult> {
        let outcome = parse_all(self.parser.as_ref(), raw)?;
        let cancel = self.registrar.cancellation().clone();

        let mut result = BatchResult {
            total: outcome.total(),
            unparsed: outcome.unparsed,
            ..Default::default()
        };

        for bundle in &outcome.parsed {
            if cancel.is_cancelled() {
                result.interrupted = true;
                break;
            }

            let loaded = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(LoaderError::Cancelled),
                loaded = self.load_bundle(bundle) => loaded,
            };

            match loaded {
                Ok(bundle_fqid) => result.loaded.push(LoadedBundle {
                    bundle: bundle.clone(),
                    bundle_fqid,
                }),
                Err(LoaderError::Cancelled) => {
                    result.interrupted = true;
                    break;
                },
                Err(e) => {
                    error!(bundle_uuid = %bundle.bundle_uuid, "Error loading bundle {}: {}", bundle.bundle_uuid, e);
                    result.load_failed.push(FailedBundle {
                        bundle: bundle.clone(),
                        error: e.to_string(),
                    });
                },
            }
        }

        if result.interrupted {
            warn!("Loading cancelled; remaining bundles were not attempted");
        }
        result.parsed = outcome.parsed;
        Ok(result)
    }
}
