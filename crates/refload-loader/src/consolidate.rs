//! Reference consolidation
//!
//! Merges the caller-declared size with metadata observed at every cloud
//! location of one logical file into the fileref document registered with
//! the data store.

use crate::error::{LoaderError, Result};
use crate::metadata::{FileMetadata, MetadataResolver};
use refload_common::types::{CloudScheme, CloudUrl};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Content type under which fileref documents are registered.
pub const FILEREF_CONTENT_TYPE: &str = "application/json; dss-type=fileref";

/// Canonical metadata for a file loaded by reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsolidatedReference {
    /// Always the declared size
    pub size: u64,

    #[serde(rename = "content-type", skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    #[serde(flatten)]
    pub checksums: BTreeMap<String, String>,

    pub url: Vec<String>,

    pub aliases: Vec<String>,
}

fn provider_label(scheme: CloudScheme) -> &'static str {
    match scheme {
        CloudScheme::S3 => "S3",
        CloudScheme::Gs => "GS",
    }
}

/// Parse every URL up front so no metadata is fetched for a bad list.
pub fn parse_urls(urls: &[String]) -> Result<Vec<CloudUrl>> {
    if urls.is_empty() {
        return Err(LoaderError::file_url("no cloud URLs given for file"));
    }
    urls.iter()
        .map(|url| url.parse::<CloudUrl>().map_err(LoaderError::from))
        .collect()
}

/// Combine declared and observed metadata.
///
/// `observed` is in URL order; later entries overwrite duplicate keys of
/// earlier ones. Only a reported size is compared, so a provider that
/// reported nothing never conflicts, while a reported `0` does.
pub fn merge(
    urls: &[String],
    declared_size: Option<u64>,
    observed: Vec<(CloudScheme, FileMetadata)>,
    alias: &str,
    filename: &str,
) -> Result<ConsolidatedReference> {
    let declared = declared_size.ok_or_else(|| LoaderError::MissingInputFileSize {
        filename: filename.to_string(),
    })?;

    let mut merged = FileMetadata {
        size: Some(declared),
        ..Default::default()
    };
    for (scheme, metadata) in observed {
        if let Some(size) = metadata.size {
            if size != declared {
                return Err(LoaderError::InconsistentFileSizeValues {
                    provider: provider_label(scheme).to_string(),
                    declared,
                    observed: size,
                });
            }
        }
        merged.merge(metadata);
    }

    Ok(ConsolidatedReference {
        size: declared,
        content_type: merged.content_type,
        checksums: merged.checksums,
        url: urls.to_vec(),
        aliases: vec![alias.to_string()],
    })
}

/// Resolve metadata for every URL and consolidate it.
pub async fn consolidate(
    resolver: &MetadataResolver,
    urls: &[String],
    declared_size: Option<u64>,
    alias: &str,
    filename: &str,
) -> Result<ConsolidatedReference> {
    let parsed = parse_urls(urls)?;
    if declared_size.is_none() {
        return Err(LoaderError::MissingInputFileSize {
            filename: filename.to_string(),
        });
    }

    let mut observed = Vec::with_capacity(parsed.len());
    for url in &parsed {
        let metadata = resolver.fetch(url).await.into_metadata();
        debug!(url = %url, found = !metadata.is_empty(), "Resolved metadata for reference");
        observed.push((url.scheme(), metadata));
    }

    merge(urls, declared_size, observed, alias, filename)
}
