//! Data store endpoint URL builders
//!
//! Query parameters are attached by the client so they are encoded.

use uuid::Uuid;

/// Replica every registration targets.
pub const REPLICA: &str = "aws";

/// Build file URL
pub fn file_url(base_url: &str, file_uuid: Uuid) -> String {
    format!("{}/files/{}", base_url.trim_end_matches('/'), file_uuid)
}

/// Build bundle URL
pub fn bundle_url(base_url: &str, bundle_uuid: Uuid) -> String {
    format!("{}/bundles/{}", base_url.trim_end_matches('/'), bundle_uuid)
}
