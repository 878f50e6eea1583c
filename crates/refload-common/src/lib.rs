//! refload common library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the refload workspace.
//!
//! # Overview
//!
//! - **Error Handling**: Common error type and result alias
//! - **Checksums**: Digests the destination store expects on staged objects
//! - **Types**: Cloud object URLs (`s3://` and `gs://`)
//! - **Logging**: Process-wide `tracing` initialisation
//!
//! # Example
//!
//! ```no_run
//! use refload_common::types::CloudUrl;
//!
//! fn bucket_of(raw: &str) -> refload_common::Result<String> {
//!     let url: CloudUrl = raw.parse()?;
//!     Ok(url.bucket().to_string())
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{CommonError, Result};
