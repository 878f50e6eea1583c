//! refload loader library
//!
//! Registers batches of cloud-hosted files into a DSS data store by
//! reference: the bytes stay in their S3 or GCS buckets and the store records
//! a fileref document pointing at them.
//!
//! # Pipeline
//!
//! - [`parser`]: batch document to validated [`parser::ParsedBundle`]s
//! - [`metadata`]: size, content type and checksums per cloud object
//! - [`consolidate`]: one canonical fileref per logical file
//! - [`registrar`]: staging and copy registration with the store
//! - [`loader`]: per-bundle orchestration and batch accounting
//!
//! # Example
//!
//! ```no_run
//! use refload_loader::loader::BundleLoader;
//! use refload_loader::parser::StandardParser;
//! use refload_loader::registrar::Registrar;
//!
//! async fn run(registrar: Registrar, batch: serde_json::Value) -> refload_loader::Result<()> {
//!     let loader = BundleLoader::new(registrar, Box::new(StandardParser));
//!     let result = loader.load_all(&batch).await?;
//!     result.log_summary();
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod aws;
pub mod config;
pub mod consolidate;
pub mod error;
pub mod loader;
pub mod metadata;
pub mod parser;
pub mod registrar;
pub mod staging;
pub mod store;

pub use error::{LoaderError, ParseError, Result};
