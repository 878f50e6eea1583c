//! Checksum utilities for staged objects and provider metadata

use crate::error::Result;
use base64::Engine;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Digests attached to an object before the destination store copies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedChecksums {
    /// Single-part S3 ETag, i.e. the hex MD5 of the content.
    pub s3_etag: String,
    pub sha1: String,
    pub sha256: String,
    /// CRC32C as 8 lower-case hex digits
    pub crc32c: String,
}

impl StagedChecksums {
    /// Object tags in the form the destination store reads them.
    ///
    /// The store refuses to copy an object missing any of the four.
    pub fn as_tags(&self) -> Vec<(String, String)> {
        vec![
            ("hca-dss-s3_etag".to_string(), self.s3_etag.clone()),
            ("hca-dss-sha1".to_string(), self.sha1.clone()),
            ("hca-dss-sha256".to_string(), self.sha256.clone()),
            ("hca-dss-crc32c".to_string(), self.crc32c.clone()),
        ]
    }
}

/// Compute staged checksums for any readable source
pub fn compute_checksums<R: Read>(reader: &mut R) -> Result<StagedChecksums> {
    let mut sha1 = Sha1::new();
    let mut sha256 = Sha256::new();
    let mut md5 = md5::Context::new();
    let mut crc = 0u32;
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        let chunk = &buffer[..bytes_read];
        sha1.update(chunk);
        sha256.update(chunk);
        md5.consume(chunk);
        crc = crc32c::crc32c_append(crc, chunk);
    }

    Ok(StagedChecksums {
        s3_etag: format!("{:x}", md5.compute()),
        sha1: hex::encode(sha1.finalize()),
        sha256: hex::encode(sha256.finalize()),
        crc32c: format!("{:08x}", crc),
    })
}

/// Compute staged checksums for a file
pub fn compute_file_checksums(path: impl AsRef<Path>) -> Result<StagedChecksums> {
    let mut file = std::fs::File::open(path)?;
    compute_checksums(&mut file)
}

/// Convert the base64 big-endian CRC32C reported by GCS into lower-case hex.
///
/// Returns `None` when the value is not valid base64.
pub fn crc32c_base64_to_hex(encoded: &str) -> Option<String> {
    base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()
        .map(hex::encode)
}
