//! Common types used across refload

use crate::error::{CommonError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Cloud providers whose objects can be loaded by reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudScheme {
    /// Amazon S3 (`s3://`)
    S3,
    /// Google Cloud Storage (`gs://`)
    Gs,
}

impl CloudScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloudScheme::S3 => "s3",
            CloudScheme::Gs => "gs",
        }
    }
}

impl std::fmt::Display for CloudScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `scheme://bucket/key` object location.
///
/// Both bucket and key are guaranteed non-empty. The key is kept verbatim
/// (no percent decoding), which is what the provider APIs expect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CloudUrl {
    scheme: CloudScheme,
    bucket: String,
    key: String,
}

impl CloudUrl {
    pub fn new(scheme: CloudScheme, bucket: impl Into<String>, key: impl Into<String>) -> Result<Self> {
        let bucket = bucket.into();
        let key = key.into();
        if bucket.is_empty() || key.is_empty() {
            return Err(CommonError::invalid_cloud_url(
                format!("{}://{}/{}", scheme, bucket, key),
                "bucket and key must both be present",
            ));
        }
        Ok(Self {
            scheme,
            bucket,
            key,
        })
    }

    pub fn scheme(&self) -> CloudScheme {
        self.scheme
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Last path segment of the key.
    pub fn filename(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

impl FromStr for CloudUrl {
    type Err = CommonError;

    fn from_str(raw: &str) -> Result<Self> {
        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| CommonError::invalid_cloud_url(raw, "missing scheme"))?;

        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "s3" => CloudScheme::S3,
            "gs" => CloudScheme::Gs,
            other => {
                return Err(CommonError::UnsupportedScheme {
                    url: raw.to_string(),
                    scheme: other.to_string(),
                })
            },
        };

        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() || key.is_empty() {
            return Err(CommonError::invalid_cloud_url(
                raw,
                "bucket and key must both be present",
            ));
        }

        Ok(Self {
            scheme,
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }
}

impl std::fmt::Display for CloudUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.bucket, self.key)
    }
}

impl Serialize for CloudUrl {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CloudUrl {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_s3_and_gs() {
        let url: CloudUrl = "s3://ucsc-topmed-datasets/a/b.bam".parse().unwrap();
        assert_eq!(url.scheme(), CloudScheme::S3);
        assert_eq!(url.bucket(), "ucsc-topmed-datasets");
        assert_eq!(url.key(), "a/b.bam");
        assert_eq!(url.filename(), "b.bam");

        let url: CloudUrl = "gs://broad-public-datasets/g.bam".parse().unwrap();
        assert_eq!(url.scheme(), CloudScheme::Gs);
        assert_eq!(url.to_string(), "gs://broad-public-datasets/g.bam");
    }

    #[test]
    fn test_rejects_unsupported_scheme() {
        let err = "https://example.com/file".parse::<CloudUrl>().unwrap_err();
        assert!(matches!(err, CommonError::UnsupportedScheme { ref scheme, .. } if scheme == "https"));
    }

    #[test]
    fn test_rejects_missing_bucket_or_key() {
        for raw in [
            "s3://definatelynotavalidbucketorfile",
            "gs://bucket/",
            "s3:///key",
            "no-scheme-at-all",
        ] {
            assert!(
                matches!(raw.parse::<CloudUrl>(), Err(CommonError::InvalidCloudUrl { .. })),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn test_serde_as_string() {
        let url: CloudUrl = "gs://bucket/key".parse().unwrap();
        let json = serde_json::to_string(&url).unwrap();
        assert_eq!(json, "\"gs://bucket/key\"");
        let back: CloudUrl = serde_json::from_str(&json).unwrap();
        assert_eq!(back, url);
    }

    proptest! {
        #[test]
        fn prop_display_parses_back(bucket in "[a-z0-9][a-z0-9.-]{0,20}", key in "[A-Za-z0-9_./-]{1,40}") {
            let url = CloudUrl::new(CloudScheme::S3, bucket.clone(), key.clone()).unwrap();
            let parsed: CloudUrl = url.to_string().parse().unwrap();
            prop_assert_eq!(parsed.bucket(), bucket.as_str());
            prop_assert_eq!(parsed.key(), key.as_str());
        }
    }
}
