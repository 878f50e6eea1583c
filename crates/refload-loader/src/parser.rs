//! Batch document parsing
//!
//! A batch is a JSON array of bundle entries. Each entry is validated and
//! decoded on its own by a [`BundleParser`] for the input dialect; a bad entry
//! is set aside without affecting its neighbours.

use crate::error::ParseError;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use tracing::{error, info, warn};
use uuid::Uuid;

static UUID_PATTERN: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new("[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}"));

static RFC3339_PATTERN: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^\d{4}-(0[1-9]|1[0-2])-(0[1-9]|[12][0-9]|3[01])",
        r"T([01][0-9]|2[0-3]):[0-5][0-9]:([0-5][0-9]|60)(\.[0-9]+)?",
        r"(Z|[+-]([01][0-9]|2[0-3]):[0-5][0-9])$",
    ))
});

fn pattern(compiled: &'static LazyLock<Result<Regex, regex::Error>>) -> Result<&'static Regex, ParseError> {
    compiled
        .as_ref()
        .map_err(|e| ParseError::new(format!("invalid built-in pattern: {}", e)))
}

/// One data file of a bundle, ready for registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    pub filename: String,
    pub file_uuid: Uuid,
    pub cloud_urls: Vec<String>,
    pub bundle_uuid: Uuid,
    /// External identifier, registered as the file's alias
    pub guid: String,
    /// RFC3339 version; `None` lets the store assign one
    pub version: Option<String>,
    /// Size declared by the input document
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedBundle {
    pub bundle_uuid: Uuid,
    /// Indexed metadata payload, passed through untouched
    pub metadata: Value,
    pub data_files: Vec<FileDescriptor>,
}

/// Decodes one batch entry of a given input dialect.
pub trait BundleParser: Send + Sync {
    fn parse(&self, entry: &Value) -> Result<ParsedBundle, ParseError>;

    /// Short dialect name used in logs
    fn dialect(&self) -> &'static str;

    /// Schema the metadata payload is described by unless configured otherwise
    fn default_schema_url(&self) -> &'static str;
}

/// Result of parsing a whole batch.
#[derive(Debug, Clone, Default)]
pub struct ParseOutcome {
    pub parsed: Vec<ParsedBundle>,
    pub unparsed: Vec<Value>,
}

impl ParseOutcome {
    pub fn total(&self) -> usize {
        self.parsed.len() + self.unparsed.len()
    }
}

/// Parse every entry of a batch document.
///
/// Fails as a whole only when `raw` is not an array.
pub fn parse_all(parser: &dyn BundleParser, raw: &Value) -> Result<ParseOutcome, ParseError> {
    let entries = raw.as_array().ok_or_else(|| {
        ParseError::new(format!(
            "Expected a list of bundles at the top level of the input, found {}",
            json_type(raw)
        ))
    })?;

    let mut outcome = ParseOutcome::default();
    for (index, entry) in entries.iter().enumerate() {
        match parser.parse(entry) {
            Ok(bundle) => outcome.parsed.push(bundle),
            Err(e) => {
                error!(entry = index + 1, dialect = parser.dialect(), "Failed to parse bundle: {}", e);
                outcome.unparsed.push(entry.clone());
            },
        }
    }

    info!(
        parsed = outcome.parsed.len(),
        unparsed = outcome.unparsed.len(),
        "Parsed {} bundle entries",
        entries.len()
    );
    Ok(outcome)
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

/// Extract the single UUID embedded in an identifier, lower-cased.
pub fn extract_uuid(identifier: &str) -> Result<Uuid, ParseError> {
    let lowered = identifier.to_lowercase();
    let matches: Vec<&str> = pattern(&UUID_PATTERN)?
        .find_iter(&lowered)
        .map(|m| m.as_str())
        .collect();

    match matches.as_slice() {
        [single] => Uuid::parse_str(single)
            .map_err(|e| ParseError::new(format!("Misformatted identifier {}: {}", identifier, e))),
        [] => Err(ParseError::new(format!(
            "Misformatted identifier: {} should contain a uuid",
            identifier
        ))),
        _ => Err(ParseError::new(format!(
            "Misformatted identifier: {} contains multiple uuids. Only one was expected",
            identifier
        ))),
    }
}

pub fn is_rfc3339(value: &str) -> bool {
    pattern(&RFC3339_PATTERN).is_ok_and(|re| re.is_match(value))
}

/// Pick the file version: `updated` when compliant, else `created`.
pub fn resolve_version(file_info: &Map<String, Value>) -> Result<String, ParseError> {
    fn compliant(file_info: &Map<String, Value>, key: &str) -> Option<String> {
        let value = file_info.get(key)?;
        match value.as_str() {
            Some(s) if is_rfc3339(s) => Some(s.to_string()),
            _ => {
                warn!("Failed to parse file version from date {}: {}", key, value);
                None
            },
        }
    }

    compliant(file_info, "updated")
        .or_else(|| compliant(file_info, "created"))
        .ok_or_else(|| {
            ParseError::new("Either bundle had no updated / created time or it was not rfc3339 compliant")
        })
}

/// Cloud URLs of a standard file-info, de-duplicated in input order.
fn standard_cloud_urls(file_info: &Map<String, Value>) -> Result<Vec<String>, ParseError> {
    let urls = file_info
        .get("urls")
        .ok_or_else(|| ParseError::new(format!("URL field not present in file_info: {}", Value::from(file_info.clone()))))?
        .as_array()
        .ok_or_else(|| ParseError::new("Expected 'urls' to be a list"))?;
    if urls.is_empty() {
        return Err(ParseError::new("Expected at least one cloud url in file_info"));
    }

    let mut collected: Vec<String> = Vec::with_capacity(urls.len());
    for entry in urls {
        let url = entry
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| ParseError::new(format!("Expected 'url' as key for urls in file_info: {}", entry)))?;
        if !collected.iter().any(|u| u == url) {
            collected.push(url.to_string());
        }
    }
    Ok(collected)
}

/// Optional declared size, as an integer or an integer string.
fn declared_size(file_info: &Map<String, Value>) -> Result<Option<u64>, ParseError> {
    match file_info.get("size") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| ParseError::new(format!("Invalid file size: {}", n))),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ParseError::new(format!("Invalid file size: {}", s))),
        Some(other) => Err(ParseError::new(format!("Invalid file size: {}", other))),
    }
}

fn required<'a>(object: &'a Map<String, Value>, key: &str) -> Result<&'a Value, ParseError> {
    object
        .get(key)
        .ok_or_else(|| ParseError::new(format!("Failed to parse bundle: missing '{}'", key)))
}

fn required_str<'a>(object: &'a Map<String, Value>, key: &str) -> Result<&'a str, ParseError> {
    required(object, key)?
        .as_str()
        .ok_or_else(|| ParseError::new(format!("Failed to parse bundle: '{}' must be a string", key)))
}

fn as_object<'a>(value: &'a Value, what: &str) -> Result<&'a Map<String, Value>, ParseError> {
    value
        .as_object()
        .ok_or_else(|| ParseError::new(format!("Failed to parse bundle: {} must be an object", what)))
}

/// Schema of metadata payloads in the standard dialect.
pub const STANDARD_SCHEMA_URL: &str =
    "https://raw.githubusercontent.com/DataBiosphere/metadata-schema/master/json_schema/cgp/gen3/2.0.0/cgp_gen3_metadata.json";

/// Schema of metadata payloads in the gen3 dialect.
pub const GEN3_SCHEMA_URL: &str =
    "https://raw.githubusercontent.com/DataBiosphere/metadata-schema/master/json_schema/cgp/gen3/0.1.0/cgp_gen3_metadata.json";

/// Parser for the standard dialect:
///
/// ```json
/// {
///   "data_bundle": {"id": "<uuid>", "user_metadata": {}},
///   "data_objects": {
///     "<id containing a uuid>": {
///       "name": "sample.bam",
///       "created": "2018-01-01T00:00:00Z",
///       "urls": [{"url": "s3://bucket/key"}]
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardParser;

impl BundleParser for StandardParser {
    fn parse(&self, entry: &Value) -> Result<ParsedBundle, ParseError> {
        let bundle = as_object(entry, "bundle entry")?;
        let data_bundle = as_object(required(bundle, "data_bundle")?, "data_bundle")?;
        let bundle_id = required_str(data_bundle, "id")?;
        let bundle_uuid = Uuid::parse_str(bundle_id)
            .map_err(|_| ParseError::new(format!("Bundle id {} is not a uuid", bundle_id)))?;
        let metadata = required(data_bundle, "user_metadata")?.clone();
        let data_objects = as_object(required(bundle, "data_objects")?, "data_objects")?;

        let mut data_files = Vec::with_capacity(data_objects.len());
        // document order (serde_json `preserve_order`)
        for (file_id, file_info) in data_objects {
            let file_info = as_object(file_info, "file info")?;
            data_files.push(FileDescriptor {
                filename: required_str(file_info, "name")?.to_string(),
                file_uuid: extract_uuid(file_id)?,
                cloud_urls: standard_cloud_urls(file_info)?,
                bundle_uuid,
                guid: file_id.clone(),
                version: Some(resolve_version(file_info)?),
                size: declared_size(file_info)?,
            });
        }

        Ok(ParsedBundle {
            bundle_uuid,
            metadata,
            data_files,
        })
    }

    fn dialect(&self) -> &'static str {
        "standard"
    }

    fn default_schema_url(&self) -> &'static str {
        STANDARD_SCHEMA_URL
    }
}

/// Parser for gen3 manifest exports.
///
/// Metadata is taken from `metadata`, or assembled from `aliquot`, `sample`
/// and `core_metadata`. Files carry no version; the loader assigns one.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gen3Parser;

const GEN3_METADATA_KEYS: [&str; 3] = ["aliquot", "sample", "core_metadata"];

impl BundleParser for Gen3Parser {
    fn parse(&self, entry: &Value) -> Result<ParsedBundle, ParseError> {
        let bundle = as_object(entry, "bundle entry")?;
        let bundle_uuid = match bundle.get("bundle_did") {
            Some(did) => extract_uuid(
                did.as_str()
                    .ok_or_else(|| ParseError::new("Failed to parse bundle: 'bundle_did' must be a string"))?,
            )?,
            None => Uuid::new_v4(),
        };

        let metadata = match bundle.get("metadata") {
            Some(metadata) => metadata.clone(),
            None => {
                let mut assembled = Map::new();
                for key in GEN3_METADATA_KEYS {
                    assembled.insert(key.to_string(), required(bundle, key)?.clone());
                }
                Value::Object(assembled)
            },
        };

        let manifest = required(bundle, "manifest")?
            .as_array()
            .ok_or_else(|| ParseError::new("Failed to parse bundle: 'manifest' must be a list"))?;

        let mut data_files = Vec::with_capacity(manifest.len());
        for file_info in manifest {
            let file_info = as_object(file_info, "manifest entry")?;
            let did = required_str(file_info, "did")?;
            let mut cloud_urls = Vec::new();
            for key in ["s3url", "gsurl"] {
                if let Some(url) = file_info.get(key).and_then(Value::as_str) {
                    cloud_urls.push(url.to_string());
                }
            }
            if cloud_urls.is_empty() {
                return Err(ParseError::new(format!("Manifest entry {} has no s3url or gsurl", did)));
            }

            data_files.push(FileDescriptor {
                filename: required_str(file_info, "name")?.to_string(),
                file_uuid: extract_uuid(did)?,
                cloud_urls,
                bundle_uuid,
                guid: did.to_string(),
                version: None,
                size: declared_size(file_info)?,
            });
        }

        Ok(ParsedBundle {
            bundle_uuid,
            metadata,
            data_files,
        })
    }

    fn dialect(&self) -> &'static str {
        "gen3"
    }

    fn default_schema_url(&self) -> &'static str {
        GEN3_SCHEMA_URL
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    const BUNDLE_ID: &str = "0f9e8d7c-6b5a-4f3e-9d2c-1b0a9f8e7d6c";
    const FILE_ID: &str = "dg.4503/4a5d7c2e-9f1b-4c3d-8e6f-0a1b2c3d4e5f";

    fn standard_entry() -> Value {
        json!({
            "data_bundle": {"id": BUNDLE_ID, "user_metadata": {"donor": "D1"}},
            "data_objects": {
                FILE_ID: {
                    "name": "sample.bam",
                    "created": "2018-01-01T00:00:00Z",
                    "updated": "2018-02-01T00:00:00.123+02:00",
                    "size": "1234",
                    "urls": [
                        {"url": "s3://bucket/sample.bam"},
                        {"url": "gs://bucket/sample.bam"},
                        {"url": "s3://bucket/sample.bam"}
                    ]
                }
            }
        })
    }

    #[test]
    fn test_standard_parse() {
        let bundle = StandardParser.parse(&standard_entry()).unwrap();
        assert_eq!(bundle.bundle_uuid.to_string(), BUNDLE_ID);
        assert_eq!(bundle.metadata, json!({"donor": "D1"}));
        assert_eq!(bundle.data_files.len(), 1);

        let file = &bundle.data_files[0];
        assert_eq!(file.filename, "sample.bam");
        assert_eq!(file.file_uuid.to_string(), "4a5d7c2e-9f1b-4c3d-8e6f-0a1b2c3d4e5f");
        assert_eq!(file.guid, FILE_ID);
        assert_eq!(file.version.as_deref(), Some("2018-02-01T00:00:00.123+02:00"));
        assert_eq!(file.size, Some(1234));
        assert_eq!(
            file.cloud_urls,
            vec!["s3://bucket/sample.bam".to_string(), "gs://bucket/sample.bam".to_string()]
        );
    }

    #[test]
    fn test_standard_keeps_file_order() {
        let file_info = |name: &str| {
            json!({
                "name": name,
                "created": "2018-01-01T00:00:00Z",
                "urls": [{"url": format!("s3://bucket/{name}")}]
            })
        };
        let mut data_objects = Map::new();
        data_objects.insert("ffffffff-0000-4000-8000-000000000001".to_string(), file_info("first.bam"));
        data_objects.insert("00000000-0000-4000-8000-000000000002".to_string(), file_info("second.bam"));
        data_objects.insert("77777777-0000-4000-8000-000000000003".to_string(), file_info("third.bam"));
        let entry = json!({
            "data_bundle": {"id": BUNDLE_ID, "user_metadata": {}},
            "data_objects": Value::Object(data_objects),
        });

        let bundle = StandardParser.parse(&entry).unwrap();
        let names: Vec<&str> = bundle.data_files.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(names, vec!["first.bam", "second.bam", "third.bam"]);
    }

    #[test]
    fn test_standard_keeps_order_from_document_text() {
        let raw = format!(
            r#"{{"data_bundle": {{"id": "{BUNDLE_ID}", "user_metadata": {{}}}},
                "data_objects": {{
                    "ffffffff-0000-4000-8000-000000000001": {{"name": "z.bam", "created": "2018-01-01T00:00:00Z", "urls": [{{"url": "s3://b/z.bam"}}]}},
                    "00000000-0000-4000-8000-000000000002": {{"name": "a.bam", "created": "2018-01-01T00:00:00Z", "urls": [{{"url": "s3://b/a.bam"}}]}}
                }}}}"#
        );
        let entry: Value = serde_json::from_str(&raw).unwrap();

        let bundle = StandardParser.parse(&entry).unwrap();
        assert_eq!(bundle.data_files[0].filename, "z.bam");
        assert_eq!(bundle.data_files[1].filename, "a.bam");
    }

    #[test]
    fn test_standard_missing_containers() {
        for key in ["data_bundle", "data_objects"] {
            let mut entry = standard_entry();
            entry.as_object_mut().unwrap().remove(key);
            assert!(StandardParser.parse(&entry).is_err(), "missing {key} must fail");
        }
        let mut entry = standard_entry();
        entry["data_bundle"].as_object_mut().unwrap().remove("user_metadata");
        assert!(StandardParser.parse(&entry).is_err());
    }

    #[test]
    fn test_standard_bundle_id_must_be_uuid() {
        let mut entry = standard_entry();
        entry["data_bundle"]["id"] = json!("not-a-uuid");
        assert!(StandardParser.parse(&entry).is_err());
    }

    #[test]
    fn test_missing_url_key_fails() {
        let mut entry = standard_entry();
        entry["data_objects"][FILE_ID]["urls"] = json!([{"url": "s3://a/b"}, {"href": "gs://a/b"}]);
        assert!(StandardParser.parse(&entry).is_err());

        entry["data_objects"][FILE_ID]["urls"] = json!([]);
        assert!(StandardParser.parse(&entry).is_err());

        entry["data_objects"][FILE_ID].as_object_mut().unwrap().remove("urls");
        assert!(StandardParser.parse(&entry).is_err());
    }

    #[test]
    fn test_version_falls_back_to_created() {
        let info = json!({"updated": "yesterday", "created": "2018-01-01T00:00:00Z"});
        assert_eq!(
            resolve_version(info.as_object().unwrap()).unwrap(),
            "2018-01-01T00:00:00Z"
        );

        let info = json!({"created": "2018-01-01T00:00:00Z"});
        assert_eq!(
            resolve_version(info.as_object().unwrap()).unwrap(),
            "2018-01-01T00:00:00Z"
        );
    }

    #[test]
    fn test_version_requires_compliant_timestamp() {
        for info in [
            json!({}),
            json!({"updated": "2018-01-01", "created": "2018-01-01 00:00:00"}),
            json!({"updated": 17, "created": null}),
        ] {
            assert!(resolve_version(info.as_object().unwrap()).is_err(), "{info}");
        }
    }

    #[test]
    fn test_rfc3339_pattern() {
        assert!(is_rfc3339("2018-01-01T00:00:00Z"));
        assert!(is_rfc3339("2018-12-31T23:59:60.5-11:30"));
        assert!(!is_rfc3339("2018-13-01T00:00:00Z"));
        assert!(!is_rfc3339("2018-01-01T24:00:00Z"));
        assert!(!is_rfc3339("2018-01-01T00:00:00"));
    }

    #[test]
    fn test_declared_size_forms() {
        let parse = |v: Value| declared_size(v.as_object().unwrap());
        assert_eq!(parse(json!({"size": 10})).unwrap(), Some(10));
        assert_eq!(parse(json!({"size": "10"})).unwrap(), Some(10));
        assert_eq!(parse(json!({})).unwrap(), None);
        assert!(parse(json!({"size": -1})).is_err());
        assert!(parse(json!({"size": "ten"})).is_err());
    }

    #[test]
    fn test_extract_uuid_counts() {
        assert!(extract_uuid("no uuid here").is_err());
        assert!(extract_uuid(&format!(
            "{}/{}",
            "4a5d7c2e-9f1b-4c3d-8e6f-0a1b2c3d4e5f", "0f9e8d7c-6b5a-4f3e-9d2c-1b0a9f8e7d6c"
        ))
        .is_err());
        assert_eq!(
            extract_uuid("DG.4503/4A5D7C2E-9F1B-4C3D-8E6F-0A1B2C3D4E5F").unwrap().to_string(),
            "4a5d7c2e-9f1b-4c3d-8e6f-0a1b2c3d4e5f"
        );
    }

    #[test]
    fn test_parse_all_requires_list() {
        let err = parse_all(&StandardParser, &standard_entry()).unwrap_err();
        assert!(err.0.contains("an object"));
    }

    #[test]
    fn test_parse_all_diverts_bad_entries() {
        let mut bad = standard_entry();
        bad["data_objects"][FILE_ID]["urls"] = json!([{"nope": 1}]);
        let raw = json!([standard_entry(), bad, standard_entry()]);

        let outcome = parse_all(&StandardParser, &raw).unwrap();
        assert_eq!(outcome.parsed.len(), 2);
        assert_eq!(outcome.unparsed, vec![bad]);
        assert_eq!(outcome.total(), 3);
    }

    #[test]
    fn test_gen3_parse_with_metadata_fields() {
        let entry = json!({
            "bundle_did": format!("dg.4503/{BUNDLE_ID}"),
            "aliquot": {"id": "a"},
            "sample": {"id": "s"},
            "core_metadata": {"id": "c"},
            "manifest": [{
                "name": "reads.cram",
                "did": FILE_ID,
                "s3url": "s3://bucket/reads.cram",
                "gsurl": "gs://bucket/reads.cram",
                "size": 99
            }]
        });

        let bundle = Gen3Parser.parse(&entry).unwrap();
        assert_eq!(bundle.bundle_uuid.to_string(), BUNDLE_ID);
        assert_eq!(
            bundle.metadata,
            json!({"aliquot": {"id": "a"}, "sample": {"id": "s"}, "core_metadata": {"id": "c"}})
        );
        let file = &bundle.data_files[0];
        assert_eq!(file.guid, FILE_ID);
        assert_eq!(file.version, None);
        assert_eq!(file.size, Some(99));
        assert_eq!(file.cloud_urls.len(), 2);
    }

    #[test]
    fn test_gen3_generates_bundle_uuid_and_requires_metadata() {
        let entry = json!({"metadata": {"k": "v"}, "manifest": []});
        let bundle = Gen3Parser.parse(&entry).unwrap();
        assert_eq!(bundle.bundle_uuid.get_version_num(), 4);
        assert!(bundle.data_files.is_empty());

        let entry = json!({"aliquot": {}, "sample": {}, "manifest": []});
        assert!(Gen3Parser.parse(&entry).is_err());
    }

    #[test]
    fn test_gen3_manifest_entry_needs_url() {
        let entry = json!({"metadata": {}, "manifest": [{"name": "x", "did": FILE_ID}]});
        assert!(Gen3Parser.parse(&entry).is_err());
    }

    proptest! {
        #[test]
        fn prop_single_uuid_is_extracted(
            bytes in proptest::array::uniform16(any::<u8>()),
            prefix in "[g-z./:_]{0,12}",
            suffix in "[g-z./:_]{0,12}",
            upper in any::<bool>(),
        ) {
            let id = Uuid::from_bytes(bytes);
            let text = if upper {
                id.hyphenated().to_string().to_uppercase()
            } else {
                id.hyphenated().to_string()
            };
            let identifier = format!("{prefix}{text}{suffix}");
            prop_assert_eq!(extract_uuid(&identifier).unwrap(), id);
        }

        #[test]
        fn prop_two_uuids_are_rejected(
            a in proptest::array::uniform16(any::<u8>()),
            b in proptest::array::uniform16(any::<u8>()),
            sep in "[g-z./:_]{1,4}",
        ) {
            let identifier = format!("{}{}{}", Uuid::from_bytes(a), sep, Uuid::from_bytes(b));
            prop_assert!(extract_uuid(&identifier).is_err());
        }

        #[test]
        fn prop_no_uuid_is_rejected(text in "[g-z./:_-]{0,60}") {
            prop_assert!(extract_uuid(&text).is_err());
        }
    }
}
