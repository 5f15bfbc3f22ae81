//! Wire types and response normalization for versioned secrets.
//!
//! The server speaks two shapes for the same logical record: read responses
//! nest the payload under `data` and the version metadata under `metadata`,
//! while write responses return the version metadata directly at the top
//! level and never echo the payload back. The decoders here detect the
//! shape first and then run one of two fixed decode paths, so call sites
//! never probe the response speculatively.
//!
//! One wire quirk is handled as a dedicated sanitize pass rather than
//! inside the generic decoding: an unset deletion time arrives as an empty
//! string, which no timestamp parser accepts.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DecodeError;

/// A single version of a secret, as returned by read and write operations.
#[derive(Debug, Clone)]
pub struct KvSecret {
    /// Key-value payload. `None` when the addressed version has been
    /// soft-deleted or destroyed — distinct from an empty map.
    pub data: Option<HashMap<String, Value>>,
    /// Metadata for the addressed version. Present whenever the path
    /// resolved to a known version.
    pub version_metadata: Option<VersionMetadata>,
    /// Caller-managed custom metadata. `None` when unset on the server.
    pub custom_metadata: Option<HashMap<String, Value>>,
    /// The undecoded response payload, for callers that need fields this
    /// crate does not model.
    pub raw: Value,
}

/// Metadata for one version of a secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMetadata {
    /// Version number, starting at 1.
    pub version: u64,
    /// When this version was written.
    pub created_time: DateTime<Utc>,
    /// When this version was soft-deleted. `None` means not deleted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_time: Option<DateTime<Utc>>,
    /// Whether the version's payload has been irreversibly destroyed.
    #[serde(default)]
    pub destroyed: bool,
}

/// Full metadata for a secret: retention policy plus every version.
#[derive(Debug, Clone, Deserialize)]
pub struct KvMetadata {
    /// Whether writes to this secret must carry a check-and-set version.
    #[serde(default)]
    pub cas_required: bool,
    /// When the secret was first created.
    pub created_time: DateTime<Utc>,
    /// The current (latest) version number.
    pub current_version: u64,
    /// Caller-managed custom metadata. Empty when unset on the server.
    #[serde(default)]
    pub custom_metadata: HashMap<String, Value>,
    /// Retention window after which old versions are deleted; zero means
    /// versions are kept until `max_versions` pushes them out.
    #[serde(default, with = "humantime_serde")]
    pub delete_version_after: Duration,
    /// Maximum number of versions kept (0 = server default).
    #[serde(default)]
    pub max_versions: u64,
    /// The oldest version still present.
    #[serde(default)]
    pub oldest_version: u64,
    /// When the secret was last written.
    pub updated_time: DateTime<Utc>,
    /// All versions keyed by version number. Iteration order is ascending.
    #[serde(skip)]
    pub versions: BTreeMap<u64, VersionMetadata>,
}

/// Observed runtime type of a JSON value, for decode diagnostics.
pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn as_object<'a>(value: &'a Value, field: &str) -> Result<&'a Map<String, Value>, DecodeError> {
    value.as_object().ok_or_else(|| DecodeError::UnexpectedType {
        field: field.to_owned(),
        found: json_type(value),
    })
}

fn to_hash_map(map: &Map<String, Value>) -> HashMap<String, Value> {
    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

/// Strip the empty-string `deletion_time` sentinel so the generic decoder
/// only ever sees a parseable timestamp or nothing. Returns a fresh record,
/// leaving the response untouched.
fn sanitize_version_record(record: &Map<String, Value>) -> Map<String, Value> {
    let mut out = record.clone();
    if matches!(out.get("deletion_time"), Some(Value::String(s)) if s.is_empty()) {
        out.remove("deletion_time");
    }
    out
}

/// Decode the version metadata from either wire shape.
///
/// A `metadata` key marks the read shape (record nested beneath it); its
/// absence marks the write shape (the top-level mapping is the record).
pub(crate) fn decode_version_metadata(raw: &Value) -> Result<VersionMetadata, DecodeError> {
    let top = as_object(raw, "response")?;

    let record = match top.get("metadata") {
        Some(meta) => as_object(meta, "metadata")?,
        None => top,
    };

    let record = sanitize_version_record(record);
    serde_json::from_value(Value::Object(record)).map_err(|source| DecodeError::Record {
        what: "version metadata",
        source,
    })
}

/// Extract custom metadata from either wire shape: top level on writes,
/// nested under `metadata` on reads. A response carrying neither is
/// malformed — an empty or null map is valid, a missing field is not.
pub(crate) fn decode_custom_metadata(
    raw: &Value,
) -> Result<Option<HashMap<String, Value>>, DecodeError> {
    let top = as_object(raw, "response")?;

    let custom = match top.get("custom_metadata") {
        Some(value) => value,
        None => {
            let meta = top.get("metadata").ok_or_else(|| DecodeError::MissingField {
                field: "custom_metadata".to_owned(),
            })?;
            let meta = as_object(meta, "metadata")?;
            meta.get("custom_metadata")
                .ok_or_else(|| DecodeError::MissingField {
                    field: "metadata.custom_metadata".to_owned(),
                })?
        }
    };

    match custom {
        Value::Null => Ok(None),
        Value::Object(map) => Ok(Some(to_hash_map(map))),
        other => Err(DecodeError::UnexpectedType {
            field: "custom_metadata".to_owned(),
            found: json_type(other),
        }),
    }
}

/// Decode a read-shape response into a [`KvSecret`].
///
/// A null payload is a soft-deleted version, not an error: the version
/// metadata still decodes and carries the deletion time.
pub(crate) fn decode_read_response(raw: &Value) -> Result<KvSecret, DecodeError> {
    let top = as_object(raw, "response")?;

    let data = match top.get("data") {
        None => {
            return Err(DecodeError::MissingField {
                field: "data".to_owned(),
            })
        }
        Some(Value::Null) => None,
        Some(Value::Object(map)) => Some(to_hash_map(map)),
        Some(other) => {
            return Err(DecodeError::UnexpectedType {
                field: "data".to_owned(),
                found: json_type(other),
            })
        }
    };

    let version_metadata = decode_version_metadata(raw)?;
    let custom_metadata = decode_custom_metadata(raw)?;

    Ok(KvSecret {
        data,
        version_metadata: Some(version_metadata),
        custom_metadata,
        raw: raw.clone(),
    })
}

/// Decode a write-shape response into a [`KvSecret`].
///
/// Write responses carry no payload — the response data *is* the version
/// metadata — so `data` is always `None` here.
pub(crate) fn decode_write_response(raw: &Value) -> Result<KvSecret, DecodeError> {
    let version_metadata = decode_version_metadata(raw)?;
    let custom_metadata = decode_custom_metadata(raw)?;

    Ok(KvSecret {
        data: None,
        version_metadata: Some(version_metadata),
        custom_metadata,
        raw: raw.clone(),
    })
}

/// Decode a full-metadata response into a [`KvMetadata`].
pub(crate) fn decode_full_metadata(raw: &Value) -> Result<KvMetadata, DecodeError> {
    let top = as_object(raw, "metadata")?;

    let versions = match top.get("versions") {
        None => BTreeMap::new(),
        Some(value) => aggregate_versions(as_object(value, "versions")?)?,
    };

    // A null custom_metadata means "unset"; strip it so the generic decoder
    // can apply its default instead of rejecting the null.
    let mut scalars = top.clone();
    scalars.remove("versions");
    if matches!(scalars.get("custom_metadata"), Some(Value::Null)) {
        scalars.remove("custom_metadata");
    }

    let mut metadata: KvMetadata =
        serde_json::from_value(Value::Object(scalars)).map_err(|source| DecodeError::Record {
            what: "secret metadata",
            source,
        })?;
    metadata.versions = versions;
    Ok(metadata)
}

/// The wire omits each entry's version number, relying on the map key.
/// Parse every key, inject the number into a copy of its entry, and decode
/// into a fresh ordered map — the response is never mutated in place, and
/// ascending iteration falls out of the key type.
fn aggregate_versions(
    raw: &Map<String, Value>,
) -> Result<BTreeMap<u64, VersionMetadata>, DecodeError> {
    let mut versions = BTreeMap::new();

    for (key, entry) in raw {
        let number: u64 = key.parse().map_err(|_| DecodeError::InvalidVersionKey {
            key: key.clone(),
        })?;

        let record = as_object(entry, &format!("versions.{key}"))?;
        let mut record = sanitize_version_record(record);
        record.insert("version".to_owned(), Value::from(number));

        let decoded: VersionMetadata = serde_json::from_value(Value::Object(record))
            .map_err(|source| DecodeError::Record {
                what: "version metadata",
                source,
            })?;
        versions.insert(number, decoded);
    }

    Ok(versions)
}
