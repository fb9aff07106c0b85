//! Upstream catalog records and the source that fetches them.
//!
//! A fetch yields raw JSON documents. [`CatalogRecord::from_value`] turns each
//! document into a typed record or a [`SkippedRecord`]; a skipped record is a
//! per-record warning, never a run-level fault.

mod client;
mod retry;

pub use client::{OamCatalogClient, RecordSource, DEFAULT_API_BASE, DEFAULT_PAGE_LIMIT};
pub use retry::{AttemptError, RetryPolicy, DEFAULT_MAX_DELAY};

use std::fmt;

use serde_json::Value;

/// Field holding the unique identifier of an upstream document.
pub const ID_FIELD: &str = "_id";
/// Field holding the last-modified timestamp used as fingerprint.
pub const FINGERPRINT_FIELD: &str = "uploaded_at";
/// Field holding the footprint geometry.
pub const FOOTPRINT_FIELD: &str = "geojson";

/// Immutable snapshot of one upstream catalog entity.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRecord {
    id: String,
    fingerprint: String,
    document: Value,
}

impl CatalogRecord {
    /// Parses an upstream document.
    ///
    /// The identifier and timestamp must be non-empty strings. The timestamp
    /// is kept verbatim; it is only ever compared for equality.
    pub fn from_value(document: Value) -> Result<Self, SkippedRecord> {
        let Some(object) = document.as_object() else {
            return Err(SkippedRecord::new(None, SkipReason::NotAnObject));
        };

        let id = match object.get(ID_FIELD).and_then(Value::as_str) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => return Err(SkippedRecord::new(None, SkipReason::MissingIdentifier)),
        };

        let fingerprint = match object.get(FINGERPRINT_FIELD).and_then(Value::as_str) {
            Some(ts) if !ts.is_empty() => ts.to_string(),
            _ => return Err(SkippedRecord::new(Some(id), SkipReason::MissingTimestamp)),
        };

        Ok(Self {
            id,
            fingerprint,
            document,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The last-modified timestamp, as received.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// The full upstream document, published verbatim as the per-record artifact.
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// The footprint geometry, if present and not null.
    pub fn footprint(&self) -> Option<&Value> {
        self.document.get(FOOTPRINT_FIELD).filter(|v| !v.is_null())
    }
}

/// Why a fetched document was not turned into a [`CatalogRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotAnObject,
    MissingIdentifier,
    MissingTimestamp,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NotAnObject => "document is not a JSON object",
            Self::MissingIdentifier => "missing identifier",
            Self::MissingTimestamp => "missing last-modified timestamp",
        };
        f.write_str(text)
    }
}

/// A fetched document rejected as malformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
    /// Identifier, when the document had one.
    pub identifier: Option<String>,
    pub reason: SkipReason,
}

impl SkippedRecord {
    pub fn new(identifier: Option<String>, reason: SkipReason) -> Self {
        Self { identifier, reason }
    }
}

impl fmt::Display for SkippedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.identifier {
            Some(id) => write!(f, "record '{id}' skipped: {}", self.reason),
            None => write!(f, "record skipped: {}", self.reason),
        }
    }
}
