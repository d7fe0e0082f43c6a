//! Document model and timestamp ordering.
//!
//! Documents carry an arbitrary nested JSON payload. Two fields are
//! meaningful to the engine: `updatedAt` (preferred) and `createdAt`
//! (fallback). Both are ISO-8601 strings; ordering is lexicographic on
//! the normalized form (UTC, millisecond precision, `Z` suffix), so
//! `2024-01-01T00:00:01Z` and `2024-01-01T01:00:01+01:00` compare equal.
//!
//! A document with neither field is "infinitely old" for watermark
//! advancement and "always newer" for target-side comparison: it is
//! written on first encounter but never advances the watermark.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Preferred timestamp field on a document payload.
pub const UPDATED_AT_FIELD: &str = "updatedAt";

/// Fallback timestamp field when `updatedAt` is absent.
pub const CREATED_AT_FIELD: &str = "createdAt";

/// A document as seen by the engine: opaque ID plus nested payload.
///
/// IDs are never rewritten; a write to the standby uses the same ID
/// as the primary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Opaque document ID, stable across both sides.
    pub id: String,
    /// Arbitrary nested-field payload.
    pub data: Value,
}

impl Document {
    /// Create a document from an ID and payload.
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    /// The raw timestamp string, `updatedAt` preferred, `createdAt` fallback.
    pub fn raw_timestamp(&self) -> Option<&str> {
        self.data
            .get(UPDATED_AT_FIELD)
            .and_then(Value::as_str)
            .or_else(|| self.data.get(CREATED_AT_FIELD).and_then(Value::as_str))
    }

    /// The document's effective timestamp in normalized form.
    ///
    /// Returns `None` when neither timestamp field is present. An
    /// unparseable timestamp falls back to the raw string so ordering
    /// stays lexicographic rather than silently dropping the document.
    pub fn updated_at(&self) -> Option<String> {
        self.raw_timestamp().map(normalize_or_raw)
    }
}

/// Normalize an ISO-8601 timestamp to UTC with millisecond precision.
///
/// Returns `None` when the input is not a valid RFC 3339 timestamp.
pub fn normalize_timestamp(raw: &str) -> Option<String> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| {
            dt.with_timezone(&chrono::Utc)
                .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
        })
}

/// Normalized form if parseable, otherwise the raw string unchanged.
pub fn normalize_or_raw(raw: &str) -> String {
    normalize_timestamp(raw).unwrap_or_else(|| raw.to_string())
}

/// Decide whether a source document must be written to the target.
///
/// - Source without a timestamp: always newer, write.
/// - Target without a timestamp: infinitely old, write.
/// - Otherwise write only when the source is strictly newer; a target
///   at the same instant or ahead suppresses the write.
///
/// Both arguments are expected in normalized form.
pub fn source_is_newer(source: Option<&str>, target: Option<&str>) -> bool {
    match (source, target) {
        (None, _) => true,
        (_, None) => true,
        (Some(src), Some(tgt)) => src > tgt,
    }
}

/// Fold a candidate timestamp into a running maximum.
pub fn max_timestamp(current: Option<String>, candidate: Option<String>) -> Option<String> {
    match (current, candidate) {
        (Some(a), Some(b)) => Some(if b > a { b } else { a }),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}
