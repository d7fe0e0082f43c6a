//! Schema tracking for observability.
//!
//! For each collection the tracker maintains the set of dotted key paths
//! observed in sampled documents (e.g. `address.city`), descending into
//! nested maps but not into arrays. The set grows monotonically within a
//! process: additions emit a change, removals are ignored. Nothing is
//! enforced; this exists so operators notice a primary-side schema drift
//! before it surprises them.

use crate::document::Document;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// New key paths observed in one collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaChange {
    pub collection: String,
    pub new_keys: Vec<String>,
    pub total_keys: usize,
}

/// Per-collection observed key-path sets.
#[derive(Debug, Default)]
pub struct SchemaTracker {
    schemas: BTreeMap<String, BTreeSet<String>>,
}

impl SchemaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold sampled documents into a collection's schema set.
    ///
    /// Returns the change when new paths appeared, `None` otherwise.
    pub fn observe(&mut self, collection: &str, docs: &[Document]) -> Option<SchemaChange> {
        let mut observed = BTreeSet::new();
        for doc in docs {
            collect_paths(&doc.data, "", &mut observed);
        }

        let known = self.schemas.entry(collection.to_string()).or_default();
        let new_keys: Vec<String> = observed.difference(known).cloned().collect();
        if new_keys.is_empty() {
            return None;
        }

        known.extend(new_keys.iter().cloned());
        debug!(
            collection,
            new = new_keys.len(),
            total = known.len(),
            "Schema grew"
        );

        Some(SchemaChange {
            collection: collection.to_string(),
            new_keys,
            total_keys: known.len(),
        })
    }

    /// The observed schema for a collection, if any.
    pub fn schema(&self, collection: &str) -> Option<&BTreeSet<String>> {
        self.schemas.get(collection)
    }

    /// All observed schemas, keyed by collection.
    pub fn all(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.schemas
    }

    /// Forget everything (explicit reset).
    pub fn reset(&mut self) {
        self.schemas.clear();
    }
}

/// Collect dotted key paths from a JSON value.
///
/// Descends into nested objects; array contents are opaque, so a field
/// holding an array contributes only its own path.
fn collect_paths(value: &Value, prefix: &str, out: &mut BTreeSet<String>) {
    if let Value::Object(map) = value {
        for (key, child) in map {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            if let Value::Object(_) = child {
                collect_paths(child, &path, out);
            }
            out.insert(path);
        }
    }
}
