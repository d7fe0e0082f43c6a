//! Property-based tests using proptest.
//!
//! These tests verify invariants that should hold for all inputs,
//! helping catch edge cases that unit tests might miss: timestamp
//! normalization must agree with chronological order, watermarks must
//! behave like a running maximum, and schema observation must be
//! monotone and quiet on repeats.

use chrono::{DateTime, FixedOffset, Utc};
use proptest::prelude::*;
use serde_json::{Map, Value};
use standby_replicator::document::{
    max_timestamp, normalize_timestamp, source_is_newer, Document,
};
use standby_replicator::gateway::Direction;
use standby_replicator::schema::SchemaTracker;
use standby_replicator::stats::PersistedStats;

/// Seconds up to shortly before year 2100.
const MAX_SECS: i64 = 4_102_444_800;

fn instant(secs: i64, millis: u32) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, millis * 1_000_000).unwrap()
}

// =============================================================================
// Timestamp Normalization Properties
// =============================================================================

proptest! {
    /// Normalization is idempotent: normalizing a normalized timestamp
    /// changes nothing.
    #[test]
    fn normalization_idempotent(secs in 0i64..MAX_SECS, millis in 0u32..1000) {
        let raw = instant(secs, millis).to_rfc3339();
        let once = normalize_timestamp(&raw).unwrap();
        let twice = normalize_timestamp(&once).unwrap();
        prop_assert_eq!(once, twice);
    }

    /// Lexicographic order of normalized timestamps equals chronological
    /// order of the instants they denote.
    #[test]
    fn normalized_order_is_chronological(
        a_secs in 0i64..MAX_SECS,
        a_millis in 0u32..1000,
        b_secs in 0i64..MAX_SECS,
        b_millis in 0u32..1000,
    ) {
        let a = instant(a_secs, a_millis);
        let b = instant(b_secs, b_millis);
        let na = normalize_timestamp(&a.to_rfc3339()).unwrap();
        let nb = normalize_timestamp(&b.to_rfc3339()).unwrap();
        prop_assert_eq!(a.cmp(&b), na.cmp(&nb));
    }

    /// The same instant written with any UTC offset normalizes to the
    /// same string.
    #[test]
    fn offset_representations_normalize_equal(
        secs in 0i64..MAX_SECS,
        millis in 0u32..1000,
        offset_minutes in -14 * 60i32..=14 * 60,
    ) {
        let utc = instant(secs, millis);
        let offset = FixedOffset::east_opt(offset_minutes * 60).unwrap();
        let shifted = utc.with_timezone(&offset);

        let from_utc = normalize_timestamp(&utc.to_rfc3339()).unwrap();
        let from_offset = normalize_timestamp(&shifted.to_rfc3339()).unwrap();
        prop_assert_eq!(from_utc, from_offset);
    }

    /// For two present timestamps, "source newer" is strict: it never
    /// holds in both directions, and equal timestamps suppress writes.
    #[test]
    fn source_is_newer_strict(
        a_secs in 0i64..MAX_SECS,
        b_secs in 0i64..MAX_SECS,
    ) {
        let a = normalize_timestamp(&instant(a_secs, 0).to_rfc3339()).unwrap();
        let b = normalize_timestamp(&instant(b_secs, 0).to_rfc3339()).unwrap();

        let ab = source_is_newer(Some(&a), Some(&b));
        let ba = source_is_newer(Some(&b), Some(&a));

        if a == b {
            prop_assert!(!ab && !ba);
        } else {
            prop_assert!(ab ^ ba);
        }
    }

    /// A timestamp-less source always wins, regardless of the target.
    #[test]
    fn missing_source_always_written(secs in 0i64..MAX_SECS) {
        let target = normalize_timestamp(&instant(secs, 0).to_rfc3339()).unwrap();
        prop_assert!(source_is_newer(None, Some(&target)));
        prop_assert!(source_is_newer(None, None));
    }

    /// Folding timestamps is commutative and picks the maximum.
    #[test]
    fn max_timestamp_commutative(
        a_secs in 0i64..MAX_SECS,
        b_secs in 0i64..MAX_SECS,
    ) {
        let a = normalize_timestamp(&instant(a_secs, 0).to_rfc3339()).unwrap();
        let b = normalize_timestamp(&instant(b_secs, 0).to_rfc3339()).unwrap();

        let ab = max_timestamp(Some(a.clone()), Some(b.clone()));
        let ba = max_timestamp(Some(b.clone()), Some(a.clone()));
        prop_assert_eq!(&ab, &ba);

        let expected = if a >= b { a } else { b };
        prop_assert_eq!(ab.unwrap(), expected);
    }
}

// =============================================================================
// Watermark Properties
// =============================================================================

proptest! {
    /// However candidates arrive, the stored watermark ends up as their
    /// maximum and never moves backward along the way.
    #[test]
    fn watermark_is_a_running_maximum(
        candidates in prop::collection::vec((0i64..MAX_SECS, 0u32..1000), 1..20)
    ) {
        let normalized: Vec<String> = candidates
            .iter()
            .map(|(secs, millis)| {
                normalize_timestamp(&instant(*secs, *millis).to_rfc3339()).unwrap()
            })
            .collect();

        let mut stats = PersistedStats::default();
        let mut previous: Option<String> = None;
        for candidate in &normalized {
            stats.advance_watermark("c", Direction::Forward, candidate);
            let current = stats.watermark("c", Direction::Forward).unwrap().to_string();
            if let Some(previous) = &previous {
                prop_assert!(current.as_str() >= previous.as_str());
            }
            previous = Some(current);
        }

        let expected = normalized.iter().max().unwrap();
        prop_assert_eq!(stats.watermark("c", Direction::Forward).unwrap(), expected.as_str());
    }

    /// Directions are independent: advancing one never moves the other.
    #[test]
    fn watermark_directions_independent(
        forward_secs in 0i64..MAX_SECS,
        recover_secs in 0i64..MAX_SECS,
    ) {
        let forward = normalize_timestamp(&instant(forward_secs, 0).to_rfc3339()).unwrap();
        let recover = normalize_timestamp(&instant(recover_secs, 0).to_rfc3339()).unwrap();

        let mut stats = PersistedStats::default();
        stats.advance_watermark("c", Direction::Forward, &forward);
        stats.advance_watermark("c", Direction::Recover, &recover);

        prop_assert_eq!(stats.watermark("c", Direction::Forward).unwrap(), forward.as_str());
        prop_assert_eq!(stats.watermark("c", Direction::Recover).unwrap(), recover.as_str());
    }
}

// =============================================================================
// Schema Observation Properties
// =============================================================================

proptest! {
    /// Observing the same sample twice reports once and is then quiet,
    /// and the observed set contains every top-level key.
    #[test]
    fn schema_observation_monotone_and_quiet(
        keys in prop::collection::btree_set("[a-z]{1,8}", 1..10)
    ) {
        let mut payload = Map::new();
        for key in &keys {
            payload.insert(key.clone(), Value::from(1));
        }
        let docs = [Document::new("d1", Value::Object(payload))];

        let mut tracker = SchemaTracker::new();
        let change = tracker.observe("c", &docs).unwrap();
        prop_assert_eq!(change.total_keys, keys.len());

        // Second pass over identical docs reports nothing
        prop_assert!(tracker.observe("c", &docs).is_none());

        let schema = tracker.schema("c").unwrap();
        for key in &keys {
            prop_assert!(schema.contains(key));
        }
    }
}
