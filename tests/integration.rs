// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Integration tests for the replication engine.
//!
//! Everything runs against the in-memory backends, so no external
//! services are required.
//!
//! # Test Organization
//! - `bring_up_*` / `incremental_*` - forward replication end to end
//! - `outage_*` - health gating and pause/error behavior
//! - `recovery_*` - standby → primary recovery
//! - `reconcile_*` - integrity reports
//! - `auth_*` - directory replication
//! - `persistence_*` - stats file across engine restarts

use serde_json::json;
use standby_replicator::memory::{MemoryDirectory, MemoryStore};
use standby_replicator::user::{UserMetadata, UserRecord};
use standby_replicator::{
    Coordinator, Event, EventBus, Gateways, ReplicationConfig, RunStatus,
};
use std::sync::Arc;
use tempfile::TempDir;

/// The four backend handles, kept around for direct inspection.
struct Backends {
    primary_db: Arc<MemoryStore>,
    standby_db: Arc<MemoryStore>,
    primary_auth: Arc<MemoryDirectory>,
    standby_auth: Arc<MemoryDirectory>,
}

impl Backends {
    fn new() -> Self {
        Self {
            primary_db: Arc::new(MemoryStore::new("primary-db")),
            standby_db: Arc::new(MemoryStore::new("standby-db")),
            primary_auth: Arc::new(MemoryDirectory::new("primary-auth")),
            standby_auth: Arc::new(MemoryDirectory::new("standby-auth")),
        }
    }
}

struct Engine {
    coordinator: Coordinator,
    backends: Backends,
    _dir: TempDir,
}

async fn engine() -> Engine {
    let backends = Backends::new();
    let dir = TempDir::new().unwrap();
    let coordinator = coordinator_for(&backends, &dir).await;
    Engine {
        coordinator,
        backends,
        _dir: dir,
    }
}

async fn coordinator_for(backends: &Backends, dir: &TempDir) -> Coordinator {
    let config = ReplicationConfig::for_testing(
        dir.path().join("stats.json").to_string_lossy().into_owned(),
    );
    let gateways = Arc::new(Gateways::new(
        Arc::clone(&backends.primary_db) as _,
        Arc::clone(&backends.standby_db) as _,
        Arc::clone(&backends.primary_auth) as _,
        Arc::clone(&backends.standby_auth) as _,
        &config.gateway,
    ));
    Coordinator::new(config, gateways, EventBus::default())
        .await
        .unwrap()
}

/// Seed the "fresh bring-up" state: appointments a1..a3, users u1..u2.
async fn seed_fresh_primary(backends: &Backends) {
    for (id, second) in [("a1", 1), ("a2", 2), ("a3", 3)] {
        backends
            .primary_db
            .insert(
                "appointments",
                id,
                json!({ "updatedAt": format!("2024-01-01T00:00:{:02}Z", second), "slot": id }),
            )
            .await;
    }
    for (id, second) in [("u1", 1), ("u2", 2)] {
        backends
            .primary_db
            .insert(
                "users",
                id,
                json!({ "updatedAt": format!("2024-01-01T00:00:{:02}Z", second), "name": id }),
            )
            .await;
    }
}

fn directory_user(uid: &str, created: &str) -> UserRecord {
    let mut user = UserRecord::with_uid(uid);
    user.email = Some(format!("{uid}@example.com"));
    user.metadata = UserMetadata {
        creation_time: Some(created.to_string()),
        last_sign_in_time: None,
    };
    user.password_hash = Some(format!("hash-{uid}"));
    user
}

// =============================================================================
// Forward Replication
// =============================================================================

#[tokio::test]
async fn bring_up_copies_all_collections() {
    let e = engine().await;
    seed_fresh_primary(&e.backends).await;

    let report = e.coordinator.run_once().await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(e.backends.standby_db.collection_len("appointments").await, 3);
    assert_eq!(e.backends.standby_db.collection_len("users").await, 2);

    let stats = e.coordinator.stats().await;
    assert_eq!(stats.counters.total_documents_written, 5);
    assert_eq!(stats.counters.duplicates_skipped, 0);
    assert_eq!(stats.counters.errors, 0);
    assert_eq!(stats.counters.incremental_run_count, 1);
    assert_eq!(
        stats.watermarks["appointments"].forward.as_deref().unwrap(),
        "2024-01-01T00:00:03.000Z"
    );
}

#[tokio::test]
async fn bring_up_preserves_ids_and_payloads() {
    let e = engine().await;
    seed_fresh_primary(&e.backends).await;

    e.coordinator.run_once().await;

    let copied = e.backends.standby_db.get("appointments", "a2").await.unwrap();
    assert_eq!(copied["slot"], "a2");
    assert_eq!(copied["updatedAt"], "2024-01-01T00:00:02Z");
    assert_eq!(
        e.backends.standby_db.collection_ids("appointments").await,
        vec!["a1".to_string(), "a2".to_string(), "a3".to_string()]
    );
}

#[tokio::test]
async fn incremental_second_run_is_a_no_op() {
    let e = engine().await;
    seed_fresh_primary(&e.backends).await;

    e.coordinator.run_once().await;
    let before = e.coordinator.stats().await;

    let report = e.coordinator.run_once().await;
    assert_eq!(report.status, RunStatus::Completed);

    let after = e.coordinator.stats().await;
    assert_eq!(
        after.counters.total_documents_written,
        before.counters.total_documents_written
    );
    // The since filter excludes everything server-side
    assert_eq!(after.counters.duplicates_skipped, 0);
    assert_eq!(after.watermarks["appointments"], before.watermarks["appointments"]);
}

#[tokio::test]
async fn incremental_propagates_a_single_update() {
    let e = engine().await;
    seed_fresh_primary(&e.backends).await;
    e.coordinator.run_once().await;

    e.backends
        .primary_db
        .insert(
            "appointments",
            "a2",
            json!({ "updatedAt": "2024-01-02T00:00:00Z", "slot": "a2-moved" }),
        )
        .await;

    let before = e.coordinator.stats().await.counters.total_documents_written;
    e.coordinator.run_once().await;
    let after = e.coordinator.stats().await;

    assert_eq!(after.counters.total_documents_written, before + 1);
    assert_eq!(
        after.watermarks["appointments"].forward.as_deref().unwrap(),
        "2024-01-02T00:00:00.000Z"
    );
    assert_eq!(
        e.backends.standby_db.get("appointments", "a2").await.unwrap()["slot"],
        "a2-moved"
    );
}

#[tokio::test]
async fn force_full_rescans_and_skips_duplicates() {
    let e = engine().await;
    seed_fresh_primary(&e.backends).await;
    e.coordinator.run_once().await;
    let before = e.coordinator.stats().await.counters.clone();

    let report = e.coordinator.force_full().await;
    assert_eq!(report.status, RunStatus::Completed);

    let after = e.coordinator.stats().await.counters;
    // Every document rescanned; all suppressed against the target
    assert_eq!(after.total_documents_written, before.total_documents_written);
    assert_eq!(after.duplicates_skipped, before.duplicates_skipped + 5);
    assert!(after.last_full_run_at.is_some());
}

#[tokio::test]
async fn clockless_document_written_once() {
    let e = engine().await;
    e.backends
        .primary_db
        .insert("c", "anchored", json!({ "updatedAt": "2024-01-01T00:00:01Z" }))
        .await;
    e.backends
        .primary_db
        .insert("c", "legacy", json!({ "note": "no timestamps" }))
        .await;

    e.coordinator.run_once().await;
    assert!(e.backends.standby_db.get("c", "legacy").await.is_some());
    let written = e.coordinator.stats().await.counters.total_documents_written;
    assert_eq!(written, 2);

    // Next incremental run: the watermark filter excludes the clockless
    // document server-side, so it is not rewritten
    e.coordinator.run_once().await;
    assert_eq!(
        e.coordinator.stats().await.counters.total_documents_written,
        written
    );
}

#[tokio::test]
async fn schema_changes_are_observed_and_published() {
    let e = engine().await;
    e.backends
        .primary_db
        .insert(
            "users",
            "u1",
            json!({ "updatedAt": "2024-01-01T00:00:01Z", "address": { "city": "York" } }),
        )
        .await;
    let mut rx = e.coordinator.bus().subscribe();

    e.coordinator.run_once().await;

    let mut saw_schema_change = false;
    while let Ok(event) = rx.try_recv() {
        if let Event::SchemaChange {
            collection,
            new_keys,
            ..
        } = event
        {
            assert_eq!(collection, "users");
            assert!(new_keys.contains(&"address.city".to_string()));
            saw_schema_change = true;
        }
    }
    assert!(saw_schema_change);

    let stats = e.coordinator.stats().await;
    assert!(stats.schemas["users"].contains(&"address.city".to_string()));
}

#[tokio::test]
async fn discovered_collections_and_schemas_are_queryable() {
    let e = engine().await;
    seed_fresh_primary(&e.backends).await;

    e.coordinator.run_once().await;

    assert_eq!(
        e.coordinator.collections().await,
        vec!["appointments".to_string(), "users".to_string()]
    );
    let schema = e.coordinator.schema("appointments").await.unwrap();
    assert!(schema.contains(&"updatedAt".to_string()));
    assert!(schema.contains(&"slot".to_string()));
    assert!(e.coordinator.schema("ghost").await.is_none());
}

#[tokio::test]
async fn events_arrive_in_causal_order() {
    let e = engine().await;
    seed_fresh_primary(&e.backends).await;
    let mut rx = e.coordinator.bus().subscribe();

    e.coordinator.run_once().await;

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(match event {
            Event::AutoRunTriggered { .. } => "autoRun",
            Event::Health(_) => "health",
            Event::SchemaChange { .. } => "schema",
            Event::CollectionProgress { .. } => "progress",
            Event::CollectionCompleted { .. } => "completed",
            Event::AuthCompleted { .. } => "authCompleted",
            Event::Stats(_) => "stats",
            _ => "other",
        });
    }

    let position = |kind: &str| kinds.iter().position(|k| *k == kind).unwrap();
    assert!(position("autoRun") < position("health"));
    assert!(position("progress") < position("completed"));
    assert!(position("completed") < position("stats"));
    // Stats is the run-level completion, published last
    assert_eq!(*kinds.last().unwrap(), "stats");
}

// =============================================================================
// Outage Behavior
// =============================================================================

#[tokio::test]
async fn outage_of_primary_pauses_without_counting() {
    let e = engine().await;
    seed_fresh_primary(&e.backends).await;
    e.coordinator.run_once().await;
    let before = e.coordinator.stats().await.counters.clone();

    e.backends.primary_db.set_unavailable(true);
    // A few probe cycles observe the outage
    for _ in 0..3 {
        e.coordinator.monitor().refresh().await;
    }
    let mut rx = e.coordinator.bus().subscribe();

    let report = e.coordinator.run_once().await;
    assert_eq!(report.status, RunStatus::Paused);
    assert_eq!(
        report.message.as_deref(),
        Some("primary database unreachable")
    );

    let after = e.coordinator.stats().await.counters;
    assert_eq!(after, before);

    // The health event from the gating round reports the outage
    let mut saw_unhealthy_primary = false;
    while let Ok(event) = rx.try_recv() {
        if let Event::Health(snapshot) = event {
            if !snapshot.primary_db {
                saw_unhealthy_primary = true;
            }
        }
    }
    assert!(saw_unhealthy_primary);
}

#[tokio::test]
async fn outage_of_standby_ends_in_error() {
    let e = engine().await;
    seed_fresh_primary(&e.backends).await;
    e.backends.standby_db.set_unavailable(true);

    let before = e.coordinator.stats().await.counters.errors;
    let report = e.coordinator.run_once().await;

    assert_eq!(report.status, RunStatus::Error);
    assert!(e.coordinator.stats().await.counters.errors > before);
}

#[tokio::test]
async fn primary_recovers_and_next_run_succeeds() {
    let e = engine().await;
    seed_fresh_primary(&e.backends).await;

    e.backends.primary_db.set_unavailable(true);
    assert_eq!(e.coordinator.run_once().await.status, RunStatus::Paused);

    e.backends.primary_db.set_unavailable(false);
    assert_eq!(e.coordinator.run_once().await.status, RunStatus::Completed);
    assert_eq!(e.backends.standby_db.collection_len("appointments").await, 3);
}

// =============================================================================
// Recovery
// =============================================================================

#[tokio::test]
async fn recovery_round_trips_a_standby_only_document() {
    let e = engine().await;
    seed_fresh_primary(&e.backends).await;
    e.coordinator.run_once().await;
    let forward_watermark = e.coordinator.stats().await.watermarks["appointments"]
        .forward
        .clone();

    // The standby accepted a write the primary never saw
    e.backends
        .standby_db
        .insert(
            "appointments",
            "a4",
            json!({ "updatedAt": "2024-01-03T00:00:00Z", "slot": "a4" }),
        )
        .await;

    let before = e.coordinator.stats().await.counters.total_documents_written;
    let report = e.coordinator.recover().await;
    assert_eq!(report.status, RunStatus::Completed);

    // Same ID, same payload, now on primary
    let recovered = e.backends.primary_db.get("appointments", "a4").await.unwrap();
    assert_eq!(recovered["slot"], "a4");

    let stats = e.coordinator.stats().await;
    // The recover direction wrote exactly one document more than the
    // duplicates it suppressed
    assert_eq!(stats.counters.total_documents_written, before + 1);
    // Forward watermark untouched; recover watermark advanced
    assert_eq!(stats.watermarks["appointments"].forward, forward_watermark);
    assert_eq!(
        stats.watermarks["appointments"].recover.as_deref().unwrap(),
        "2024-01-03T00:00:00.000Z"
    );
}

#[tokio::test]
async fn recovery_never_overwrites_newer_primary() {
    let e = engine().await;
    e.backends
        .primary_db
        .insert("c", "doc", json!({ "updatedAt": "2024-02-01T00:00:00Z", "v": "primary" }))
        .await;
    e.backends
        .standby_db
        .insert("c", "doc", json!({ "updatedAt": "2024-01-01T00:00:00Z", "v": "stale" }))
        .await;

    let report = e.coordinator.recover().await;
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(e.backends.primary_db.get("c", "doc").await.unwrap()["v"], "primary");
}

#[tokio::test]
async fn recovery_requires_both_databases() {
    let e = engine().await;
    e.backends.primary_db.set_unavailable(true);

    let report = e.coordinator.recover().await;
    assert_eq!(report.status, RunStatus::Paused);
}

#[tokio::test]
async fn recovery_emits_an_integrity_report() {
    let e = engine().await;
    seed_fresh_primary(&e.backends).await;
    e.coordinator.run_once().await;

    let report = e.coordinator.recover().await;
    assert!(!report.integrity.is_empty());
    assert!(report.integrity.iter().all(|r| r.is_clean()));
}

// =============================================================================
// Reconcile
// =============================================================================

#[tokio::test]
async fn reconcile_reports_divergence_without_healing() {
    let e = engine().await;
    seed_fresh_primary(&e.backends).await;
    e.coordinator.run_once().await;

    e.backends
        .primary_db
        .insert("appointments", "a8", json!({ "updatedAt": "2024-01-05T00:00:00Z" }))
        .await;
    e.backends
        .standby_db
        .insert("appointments", "a9", json!({ "updatedAt": "2024-01-05T00:00:00Z" }))
        .await;

    let report = e.coordinator.reconcile().await;
    assert_eq!(report.status, RunStatus::Completed);

    let appointments = report
        .integrity
        .iter()
        .find(|r| r.collection == "appointments")
        .unwrap();
    assert_eq!(appointments.primary_count, 4);
    assert_eq!(appointments.standby_count, 4);
    assert_eq!(appointments.missing_in_standby, vec!["a8".to_string()]);
    assert_eq!(appointments.missing_in_primary, vec!["a9".to_string()]);

    // Never auto-heals
    assert!(e.backends.standby_db.get("appointments", "a8").await.is_none());
    assert!(e.backends.primary_db.get("appointments", "a9").await.is_none());
}

#[tokio::test]
async fn reconcile_covers_the_directories() {
    let e = engine().await;
    e.backends
        .primary_auth
        .insert_user(directory_user("p-only", "2024-01-01T00:00:00Z"))
        .await;

    let report = e.coordinator.reconcile().await;
    let auth = report.auth_integrity.unwrap();
    assert_eq!(auth.primary_count, 1);
    assert_eq!(auth.standby_count, 0);
    assert_eq!(auth.missing_in_standby, vec!["p-only".to_string()]);
}

// =============================================================================
// Auth Replication
// =============================================================================

#[tokio::test]
async fn auth_first_run_copies_the_directory() {
    let e = engine().await;
    e.backends
        .primary_auth
        .insert_user(directory_user("u1", "2024-01-01T00:00:00Z"))
        .await;
    let mut admin = directory_user("admin", "2024-01-01T00:00:00Z");
    admin.custom_claims.insert("role".to_string(), json!("admin"));
    e.backends.primary_auth.insert_user(admin).await;

    let report = e.coordinator.run_once().await;
    assert_eq!(report.status, RunStatus::Completed);

    let auth = report.auth.unwrap();
    assert_eq!(auth.total_users, 2);
    assert_eq!(auth.synced_users, 2);
    assert_eq!(auth.claims_propagated, 1);

    assert_eq!(e.backends.standby_auth.len().await, 2);
    // Hashes pass through opaquely
    assert_eq!(
        e.backends.standby_auth.user("u1").await.unwrap().password_hash.unwrap(),
        "hash-u1"
    );
    assert_eq!(
        e.backends.standby_auth.user("admin").await.unwrap().custom_claims["role"],
        "admin"
    );

    let stats = e.coordinator.stats().await;
    assert_eq!(stats.counters.auth.total_users, 2);
    assert_eq!(stats.counters.auth.synced_users, 2);
    assert!(stats.auth_watermark.is_some());
}

#[tokio::test]
async fn auth_incremental_only_imports_changed_users() {
    let e = engine().await;
    e.backends
        .primary_auth
        .insert_user(directory_user("old", "2020-01-01T00:00:00Z"))
        .await;
    e.coordinator.run_once().await;
    let synced_after_full = e.coordinator.stats().await.counters.auth.synced_users;

    // A user created after the first pass
    e.backends
        .primary_auth
        .insert_user(directory_user("newcomer", "2030-01-01T00:00:00Z"))
        .await;

    e.coordinator.run_once().await;
    let stats = e.coordinator.stats().await;
    // Only the newcomer was imported on the incremental pass
    assert_eq!(stats.counters.auth.synced_users, synced_after_full + 1);
    assert!(e.backends.standby_auth.user("newcomer").await.is_some());
}

#[tokio::test]
async fn auth_outage_pauses_auth_but_replicates_documents() {
    let e = engine().await;
    seed_fresh_primary(&e.backends).await;
    e.backends
        .primary_auth
        .insert_user(directory_user("u1", "2024-01-01T00:00:00Z"))
        .await;
    e.backends.primary_auth.set_unavailable(true);

    let report = e.coordinator.run_once().await;

    // DB replication still happened
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(e.backends.standby_db.collection_len("appointments").await, 3);
    // Auth phase was skipped entirely
    assert!(report.auth.is_none());
    assert_eq!(e.backends.standby_auth.len().await, 0);
}

#[tokio::test]
async fn auth_standby_outage_ends_run_in_error() {
    let e = engine().await;
    seed_fresh_primary(&e.backends).await;
    e.backends.standby_auth.set_unavailable(true);

    let before = e.coordinator.stats().await.counters.auth.auth_errors;
    let report = e.coordinator.run_once().await;

    assert_eq!(report.status, RunStatus::Error);
    assert!(e.coordinator.stats().await.counters.auth.auth_errors > before);
    // Document replication was unaffected
    assert_eq!(e.backends.standby_db.collection_len("appointments").await, 3);
}

#[tokio::test]
async fn force_auth_runs_a_full_directory_pass() {
    let e = engine().await;
    e.backends
        .primary_auth
        .insert_user(directory_user("u1", "2020-01-01T00:00:00Z"))
        .await;

    let report = e.coordinator.force_auth().await;
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.auth.unwrap().synced_users, 1);
    assert!(report.collections.is_empty());
    assert_eq!(e.backends.standby_auth.len().await, 1);
}

// =============================================================================
// Persistence
// =============================================================================

#[tokio::test]
async fn persistence_restart_resumes_from_watermarks() {
    let backends = Backends::new();
    let dir = TempDir::new().unwrap();
    seed_fresh_primary(&backends).await;

    {
        let coordinator = coordinator_for(&backends, &dir).await;
        coordinator.run_once().await;
        assert_eq!(
            coordinator.stats().await.counters.total_documents_written,
            5
        );
    }

    // A fresh engine over the same stats file
    let coordinator = coordinator_for(&backends, &dir).await;
    let restored = coordinator.stats().await;
    assert_eq!(restored.counters.total_documents_written, 5);
    assert_eq!(
        restored.watermarks["appointments"].forward.as_deref().unwrap(),
        "2024-01-01T00:00:03.000Z"
    );

    // Nothing changed on primary: the restarted engine writes nothing
    coordinator.run_once().await;
    assert_eq!(
        coordinator.stats().await.counters.total_documents_written,
        5
    );
}

#[tokio::test]
async fn persistence_stats_file_layout() {
    let e = engine().await;
    seed_fresh_primary(&e.backends).await;
    e.coordinator.run_once().await;

    let raw = std::fs::read_to_string(e._dir.path().join("stats.json")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();

    assert_eq!(value["totalDocumentsWritten"], 5);
    assert_eq!(value["incrementalRunCount"], 1);
    assert!(value["watermarks"]["appointments"]["forward"].is_string());
    assert!(value["auth"]["syncedUsers"].is_number());
    assert!(value["lastRunAt"].is_string());
}

#[tokio::test]
async fn persistence_happens_even_for_paused_runs() {
    let e = engine().await;
    e.backends.primary_db.set_unavailable(true);

    e.coordinator.run_once().await;

    // The stats file exists despite the run never replicating
    assert!(e._dir.path().join("stats.json").exists());
}
