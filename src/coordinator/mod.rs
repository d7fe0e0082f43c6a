// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication coordinator.
//!
//! The top-level state machine that ties together:
//! - Health gating via [`crate::health::HealthMonitor`]
//! - Collection discovery and schema refresh
//! - Per-collection forward replication via [`crate::replicate::DocumentReplicator`]
//! - Directory replication via [`crate::auth_sync::AuthReplicator`]
//! - Integrity passes via [`crate::reconcile::Reconciler`]
//! - Counter/watermark persistence via [`crate::stats::StatsStore`]
//!
//! # Serialization
//!
//! Exactly one run (forward, auth-only, recovery, or reconcile) executes
//! at a time. The run lock is try-acquired: a caller that loses gets a
//! `Busy` report immediately instead of queueing, so an external timer
//! firing during a long run is a no-op rather than a backlog.
//!
//! # Persistence
//!
//! Counters and watermarks are persisted after every run, including
//! failed and paused ones, and restored on construction. Watermarks and
//! counters are mutated only while the run lock is held; `stats()` takes
//! concurrent read snapshots.

mod types;

pub use types::{EngineState, RunReport, RunStatus, StatsSnapshot};

use crate::auth_sync::{AuthMode, AuthReplicator, AuthStatus};
use crate::config::ReplicationConfig;
use crate::error::Result;
use crate::events::{Event, EventBus};
use crate::gateway::{Direction, Gateways, Side};
use crate::health::{gate, Gate, HealthMonitor, HealthSnapshot};
use crate::metrics;
use crate::reconcile::{AuthIntegrityReport, IntegrityReport, Reconciler};
use crate::replicate::{CollectionStatus, DocumentReplicator, ReplicationMode};
use crate::schema::SchemaTracker;
use crate::stats::{PersistedStats, StatsStore};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{info, info_span, warn, Instrument};

/// Mutable engine state, exclusively owned by the coordinator.
struct SyncState {
    stats: PersistedStats,
    schemas: SchemaTracker,
    /// Collections ever discovered; never shrinks (a dropped collection
    /// simply scans empty).
    collections: BTreeSet<String>,
}

/// The replication engine's top-level coordinator.
pub struct Coordinator {
    config: ReplicationConfig,
    gateways: Arc<Gateways>,
    monitor: Arc<HealthMonitor>,
    bus: EventBus,
    replicator: DocumentReplicator,
    auth: AuthReplicator,
    reconciler: Reconciler,
    stats_store: StatsStore,
    state: RwLock<SyncState>,
    run_lock: Mutex<()>,
    state_tx: watch::Sender<EngineState>,
    state_rx: watch::Receiver<EngineState>,
}

fn now_ts() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

impl Coordinator {
    /// Build the engine, restoring persisted counters and watermarks if
    /// a stats file exists.
    pub async fn new(
        config: ReplicationConfig,
        gateways: Arc<Gateways>,
        bus: EventBus,
    ) -> Result<Self> {
        let stats_store = StatsStore::new(&config.stats_path);
        let stats = stats_store.load().await?;

        // Collections with watermarks are known from the start
        let collections: BTreeSet<String> = stats.watermarks.keys().cloned().collect();

        let monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&gateways),
            config.health.clone(),
            bus.clone(),
        ));
        let replicator = DocumentReplicator::new(
            Arc::clone(&gateways),
            bus.clone(),
            config.replication.read_chunk_size,
        );
        let auth = AuthReplicator::new(
            Arc::clone(&gateways),
            bus.clone(),
            config.auth.hash_params.clone(),
        );
        let reconciler = Reconciler::new(Arc::clone(&gateways), bus.clone());

        let (state_tx, state_rx) = watch::channel(EngineState::Idle);
        metrics::set_engine_state("Idle");

        info!(
            stats_path = %config.stats_path,
            known_collections = collections.len(),
            runs_so_far = stats.counters.incremental_run_count,
            "Coordinator ready"
        );

        Ok(Self {
            config,
            gateways,
            monitor,
            bus,
            replicator,
            auth,
            reconciler,
            stats_store,
            state: RwLock::new(SyncState {
                stats,
                schemas: SchemaTracker::new(),
                collections,
            }),
            run_lock: Mutex::new(()),
            state_tx,
            state_rx,
        })
    }

    /// The health monitor (spawn [`HealthMonitor::run`] for the
    /// background probe loop).
    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    /// The event bus; subscribe for the push stream.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Current engine state.
    pub fn engine_state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// A receiver for observing engine-state transitions.
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    fn set_state(&self, state: EngineState) {
        let _ = self.state_tx.send(state);
        metrics::set_engine_state(&state.to_string());
    }

    /// One forward pass: health gate → discovery → schema refresh →
    /// per-collection replication → auth replication → persist.
    pub async fn run_once(&self) -> RunReport {
        let Ok(_guard) = self.run_lock.try_lock() else {
            return self.busy_report();
        };
        self.forward_pass(ReplicationMode::Incremental).await
    }

    /// Clear all forward watermarks, then run a forward pass from scratch.
    pub async fn force_full(&self) -> RunReport {
        let Ok(_guard) = self.run_lock.try_lock() else {
            return self.busy_report();
        };
        self.state.write().await.stats.clear_forward_watermarks();
        info!("Forward watermarks cleared for full run");
        self.forward_pass(ReplicationMode::Full).await
    }

    /// Auth-only full pass.
    pub async fn force_auth(&self) -> RunReport {
        let Ok(_guard) = self.run_lock.try_lock() else {
            return self.busy_report();
        };
        self.auth_only_pass().await
    }

    /// Recovery pass: standby → primary documents, then auth incremental
    /// into primary, then an integrity pass. Driven by an explicit
    /// control action, never by the timer.
    pub async fn recover(&self) -> RunReport {
        let Ok(_guard) = self.run_lock.try_lock() else {
            return self.busy_report();
        };
        self.recovery_pass().await
    }

    /// Explicit integrity pass over all known collections and the
    /// directories. Reports only; modifies neither side.
    pub async fn reconcile(&self) -> RunReport {
        let Ok(_guard) = self.run_lock.try_lock() else {
            return self.busy_report();
        };
        self.reconcile_pass().await
    }

    /// Snapshot of counters, watermarks, schemas, and current health.
    pub async fn stats(&self) -> StatsSnapshot {
        let state = self.state.read().await;
        StatsSnapshot {
            counters: state.stats.counters.clone(),
            watermarks: state.stats.watermarks.clone(),
            auth_watermark: state.stats.auth_watermark.clone(),
            schemas: state
                .schemas
                .all()
                .iter()
                .map(|(name, keys)| (name.clone(), keys.iter().cloned().collect()))
                .collect(),
            health: self.monitor.snapshot(),
        }
    }

    /// Zero the counters (watermarks survive) and announce the reset.
    pub async fn reset_stats(&self) -> Result<()> {
        let _guard = self.run_lock.lock().await;
        self.state.write().await.stats.counters.reset();
        self.persist().await;
        self.bus.publish(Event::StatsReset {
            timestamp: now_ts(),
        });
        info!("Counters reset");
        Ok(())
    }

    fn busy_report(&self) -> RunReport {
        metrics::record_run_busy();
        let now = now_ts();
        RunReport::bare(RunStatus::Busy, now.clone(), now)
            .with_message("a run is already in progress")
    }

    async fn persist(&self) {
        let stats = self.state.read().await.stats.clone();
        // Persist failures are logged and counted inside the store; the
        // engine stays able to accept the next run either way.
        let _ = self.stats_store.save(&stats).await;
    }

    async fn publish_stats(&self) {
        let counters = self.state.read().await.stats.counters.clone();
        self.bus.publish(Event::Stats(counters));
    }

    /// End a run: persist, publish counters, settle engine state.
    async fn finish_run(&self, kind: &str, status: RunStatus, run_start: Instant) {
        self.persist().await;
        self.publish_stats().await;
        self.set_state(match status {
            RunStatus::Paused => EngineState::Paused,
            RunStatus::Error => EngineState::Error,
            _ => EngineState::Idle,
        });
        metrics::record_run(kind, status.as_str(), run_start.elapsed());
    }

    async fn forward_pass(&self, mode: ReplicationMode) -> RunReport {
        let span = info_span!("forward_pass", ?mode);

        async move {
            let started_at = now_ts();
            let run_start = Instant::now();
            self.set_state(EngineState::Running);

            self.bus.publish(Event::AutoRunTriggered {
                timestamp: started_at.clone(),
                interval_hint: self.config.run_interval_minutes,
            });

            let snapshot = self.monitor.refresh().await;
            let decision = gate(&snapshot);

            match decision.db {
                Gate::Paused => {
                    warn!("Forward run gated: primary database unreachable");
                    self.finish_run("forward", RunStatus::Paused, run_start).await;
                    return RunReport::bare(RunStatus::Paused, started_at, now_ts())
                        .with_message("primary database unreachable");
                }
                Gate::Error => {
                    warn!("Forward run gated: standby database unreachable");
                    self.state.write().await.stats.counters.errors += 1;
                    self.finish_run("forward", RunStatus::Error, run_start).await;
                    return RunReport::bare(RunStatus::Error, started_at, now_ts())
                        .with_message("standby database unreachable");
                }
                Gate::Replicate => {}
            }

            // Discover collections; the known set only ever grows
            match self.gateways.list_collections(Side::Primary).await {
                Ok(found) => {
                    self.state.write().await.collections.extend(found);
                }
                Err(e) => {
                    warn!(error = %e, "Collection discovery failed, pausing run");
                    self.finish_run("forward", RunStatus::Paused, run_start).await;
                    return RunReport::bare(RunStatus::Paused, started_at, now_ts())
                        .with_message("collection discovery failed");
                }
            }
            let collections: Vec<String> = {
                self.state.read().await.collections.iter().cloned().collect()
            };

            info!(
                ?mode,
                collections = collections.len(),
                "Forward run started"
            );

            let health_rx = self.monitor.watch();
            let mut outcomes = Vec::with_capacity(collections.len());
            let mut run_paused = false;

            for collection in &collections {
                if !self.monitor.snapshot().primary_db {
                    warn!("Primary lost mid-run, skipping remaining collections");
                    run_paused = true;
                    break;
                }

                self.refresh_schema(collection).await;

                let since = {
                    self.state
                        .read()
                        .await
                        .stats
                        .watermark(collection, Direction::Forward)
                        .map(str::to_string)
                };

                let outcome = self
                    .replicator
                    .replicate_collection(
                        collection,
                        Direction::Forward,
                        mode,
                        since.as_deref(),
                        &health_rx,
                    )
                    .await;

                {
                    let mut state = self.state.write().await;
                    state.stats.counters.total_documents_written += outcome.written;
                    state.stats.counters.duplicates_skipped += outcome.duplicates_skipped;
                    state.stats.counters.errors += outcome.errors;
                    if let Some(watermark) = &outcome.new_watermark {
                        state
                            .stats
                            .advance_watermark(collection, Direction::Forward, watermark);
                    }
                }

                let paused = outcome.status == CollectionStatus::Paused;
                outcomes.push(outcome);
                if paused {
                    run_paused = true;
                    break;
                }
            }

            // Auth phase, gated independently
            let mut auth_outcome = None;
            let mut auth_gate_error = false;
            if !run_paused {
                match decision.auth {
                    Gate::Replicate => {
                        auth_outcome = Some(self.auth_forward_pass().await);
                    }
                    Gate::Paused => {
                        info!("Auth phase paused: primary directory unreachable");
                    }
                    Gate::Error => {
                        warn!("Auth phase failed: standby directory unreachable");
                        self.state.write().await.stats.counters.auth.auth_errors += 1;
                        auth_gate_error = true;
                    }
                }
            }

            {
                let mut state = self.state.write().await;
                state.stats.counters.incremental_run_count += 1;
                state.stats.counters.last_run_at = Some(now_ts());
                if mode == ReplicationMode::Full {
                    state.stats.counters.last_full_run_at = Some(now_ts());
                }
            }

            // Implicit integrity pass every Nth run
            let mut integrity = Vec::new();
            let mut auth_integrity = None;
            if !run_paused {
                let run_count = self.state.read().await.stats.counters.incremental_run_count;
                let every = self.config.replication.reconcile_every_runs;
                if every > 0 && run_count % every == 0 {
                    info!(run_count, "Implicit integrity pass");
                    integrity = self.reconciler.reconcile_collections(&collections).await;
                    auth_integrity = self.reconciler.reconcile_auth().await.ok();
                }
            }

            let doc_errors = outcomes.iter().any(|o| o.errors > 0);
            let auth_errors = auth_outcome
                .as_ref()
                .map(|a: &crate::auth_sync::AuthOutcome| a.errors > 0)
                .unwrap_or(false);
            let status = if run_paused {
                RunStatus::Paused
            } else if doc_errors || auth_errors || auth_gate_error {
                RunStatus::Error
            } else {
                RunStatus::Completed
            };

            self.finish_run("forward", status, run_start).await;
            info!(status = %status, collections = outcomes.len(), "Forward run finished");

            let mut report = RunReport::bare(status, started_at, now_ts());
            report.collections = outcomes;
            report.auth = auth_outcome;
            report.integrity = integrity;
            report.auth_integrity = auth_integrity;
            report
        }
        .instrument(span)
        .await
    }

    /// Run the forward auth phase and fold its outcome into the counters.
    ///
    /// Incremental when a watermark exists, full on first run. The new
    /// watermark is the export start time, so users changing during the
    /// export are picked up again next run.
    async fn auth_forward_pass(&self) -> crate::auth_sync::AuthOutcome {
        let auth_started = now_ts();
        let since = { self.state.read().await.stats.auth_watermark.clone() };
        let mode = if since.is_some() {
            AuthMode::Incremental
        } else {
            AuthMode::Full
        };

        let outcome = self
            .auth
            .replicate(Direction::Forward, mode, since.as_deref())
            .await;

        let mut state = self.state.write().await;
        let auth = &mut state.stats.counters.auth;
        auth.total_users = auth.total_users.max(outcome.total_users);
        auth.synced_users += outcome.synced_users;
        auth.custom_claims_propagated += outcome.claims_propagated;
        auth.auth_errors += outcome.errors;
        if outcome.status != AuthStatus::Paused {
            auth.last_auth_run_at = Some(now_ts());
            state.stats.auth_watermark = Some(auth_started);
        }
        outcome
    }

    async fn auth_only_pass(&self) -> RunReport {
        let span = info_span!("auth_only_pass");

        async move {
            let started_at = now_ts();
            let run_start = Instant::now();
            self.set_state(EngineState::Running);

            let snapshot = self.monitor.refresh().await;
            match gate(&snapshot).auth {
                Gate::Paused => {
                    warn!("Auth-only run gated: primary directory unreachable");
                    self.finish_run("auth", RunStatus::Paused, run_start).await;
                    return RunReport::bare(RunStatus::Paused, started_at, now_ts())
                        .with_message("primary directory unreachable");
                }
                Gate::Error => {
                    warn!("Auth-only run gated: standby directory unreachable");
                    self.state.write().await.stats.counters.auth.auth_errors += 1;
                    self.finish_run("auth", RunStatus::Error, run_start).await;
                    return RunReport::bare(RunStatus::Error, started_at, now_ts())
                        .with_message("standby directory unreachable");
                }
                Gate::Replicate => {}
            }

            let auth_started = now_ts();
            let outcome = self.auth.replicate(Direction::Forward, AuthMode::Full, None).await;

            {
                let mut state = self.state.write().await;
                let auth = &mut state.stats.counters.auth;
                auth.total_users = auth.total_users.max(outcome.total_users);
                auth.synced_users += outcome.synced_users;
                auth.custom_claims_propagated += outcome.claims_propagated;
                auth.auth_errors += outcome.errors;
                if outcome.status != AuthStatus::Paused {
                    auth.last_auth_run_at = Some(now_ts());
                    state.stats.auth_watermark = Some(auth_started);
                }
            }

            let status = match outcome.status {
                AuthStatus::Completed => RunStatus::Completed,
                AuthStatus::Paused => RunStatus::Paused,
                AuthStatus::Failed => RunStatus::Error,
            };
            self.finish_run("auth", status, run_start).await;

            let mut report = RunReport::bare(status, started_at, now_ts());
            report.auth = Some(outcome);
            report
        }
        .instrument(span)
        .await
    }

    async fn recovery_pass(&self) -> RunReport {
        let span = info_span!("recovery_pass");

        async move {
            let started_at = now_ts();
            let run_start = Instant::now();
            self.set_state(EngineState::Recovering);

            let snapshot = self.monitor.refresh().await;
            if !snapshot.primary_db || !snapshot.standby_db {
                warn!(
                    primary_db = snapshot.primary_db,
                    standby_db = snapshot.standby_db,
                    "Recovery gated: both databases must be reachable"
                );
                self.finish_run("recovery", RunStatus::Paused, run_start).await;
                return RunReport::bare(RunStatus::Paused, started_at, now_ts())
                    .with_message("recovery requires both databases reachable");
            }

            // Standby is the source of record here; discover from it
            match self.gateways.list_collections(Side::Standby).await {
                Ok(found) => {
                    self.state.write().await.collections.extend(found);
                }
                Err(e) => {
                    warn!(error = %e, "Standby discovery failed, pausing recovery");
                    self.finish_run("recovery", RunStatus::Paused, run_start).await;
                    return RunReport::bare(RunStatus::Paused, started_at, now_ts())
                        .with_message("collection discovery failed");
                }
            }
            let collections: Vec<String> = {
                self.state.read().await.collections.iter().cloned().collect()
            };

            info!(collections = collections.len(), "Recovery started");

            let health_rx = self.monitor.watch();
            let mut outcomes = Vec::with_capacity(collections.len());
            let mut run_paused = false;

            for collection in &collections {
                if !self.monitor.snapshot().standby_db {
                    warn!("Standby lost mid-recovery, skipping remaining collections");
                    run_paused = true;
                    break;
                }

                let since = {
                    self.state
                        .read()
                        .await
                        .stats
                        .watermark(collection, Direction::Recover)
                        .map(str::to_string)
                };

                let outcome = self
                    .replicator
                    .replicate_collection(
                        collection,
                        Direction::Recover,
                        ReplicationMode::Incremental,
                        since.as_deref(),
                        &health_rx,
                    )
                    .await;

                {
                    let mut state = self.state.write().await;
                    state.stats.counters.total_documents_written += outcome.written;
                    state.stats.counters.duplicates_skipped += outcome.duplicates_skipped;
                    state.stats.counters.errors += outcome.errors;
                    if let Some(watermark) = &outcome.new_watermark {
                        state
                            .stats
                            .advance_watermark(collection, Direction::Recover, watermark);
                    }
                }

                let paused = outcome.status == CollectionStatus::Paused;
                outcomes.push(outcome);
                if paused {
                    run_paused = true;
                    break;
                }
            }

            // Auth incremental into primary, when both directories answer.
            // The forward auth watermark seeds the filter; recovery does not
            // advance it.
            let mut auth_outcome = None;
            if !run_paused && snapshot.primary_auth && snapshot.standby_auth {
                let since = { self.state.read().await.stats.auth_watermark.clone() };
                let outcome = self
                    .auth
                    .replicate(Direction::Recover, AuthMode::Incremental, since.as_deref())
                    .await;

                let mut state = self.state.write().await;
                let auth = &mut state.stats.counters.auth;
                auth.synced_users += outcome.synced_users;
                auth.custom_claims_propagated += outcome.claims_propagated;
                auth.auth_errors += outcome.errors;
                drop(state);
                auth_outcome = Some(outcome);
            }

            // Recovery always ends with an integrity pass
            let (integrity, auth_integrity) = if run_paused {
                (Vec::new(), None)
            } else {
                (
                    self.reconciler.reconcile_collections(&collections).await,
                    self.reconciler.reconcile_auth().await.ok(),
                )
            };

            let doc_errors = outcomes.iter().any(|o| o.errors > 0);
            let auth_errors = auth_outcome
                .as_ref()
                .map(|a: &crate::auth_sync::AuthOutcome| a.errors > 0)
                .unwrap_or(false);
            let status = if run_paused {
                RunStatus::Paused
            } else if doc_errors || auth_errors {
                RunStatus::Error
            } else {
                RunStatus::Completed
            };

            self.finish_run("recovery", status, run_start).await;
            info!(status = %status, "Recovery finished");

            let mut report = RunReport::bare(status, started_at, now_ts());
            report.collections = outcomes;
            report.auth = auth_outcome;
            report.integrity = integrity;
            report.auth_integrity = auth_integrity;
            report
        }
        .instrument(span)
        .await
    }

    async fn reconcile_pass(&self) -> RunReport {
        let span = info_span!("reconcile_pass");

        async move {
            let started_at = now_ts();

            // Best-effort discovery; fall back to the known set
            if let Ok(found) = self.gateways.list_collections(Side::Primary).await {
                self.state.write().await.collections.extend(found);
            }
            if let Ok(found) = self.gateways.list_collections(Side::Standby).await {
                self.state.write().await.collections.extend(found);
            }
            let collections: Vec<String> = {
                self.state.read().await.collections.iter().cloned().collect()
            };

            let integrity: Vec<IntegrityReport> =
                self.reconciler.reconcile_collections(&collections).await;
            let auth_integrity: Option<AuthIntegrityReport> =
                self.reconciler.reconcile_auth().await.ok();

            let mut report = RunReport::bare(RunStatus::Completed, started_at, now_ts());
            report.integrity = integrity;
            report.auth_integrity = auth_integrity;
            report
        }
        .instrument(span)
        .await
    }

    /// Sample a collection and fold the observation into the schema set.
    async fn refresh_schema(&self, collection: &str) {
        let sample_size = self.config.replication.schema_sample_size;
        match self.gateways.sample(Side::Primary, collection, sample_size).await {
            Ok(docs) => {
                let change = {
                    self.state
                        .write()
                        .await
                        .schemas
                        .observe(collection, &docs)
                };
                if let Some(change) = change {
                    metrics::record_schema_keys(
                        collection,
                        change.new_keys.len(),
                        change.total_keys,
                    );
                    self.bus.publish(Event::SchemaChange {
                        collection: change.collection,
                        new_keys: change.new_keys,
                        total_keys: change.total_keys,
                    });
                }
            }
            Err(e) => {
                // Schema tracking is observability; never fails a run
                warn!(collection, error = %e, "Schema sampling failed");
            }
        }
    }

    /// Current health snapshot, via the monitor.
    pub fn health(&self) -> HealthSnapshot {
        self.monitor.snapshot()
    }

    /// Every collection the engine has ever discovered, sorted.
    pub async fn collections(&self) -> Vec<String> {
        self.state.read().await.collections.iter().cloned().collect()
    }

    /// The observed schema of one collection, sorted dotted key paths.
    pub async fn schema(&self, collection: &str) -> Option<Vec<String>> {
        self.state
            .read()
            .await
            .schemas
            .schema(collection)
            .map(|keys| keys.iter().cloned().collect())
    }
}
