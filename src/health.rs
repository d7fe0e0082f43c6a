//! Endpoint health probing and the replication gate.
//!
//! The monitor probes all four endpoints (primary/standby database,
//! primary/standby directory) concurrently on a fixed cadence and
//! publishes the result of each completed round atomically on a watch
//! channel. A probe that misses its deadline counts as unhealthy; a slow
//! probe never delays the others.
//!
//! The coordinator consumes snapshots through [`gate`], which encodes
//! the replication policy:
//!
//! | primaryDb | standbyDb | primaryAuth | standbyAuth | Action |
//! |-----------|-----------|-------------|-------------|--------|
//! | false | * | * | * | paused (cannot read source) |
//! | true | false | * | * | error (cannot write target) |
//! | true | true | false | * | replicate DB only; auth paused |
//! | true | true | true | false | error on auth phase |
//! | true | true | true | true | full replication |

use crate::config::HealthConfig;
use crate::events::{Event, EventBus};
use crate::gateway::{Gateways, ProbeKind, Side};
use crate::metrics;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Health of the four endpoints, as of one completed probe round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub primary_db: bool,
    pub standby_db: bool,
    pub primary_auth: bool,
    pub standby_auth: bool,
    pub timestamp: String,
}

impl HealthSnapshot {
    /// The pessimistic pre-first-probe snapshot.
    pub fn all_down(timestamp: impl Into<String>) -> Self {
        Self {
            primary_db: false,
            standby_db: false,
            primary_auth: false,
            standby_auth: false,
            timestamp: timestamp.into(),
        }
    }

    /// All four endpoints answering.
    pub fn fully_healthy(&self) -> bool {
        self.primary_db && self.standby_db && self.primary_auth && self.standby_auth
    }
}

/// What a phase may do given a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Both endpoints of the phase are up.
    Replicate,
    /// The source is unreadable; skip without counting an error.
    Paused,
    /// The target is unwritable; the phase fails.
    Error,
}

/// Gate decisions for the two phases of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateDecision {
    pub db: Gate,
    pub auth: Gate,
}

/// Apply the gating policy to a snapshot.
///
/// The source side dominates each column: an unreadable source pauses
/// the phase even when the target is also down.
pub fn gate(snapshot: &HealthSnapshot) -> GateDecision {
    let db = if !snapshot.primary_db {
        Gate::Paused
    } else if !snapshot.standby_db {
        Gate::Error
    } else {
        Gate::Replicate
    };

    let auth = if !snapshot.primary_auth {
        Gate::Paused
    } else if !snapshot.standby_auth {
        Gate::Error
    } else {
        Gate::Replicate
    };

    GateDecision { db, auth }
}

/// Probes the four endpoints and owns the current snapshot.
pub struct HealthMonitor {
    gateways: Arc<Gateways>,
    config: HealthConfig,
    bus: EventBus,
    snapshot_tx: watch::Sender<HealthSnapshot>,
    snapshot_rx: watch::Receiver<HealthSnapshot>,
}

impl HealthMonitor {
    /// Create a monitor. The initial snapshot is pessimistic (all down)
    /// until the first [`refresh`](Self::refresh) completes.
    pub fn new(gateways: Arc<Gateways>, config: HealthConfig, bus: EventBus) -> Self {
        let initial = HealthSnapshot::all_down(chrono::Utc::now().to_rfc3339());
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);
        Self {
            gateways,
            config,
            bus,
            snapshot_tx,
            snapshot_rx,
        }
    }

    /// The most recently completed round.
    pub fn snapshot(&self) -> HealthSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// A receiver for observing rounds as they complete.
    pub fn watch(&self) -> watch::Receiver<HealthSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Run one probe round now and publish the result.
    ///
    /// The four probes run concurrently, each under the configured
    /// deadline; a timeout or error marks that endpoint unhealthy.
    pub async fn refresh(&self) -> HealthSnapshot {
        let deadline = self.config.probe_timeout_duration();

        let probe = |side: Side, kind: ProbeKind, endpoint: &'static str| {
            let gateways = Arc::clone(&self.gateways);
            async move {
                let start = Instant::now();
                let healthy = gateways.probe(side, kind, deadline).await.is_ok();
                metrics::record_probe(endpoint, healthy);
                metrics::record_probe_latency(endpoint, start.elapsed());
                metrics::set_endpoint_health(endpoint, healthy);
                healthy
            }
        };

        let (primary_db, standby_db, primary_auth, standby_auth) = futures::join!(
            probe(Side::Primary, ProbeKind::Database, "primary-db"),
            probe(Side::Standby, ProbeKind::Database, "standby-db"),
            probe(Side::Primary, ProbeKind::Directory, "primary-auth"),
            probe(Side::Standby, ProbeKind::Directory, "standby-auth"),
        );

        let snapshot = HealthSnapshot {
            primary_db,
            standby_db,
            primary_auth,
            standby_auth,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        if !snapshot.fully_healthy() {
            warn!(
                primary_db,
                standby_db, primary_auth, standby_auth, "Degraded health round"
            );
        } else {
            debug!("Health round: all endpoints up");
        }

        let _ = self.snapshot_tx.send(snapshot.clone());
        self.bus.publish(Event::Health(snapshot.clone()));
        snapshot
    }

    /// Run the background probe loop until shutdown is signaled.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let interval = self.config.probe_interval();
        info!(
            interval_secs = interval.as_secs(),
            timeout_ms = self.config.probe_timeout_duration().as_millis(),
            "Starting health probe loop"
        );

        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping health loop");
                        break;
                    }
                }

                _ = timer.tick() => {
                    self.refresh().await;
                }
            }
        }

        info!("Health probe loop stopped");
    }
}
