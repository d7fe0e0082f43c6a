//! Typed event fan-out.
//!
//! The engine publishes progress on a single bounded broadcast channel;
//! the HTTP/websocket surface is just one subscriber. Publishing never
//! blocks: a subscriber that falls behind loses the oldest events
//! (`RecvError::Lagged`) rather than stalling the run, and a run is
//! unaffected by subscribers disconnecting.
//!
//! Every event serializes to `{"event": ..., "payload": ...}` with
//! camelCase payload fields, which is the shape the browser client
//! consumes verbatim.

use crate::health::HealthSnapshot;
use crate::reconcile::{AuthIntegrityReport, IntegrityReport};
use crate::stats::RunCounters;
use serde::Serialize;
use tokio::sync::broadcast;

/// Default broadcast capacity; slow subscribers drop beyond this.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// A typed engine event with a JSON-ready payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum Event {
    /// A completed health-probe round.
    Health(HealthSnapshot),

    /// Full counters, emitted at the end of every run.
    Stats(RunCounters),

    /// A forward write batch committed.
    #[serde(rename_all = "camelCase")]
    CollectionProgress {
        collection: String,
        written_so_far: u64,
        of_total: u64,
        phase: String,
    },

    /// A forward collection pass finished.
    #[serde(rename_all = "camelCase")]
    CollectionCompleted {
        collection: String,
        written_count: u64,
        incremental: bool,
        timestamp: String,
    },

    /// New dotted key paths observed in a collection.
    #[serde(rename_all = "camelCase")]
    SchemaChange {
        collection: String,
        new_keys: Vec<String>,
        total_keys: usize,
    },

    /// A timer-driven run started.
    #[serde(rename_all = "camelCase")]
    AutoRunTriggered {
        timestamp: String,
        interval_hint: u64,
    },

    /// A recovery write batch committed.
    #[serde(rename_all = "camelCase")]
    RecoveryProgress {
        collection: String,
        written_so_far: u64,
        of_total: u64,
        phase: String,
    },

    /// A recovery collection pass finished.
    #[serde(rename_all = "camelCase")]
    CollectionRecovered {
        collection: String,
        written_count: u64,
        timestamp: String,
    },

    /// Directory export/import progress.
    #[serde(rename_all = "camelCase")]
    AuthProgress {
        phase: String,
        user_count: u64,
        of_total: u64,
    },

    /// A directory replication pass finished.
    #[serde(rename_all = "camelCase")]
    AuthCompleted {
        total_users: u64,
        synced_users: u64,
        custom_claims_propagated: u64,
        errors: u64,
        timestamp: String,
    },

    /// Per-collection integrity comparison result.
    IntegrityReport(IntegrityReport),

    /// Directory integrity comparison result.
    AuthIntegrityReport(AuthIntegrityReport),

    /// Counters were explicitly zeroed.
    #[serde(rename_all = "camelCase")]
    StatsReset { timestamp: String },
}

/// Publish-only fan-out to subscribers.
///
/// Cheap to clone; all clones publish into the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a bus with the given per-subscriber capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Publish an event to all current subscribers.
    ///
    /// Never blocks; an event published with no subscribers is dropped.
    pub fn publish(&self, event: Event) {
        tracing::trace!(?event, "Publishing event");
        let _ = self.tx.send(event);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
