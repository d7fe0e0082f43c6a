//! Engine state and run report types.
//!
//! # State Transitions
//!
//! ```text
//!            run_once()/force_*()           recover()
//!  Idle ──────────────────────► Running        │
//!   ▲                              │       Recovering
//!   │        (clean finish)        │           │
//!   ├──────────────────────────────┤◄──────────┘
//!   │                              │
//!   │      (source unreachable)    ▼
//!   ├───────────────────────── Paused
//!   │                              │
//!   │      (target unreachable,    ▼
//!   └───────────────────────── Error ──► (next run starts again)
//! ```
//!
//! `Paused` and `Error` are resting states, not terminal ones: the next
//! control action or timer tick starts a fresh run regardless.

use crate::auth_sync::AuthOutcome;
use crate::health::HealthSnapshot;
use crate::reconcile::{AuthIntegrityReport, IntegrityReport};
use crate::replicate::CollectionOutcome;
use crate::stats::{RunCounters, WatermarkPair};
use serde::Serialize;
use std::collections::BTreeMap;

/// Top-level state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No run in flight.
    Idle,
    /// A forward or auth-only run is executing.
    Running,
    /// A recovery pass is executing.
    Recovering,
    /// The last run could not read its source.
    Paused,
    /// The last run failed against its target.
    Error,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Idle => write!(f, "Idle"),
            EngineState::Running => write!(f, "Running"),
            EngineState::Recovering => write!(f, "Recovering"),
            EngineState::Paused => write!(f, "Paused"),
            EngineState::Error => write!(f, "Error"),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// All phases finished without errors.
    Completed,
    /// The source was (or became) unreachable; work stopped cleanly.
    Paused,
    /// At least one phase failed; see the error counters.
    Error,
    /// Another run held the lock; nothing was attempted.
    Busy,
}

impl RunStatus {
    /// Label for metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Paused => "paused",
            RunStatus::Error => "error",
            RunStatus::Busy => "busy",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result handed back from every control action.
///
/// `success` in the control-surface sense maps to `status != Busy`:
/// mid-run partial failures still produce a report, with the damage
/// visible in the outcomes and counters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub collections: Vec<CollectionOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthOutcome>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub integrity: Vec<IntegrityReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_integrity: Option<AuthIntegrityReport>,
    pub started_at: String,
    pub finished_at: String,
}

impl RunReport {
    /// An empty report with the given status.
    pub(crate) fn bare(status: RunStatus, started_at: String, finished_at: String) -> Self {
        Self {
            status,
            message: None,
            collections: Vec::new(),
            auth: None,
            integrity: Vec::new(),
            auth_integrity: None,
            started_at,
            finished_at,
        }
    }

    pub(crate) fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Whether the engine actually began the work.
    pub fn accepted(&self) -> bool {
        self.status != RunStatus::Busy
    }
}

/// Everything `Stats()` exposes in one snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub counters: RunCounters,
    pub watermarks: BTreeMap<String, WatermarkPair>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_watermark: Option<String>,
    /// Observed dotted key paths per collection.
    pub schemas: BTreeMap<String, Vec<String>>,
    pub health: HealthSnapshot,
}
