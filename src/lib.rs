//! # Standby Replicator
//!
//! An active/standby replication engine for two logically identical
//! document-store deployments and their authentication directories.
//! Keeps the standby a lagging copy of the primary, detects outages of
//! either side, pauses and resumes safely, and reconciles drift.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                           Coordinator                                │
//! │                                                                      │
//! │  ┌───────────────┐   ┌─────────────────────┐   ┌──────────────────┐  │
//! │  │ HealthMonitor │──►│ DocumentReplicator  │──►│ AuthReplicator   │  │
//! │  │ (gate)        │   │ (watermark + batch) │   │ (export/import)  │  │
//! │  └───────────────┘   └─────────────────────┘   └──────────────────┘  │
//! │          │                      │                       │            │
//! │          ▼                      ▼                       ▼            │
//! │  ┌───────────────┐   ┌─────────────────────┐   ┌──────────────────┐  │
//! │  │  EventBus     │   │     Gateways        │   │   Reconciler     │  │
//! │  │ (broadcast)   │   │ (4 backend handles) │   │ (report-only)    │  │
//! │  └───────────────┘   └─────────────────────┘   └──────────────────┘  │
//! │                                 │                                    │
//! │                         ┌───────┴───────┐                            │
//! │                         │  StatsStore   │  stats.json (atomic)       │
//! │                         └───────────────┘                            │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use standby_replicator::{Coordinator, EventBus, Gateways, ReplicationConfig};
//! use standby_replicator::memory::{MemoryDirectory, MemoryStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> standby_replicator::Result<()> {
//!     let config = ReplicationConfig::from_env();
//!     let bus = EventBus::default();
//!
//!     // Production wires real backend handles here; the memory
//!     // backends run the engine standalone.
//!     let gateways = Arc::new(Gateways::new(
//!         Arc::new(MemoryStore::new("primary-db")),
//!         Arc::new(MemoryStore::new("standby-db")),
//!         Arc::new(MemoryDirectory::new("primary-auth")),
//!         Arc::new(MemoryDirectory::new("standby-auth")),
//!         &config.gateway,
//!     ));
//!
//!     let coordinator = Coordinator::new(config, gateways, bus).await?;
//!     let report = coordinator.run_once().await;
//!     println!("run finished: {}", report.status);
//!     Ok(())
//! }
//! ```
//!
//! The engine is timer-agnostic: an external scheduler calls
//! [`Coordinator::run_once`] on its own cadence, and the HTTP control
//! surface is a thin adapter over the other coordinator methods.

pub mod auth_sync;
pub mod config;
pub mod coordinator;
pub mod document;
pub mod error;
pub mod events;
pub mod gateway;
pub mod health;
pub mod memory;
pub mod metrics;
pub mod reconcile;
pub mod replicate;
pub mod resilience;
pub mod schema;
pub mod stats;
pub mod user;

// Re-exports for convenience
pub use auth_sync::{AuthMode, AuthOutcome, AuthReplicator, AuthStatus};
pub use config::ReplicationConfig;
pub use coordinator::{Coordinator, EngineState, RunReport, RunStatus, StatsSnapshot};
pub use document::Document;
pub use error::{ReplicationError, Result};
pub use events::{Event, EventBus};
pub use gateway::{AuthDirectory, Direction, DocumentStore, Gateways, ProbeKind, Side};
pub use health::{gate, Gate, GateDecision, HealthMonitor, HealthSnapshot};
pub use reconcile::{AuthIntegrityReport, IntegrityReport, Reconciler};
pub use replicate::{CollectionOutcome, CollectionStatus, DocumentReplicator, ReplicationMode};
pub use stats::{AuthCounters, PersistedStats, RunCounters, StatsStore, WatermarkPair};
pub use user::{PasswordHashParams, UserRecord};
