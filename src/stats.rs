// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication counters, watermarks, and their persistence.
//!
//! The engine's only durable state is one JSON file: cumulative run
//! counters plus per-collection watermarks and the directory watermark.
//! It is written after every run (including failed ones) and restored on
//! startup, so an engine restart resumes incremental replication instead
//! of re-scanning everything.
//!
//! # Watermark Semantics
//!
//! A watermark is the highest normalized `updatedAt` the engine has
//! definitely committed to the target for a (collection, direction)
//! pair. The next incremental scan filters on `updatedAt > watermark`.
//! Watermarks only move forward; clearing them (a full-run request) is
//! the one sanctioned reset.
//!
//! # Atomicity
//!
//! The file is written to a sibling temp path and renamed over the
//! target, so a crash mid-write leaves the previous file intact. On
//! restart a torn temp file is simply ignored.

use crate::error::Result;
use crate::gateway::Direction;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Cumulative counters across all runs of this deployment.
///
/// Monotonic non-decreasing; only [`reset`](Self::reset) zeroes them,
/// and the coordinator announces that with an explicit event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCounters {
    /// Successfully committed batch operations.
    pub total_documents_written: u64,
    /// Documents dropped because the target was already current.
    pub duplicates_skipped: u64,
    /// Failed operations (batch commit failures count their whole batch).
    pub errors: u64,
    /// Forward runs completed.
    pub incremental_run_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_full_run_at: Option<String>,
    /// Directory replication sub-counters.
    #[serde(default)]
    pub auth: AuthCounters,
}

impl RunCounters {
    /// Zero everything. The caller is responsible for announcing the
    /// reset (counters are otherwise monotonic).
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Directory replication sub-counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthCounters {
    /// High-water mark of users seen on the primary directory.
    pub total_users: u64,
    /// Successfully imported user records.
    pub synced_users: u64,
    /// Custom-claims propagations performed.
    pub custom_claims_propagated: u64,
    /// Failed imports and claim propagations.
    pub auth_errors: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_auth_run_at: Option<String>,
}

/// Watermarks for one collection, one per direction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WatermarkPair {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recover: Option<String>,
}

/// Everything the engine persists: counters plus watermarks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedStats {
    #[serde(flatten)]
    pub counters: RunCounters,
    /// Per-collection `{forward, recover}` watermarks.
    #[serde(default)]
    pub watermarks: BTreeMap<String, WatermarkPair>,
    /// Start time of the last directory pass; seeds incremental auth runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_watermark: Option<String>,
}

impl PersistedStats {
    /// The stored watermark for a (collection, direction) pair.
    pub fn watermark(&self, collection: &str, direction: Direction) -> Option<&str> {
        let pair = self.watermarks.get(collection)?;
        match direction {
            Direction::Forward => pair.forward.as_deref(),
            Direction::Recover => pair.recover.as_deref(),
        }
    }

    /// Advance a watermark, keeping the maximum. A candidate at or below
    /// the stored value is a no-op, so watermarks never move backward.
    pub fn advance_watermark(&mut self, collection: &str, direction: Direction, candidate: &str) {
        let pair = self.watermarks.entry(collection.to_string()).or_default();
        let slot = match direction {
            Direction::Forward => &mut pair.forward,
            Direction::Recover => &mut pair.recover,
        };
        match slot {
            Some(current) if current.as_str() >= candidate => {}
            _ => *slot = Some(candidate.to_string()),
        }
    }

    /// Clear every forward watermark (the `ForceFull` reset).
    pub fn clear_forward_watermarks(&mut self) {
        for pair in self.watermarks.values_mut() {
            pair.forward = None;
        }
    }
}

/// Owner of the stats file.
///
/// Exclusively used by the coordinator; a run persists once at its end,
/// so write traffic is a few hundred bytes per run.
pub struct StatsStore {
    path: PathBuf,
}

impl StatsStore {
    /// Create a store for the given path. Nothing is touched on disk
    /// until the first save.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// File path (for diagnostics).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load persisted stats, or start from zero when no file exists.
    pub async fn load(&self) -> Result<PersistedStats> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let stats: PersistedStats = serde_json::from_slice(&bytes)?;
                info!(
                    path = %self.path.display(),
                    runs = stats.counters.incremental_run_count,
                    watermarks = stats.watermarks.len(),
                    "Restored stats from previous run"
                );
                Ok(stats)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No stats file, starting from zero");
                Ok(PersistedStats::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Persist stats atomically: write a sibling temp file, then rename
    /// over the target.
    pub async fn save(&self, stats: &PersistedStats) -> Result<()> {
        let encoded = serde_json::to_vec_pretty(stats)?;

        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let result = async {
            tokio::fs::write(&tmp, &encoded).await?;
            tokio::fs::rename(&tmp, &self.path).await?;
            Ok(())
        }
        .await;

        match &result {
            Ok(()) => {
                debug!(path = %self.path.display(), bytes = encoded.len(), "Stats persisted");
                crate::metrics::record_stats_persist(true);
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to persist stats");
                crate::metrics::record_stats_persist(false);
            }
        }

        result
    }
}
