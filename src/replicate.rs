// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-collection incremental document replication.
//!
//! One pass copies a single collection from the source side to the
//! target side:
//!
//! 1. Scan the source, filtered server-side by the direction's watermark
//!    (incremental) or unfiltered (full).
//! 2. For each chunk, pre-read the target (`multi_get`) and suppress
//!    documents whose target copy is already current. The pre-read runs
//!    even though the scan filter excluded most duplicates; it is the
//!    defense against clock skew between the two deployments.
//! 3. Accumulate surviving writes into a pending batch; commit whenever
//!    it reaches the 450-operation cap, and once more for the residue.
//! 4. Fold each committed batch's maximum timestamp into the new
//!    watermark. A failed commit counts its operations as errors and
//!    contributes nothing to the watermark.
//!
//! A document without a timestamp is written on first encounter (always
//! newer than the target) but never advances the watermark.
//!
//! The same pass serves both directions: forward (primary → standby)
//! and recovery (standby → primary). Recovery is upsert-merge only and
//! never deletes; divergent documents resolve by newest-timestamp-wins
//! exactly like forward replication.

use crate::document::{max_timestamp, source_is_newer};
use crate::events::{Event, EventBus};
use crate::gateway::{Direction, Gateways, Side, MAX_BATCH_WRITE_OPS};
use crate::health::HealthSnapshot;
use crate::metrics;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

/// Whether a pass starts from the stored watermark or from scratch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationMode {
    Incremental,
    Full,
}

impl ReplicationMode {
    pub fn is_incremental(self) -> bool {
        matches!(self, ReplicationMode::Incremental)
    }
}

/// How a collection pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionStatus {
    /// Every chunk processed; errors (if any) are in the counts.
    Completed,
    /// The source became unreadable; the remainder was skipped.
    Paused,
    /// A non-transient failure stopped the pass.
    Failed,
}

/// Accounting for one collection pass.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionOutcome {
    pub collection: String,
    pub direction: Direction,
    pub status: CollectionStatus,
    /// Documents the source scan returned.
    pub scanned: u64,
    /// Operations in successfully committed batches.
    pub written: u64,
    /// Documents suppressed because the target was already current.
    pub duplicates_skipped: u64,
    /// Operations in failed batches plus failed chunk reads.
    pub errors: u64,
    /// max(previous watermark, committed batch maxima). Unchanged when
    /// nothing newer was committed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_watermark: Option<String>,
}

impl CollectionOutcome {
    fn starting(collection: &str, direction: Direction, since: Option<&str>) -> Self {
        Self {
            collection: collection.to_string(),
            direction,
            status: CollectionStatus::Completed,
            scanned: 0,
            written: 0,
            duplicates_skipped: 0,
            errors: 0,
            new_watermark: since.map(str::to_string),
        }
    }
}

/// Copies one collection per call; the coordinator drives it over the
/// discovered collection set and owns the watermarks.
pub struct DocumentReplicator {
    gateways: Arc<Gateways>,
    bus: EventBus,
    read_chunk_size: usize,
}

impl DocumentReplicator {
    pub fn new(gateways: Arc<Gateways>, bus: EventBus, read_chunk_size: usize) -> Self {
        Self {
            gateways,
            bus,
            read_chunk_size: read_chunk_size.max(1),
        }
    }

    /// Replicate one collection in the given direction.
    ///
    /// `since` is the stored watermark for (collection, direction); it is
    /// ignored in full mode. `health` is consulted between chunks: when
    /// the source side drops mid-pass, the pending batch still commits
    /// and the rest of the collection is skipped with status `Paused`.
    #[instrument(skip(self, since, health), fields(since = since.unwrap_or("-")))]
    pub async fn replicate_collection(
        &self,
        collection: &str,
        direction: Direction,
        mode: ReplicationMode,
        since: Option<&str>,
        health: &watch::Receiver<HealthSnapshot>,
    ) -> CollectionOutcome {
        let pass_start = Instant::now();
        let since = if mode.is_incremental() { since } else { None };
        let mut outcome = CollectionOutcome::starting(collection, direction, since);

        let docs = match self
            .gateways
            .scan_since(direction.source(), collection, since)
            .await
        {
            Ok(docs) => docs,
            Err(e) => {
                // An unreadable source pauses rather than fails: nothing
                // was attempted, so no counters move.
                if e.is_retryable() {
                    warn!(collection, %direction, error = %e, "Source unreadable, pausing pass");
                    outcome.status = CollectionStatus::Paused;
                } else {
                    warn!(collection, %direction, error = %e, "Source scan failed");
                    outcome.status = CollectionStatus::Failed;
                    outcome.errors += 1;
                    metrics::record_error("replicate", "scan");
                }
                return outcome;
            }
        };

        outcome.scanned = docs.len() as u64;
        metrics::record_documents_scanned(collection, docs.len());
        debug!(
            collection,
            %direction,
            scanned = docs.len(),
            since = since.unwrap_or("-"),
            "Scanned source"
        );

        let total = docs.len() as u64;
        let mut pending: Vec<(String, Value)> = Vec::new();
        let mut pending_max: Option<String> = None;

        for chunk in docs.chunks(self.read_chunk_size) {
            if !source_side_up(direction.source(), &health.borrow().clone()) {
                info!(collection, %direction, "Source lost mid-pass, pausing after current batch");
                outcome.status = CollectionStatus::Paused;
                break;
            }

            let ids: Vec<String> = chunk.iter().map(|d| d.id.clone()).collect();
            let existing = match self
                .gateways
                .multi_get(direction.target(), collection, &ids)
                .await
            {
                Ok(existing) => existing,
                Err(e) => {
                    warn!(collection, %direction, error = %e, "Target pre-read failed, skipping chunk");
                    outcome.errors += chunk.len() as u64;
                    metrics::record_error("replicate", "multi_get");
                    continue;
                }
            };

            for doc in chunk {
                let source_ts = doc.updated_at();
                let target_ts = existing.get(&doc.id).and_then(|d| d.updated_at());

                if existing.contains_key(&doc.id)
                    && !source_is_newer(source_ts.as_deref(), target_ts.as_deref())
                {
                    outcome.duplicates_skipped += 1;
                    continue;
                }

                pending.push((doc.id.clone(), doc.data.clone()));
                pending_max = max_timestamp(pending_max, source_ts);

                if pending.len() >= MAX_BATCH_WRITE_OPS {
                    let batch = std::mem::take(&mut pending);
                    let batch_max = pending_max.take();
                    self.commit(collection, direction, batch, batch_max, total, &mut outcome)
                        .await;
                }
            }
        }

        // Residual batch
        if !pending.is_empty() {
            let batch_max = pending_max.take();
            self.commit(collection, direction, pending, batch_max, total, &mut outcome)
                .await;
        }

        if outcome.errors > 0 && outcome.status == CollectionStatus::Completed {
            outcome.status = CollectionStatus::Failed;
        }

        metrics::record_duplicates_skipped(collection, outcome.duplicates_skipped as usize);
        metrics::record_collection_pass(collection, &direction.to_string(), pass_start.elapsed());

        let timestamp = chrono::Utc::now().to_rfc3339();
        self.bus.publish(match direction {
            Direction::Forward => Event::CollectionCompleted {
                collection: collection.to_string(),
                written_count: outcome.written,
                incremental: mode.is_incremental(),
                timestamp,
            },
            Direction::Recover => Event::CollectionRecovered {
                collection: collection.to_string(),
                written_count: outcome.written,
                timestamp,
            },
        });

        info!(
            collection,
            %direction,
            scanned = outcome.scanned,
            written = outcome.written,
            skipped = outcome.duplicates_skipped,
            errors = outcome.errors,
            status = ?outcome.status,
            "Collection pass finished"
        );

        outcome
    }

    /// Commit one batch and account for it.
    ///
    /// The batch's timestamp maximum folds into the watermark only on
    /// success; a failed commit counts every operation as an error and
    /// leaves the watermark where it was.
    #[instrument(skip(self, batch, batch_max, total, outcome), fields(ops = batch.len()))]
    async fn commit(
        &self,
        collection: &str,
        direction: Direction,
        batch: Vec<(String, Value)>,
        batch_max: Option<String>,
        total: u64,
        outcome: &mut CollectionOutcome,
    ) {
        let ops = batch.len();
        let start = Instant::now();

        match self
            .gateways
            .batch_write(direction.target(), collection, batch)
            .await
        {
            Ok(()) => {
                outcome.written += ops as u64;
                outcome.new_watermark = max_timestamp(outcome.new_watermark.take(), batch_max);
                metrics::record_batch_commit(collection, ops, start.elapsed());
                metrics::record_documents_written(collection, ops);

                self.bus.publish(match direction {
                    Direction::Forward => Event::CollectionProgress {
                        collection: collection.to_string(),
                        written_so_far: outcome.written,
                        of_total: total,
                        phase: "writing".to_string(),
                    },
                    Direction::Recover => Event::RecoveryProgress {
                        collection: collection.to_string(),
                        written_so_far: outcome.written,
                        of_total: total,
                        phase: "writing".to_string(),
                    },
                });
            }
            Err(e) => {
                outcome.errors += ops as u64;
                metrics::record_batch_commit_failure(collection, ops);
                warn!(
                    collection,
                    %direction,
                    ops,
                    error = %e,
                    "Batch commit failed, operations counted as errors"
                );
            }
        }
    }
}

fn source_side_up(source: Side, snapshot: &HealthSnapshot) -> bool {
    match source {
        Side::Primary => snapshot.primary_db,
        Side::Standby => snapshot.standby_db,
    }
}
