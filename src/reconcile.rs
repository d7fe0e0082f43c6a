// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Integrity reconciliation.
//!
//! Compares the full ID sets of both sides per collection, and the UID
//! sets of the two directories, and reports the difference. Reconciling
//! never heals: the report tells an operator (or a recovery action) what
//! drifted, the engine touches neither side.

use crate::error::Result;
use crate::events::{Event, EventBus};
use crate::gateway::{Gateways, Side};
use crate::metrics;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// ID-set comparison for one collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub collection: String,
    pub primary_count: usize,
    pub standby_count: usize,
    /// IDs present on primary but absent on standby, sorted.
    pub missing_in_standby: Vec<String>,
    /// IDs present on standby but absent on primary, sorted.
    pub missing_in_primary: Vec<String>,
}

impl IntegrityReport {
    /// True when both sides hold exactly the same IDs.
    pub fn is_clean(&self) -> bool {
        self.missing_in_standby.is_empty() && self.missing_in_primary.is_empty()
    }
}

/// UID-set comparison for the two directories.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthIntegrityReport {
    pub primary_count: usize,
    pub standby_count: usize,
    pub missing_in_standby: Vec<String>,
    pub missing_in_primary: Vec<String>,
}

impl AuthIntegrityReport {
    /// True when both directories hold exactly the same UIDs.
    pub fn is_clean(&self) -> bool {
        self.missing_in_standby.is_empty() && self.missing_in_primary.is_empty()
    }
}

fn set_difference(a: &BTreeSet<String>, b: &BTreeSet<String>) -> Vec<String> {
    a.difference(b).cloned().collect()
}

/// Report-only integrity pass over collections and directories.
pub struct Reconciler {
    gateways: Arc<Gateways>,
    bus: EventBus,
}

impl Reconciler {
    pub fn new(gateways: Arc<Gateways>, bus: EventBus) -> Self {
        Self { gateways, bus }
    }

    /// Compare one collection's ID sets and emit the report.
    #[instrument(skip(self))]
    pub async fn reconcile_collection(&self, collection: &str) -> Result<IntegrityReport> {
        let primary_ids = self.collection_ids(Side::Primary, collection).await?;
        let standby_ids = self.collection_ids(Side::Standby, collection).await?;

        let report = IntegrityReport {
            collection: collection.to_string(),
            primary_count: primary_ids.len(),
            standby_count: standby_ids.len(),
            missing_in_standby: set_difference(&primary_ids, &standby_ids),
            missing_in_primary: set_difference(&standby_ids, &primary_ids),
        };

        metrics::record_reconcile(
            collection,
            report.missing_in_standby.len(),
            report.missing_in_primary.len(),
        );

        if report.is_clean() {
            info!(collection, count = report.primary_count, "Integrity check clean");
        } else {
            warn!(
                collection,
                missing_in_standby = report.missing_in_standby.len(),
                missing_in_primary = report.missing_in_primary.len(),
                "Integrity drift detected"
            );
        }

        self.bus.publish(Event::IntegrityReport(report.clone()));
        Ok(report)
    }

    /// Compare every named collection; a collection that cannot be read
    /// is skipped with a warning rather than failing the pass.
    pub async fn reconcile_collections(&self, collections: &[String]) -> Vec<IntegrityReport> {
        let mut reports = Vec::with_capacity(collections.len());
        for collection in collections {
            match self.reconcile_collection(collection).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    warn!(collection = %collection, error = %e, "Integrity check failed");
                    metrics::record_error("reconcile", "collection");
                }
            }
        }
        reports
    }

    /// Compare the two directories' UID sets and emit the report.
    #[instrument(skip(self))]
    pub async fn reconcile_auth(&self) -> Result<AuthIntegrityReport> {
        let primary_uids = self.directory_uids(Side::Primary).await?;
        let standby_uids = self.directory_uids(Side::Standby).await?;

        let report = AuthIntegrityReport {
            primary_count: primary_uids.len(),
            standby_count: standby_uids.len(),
            missing_in_standby: set_difference(&primary_uids, &standby_uids),
            missing_in_primary: set_difference(&standby_uids, &primary_uids),
        };

        metrics::record_reconcile(
            "auth-directory",
            report.missing_in_standby.len(),
            report.missing_in_primary.len(),
        );

        if !report.is_clean() {
            warn!(
                missing_in_standby = report.missing_in_standby.len(),
                missing_in_primary = report.missing_in_primary.len(),
                "Directory integrity drift detected"
            );
        }

        self.bus.publish(Event::AuthIntegrityReport(report.clone()));
        Ok(report)
    }

    async fn collection_ids(&self, side: Side, collection: &str) -> Result<BTreeSet<String>> {
        let docs = self.gateways.scan_since(side, collection, None).await?;
        Ok(docs.into_iter().map(|doc| doc.id).collect())
    }

    async fn directory_uids(&self, side: Side) -> Result<BTreeSet<String>> {
        let mut uids = BTreeSet::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self.gateways.list_users(side, page_token.as_deref()).await?;
            uids.extend(page.users.into_iter().map(|user| user.uid));
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(uids)
    }
}
