// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Backend capability traits and the gateway policy layer.
//!
//! Defines the interface the engine needs from each side's document
//! database and authentication directory, plus [`Gateways`], the
//! process-wide object that owns all four handles and applies the
//! outbound-call policy (per-call deadlines, retry with backoff for
//! transient errors, error classification metrics).
//!
//! # Example
//!
//! ```rust,no_run
//! use standby_replicator::gateway::{Gateways, Side};
//! use standby_replicator::memory::{MemoryDirectory, MemoryStore};
//! use standby_replicator::config::GatewayConfig;
//! use std::sync::Arc;
//!
//! # async fn example() -> standby_replicator::Result<()> {
//! let gateways = Gateways::new(
//!     Arc::new(MemoryStore::new("primary-db")),
//!     Arc::new(MemoryStore::new("standby-db")),
//!     Arc::new(MemoryDirectory::new("primary-auth")),
//!     Arc::new(MemoryDirectory::new("standby-auth")),
//!     &GatewayConfig::default(),
//! );
//!
//! let collections = gateways.list_collections(Side::Primary).await?;
//! # Ok(())
//! # }
//! ```
//!
//! Production backends implement [`DocumentStore`] and [`AuthDirectory`]
//! out of crate; the traits allow testing with the in-memory backends
//! and decouple the engine from any one vendor SDK.

use crate::document::Document;
use crate::error::{ReplicationError, Result};
use crate::resilience::{with_retry, RetryConfig};
use crate::user::{PasswordHashParams, UserImportResult, UserPage, UserRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on operations per batch write, safely below the backend's
/// 500-op commit limit. Callers with more pending writes must split.
pub const MAX_BATCH_WRITE_OPS: usize = 450;

/// Page size of directory user listings.
pub const USERS_PAGE_SIZE: usize = 1000;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Which of the two logically identical deployments a call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// The source of truth.
    Primary,
    /// The lagging replica.
    Standby,
}

impl Side {
    /// The other side.
    pub fn opposite(self) -> Side {
        match self {
            Side::Primary => Side::Standby,
            Side::Standby => Side::Primary,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Primary => write!(f, "primary"),
            Side::Standby => write!(f, "standby"),
        }
    }
}

/// Replication direction: which side is read and which is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Primary → standby (the normal path).
    Forward,
    /// Standby → primary (after the primary was restored).
    Recover,
}

impl Direction {
    /// The side documents are read from.
    pub fn source(self) -> Side {
        match self {
            Direction::Forward => Side::Primary,
            Direction::Recover => Side::Standby,
        }
    }

    /// The side documents are written to.
    pub fn target(self) -> Side {
        match self {
            Direction::Forward => Side::Standby,
            Direction::Recover => Side::Primary,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Forward => write!(f, "forward"),
            Direction::Recover => write!(f, "recover"),
        }
    }
}

/// Which endpoint kind a probe targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    Database,
    Directory,
}

/// What the engine needs from one side's document database.
///
/// Implementations clone borrowed arguments before moving into the
/// returned future; the future only borrows `self`.
pub trait DocumentStore: Send + Sync + 'static {
    /// List all top-level collection names.
    fn list_collections(&self) -> BoxFuture<'_, Vec<String>>;

    /// Scan a collection, optionally filtered server-side to documents
    /// whose timestamp is strictly greater than `since`. Order is
    /// arbitrary. Documents without a timestamp only appear in
    /// unfiltered scans.
    fn scan_since(&self, collection: &str, since: Option<&str>) -> BoxFuture<'_, Vec<Document>>;

    /// Fetch up to `limit` documents from a collection, order arbitrary.
    fn sample(&self, collection: &str, limit: usize) -> BoxFuture<'_, Vec<Document>>;

    /// Fetch documents by ID; absent IDs are simply missing from the map.
    fn multi_get(
        &self,
        collection: &str,
        ids: &[String],
    ) -> BoxFuture<'_, HashMap<String, Document>>;

    /// Atomically commit up to [`MAX_BATCH_WRITE_OPS`] writes. Semantics
    /// are merge-into-existing (partial update), not replace. Writes are
    /// idempotent at the document level.
    fn batch_write(&self, collection: &str, writes: Vec<(String, Value)>) -> BoxFuture<'_, ()>;

    /// A trivial read proving the endpoint answers.
    fn probe(&self) -> BoxFuture<'_, ()>;
}

/// What the engine needs from one side's authentication directory.
pub trait AuthDirectory: Send + Sync + 'static {
    /// List users, paginated. `page_token` of `None` starts from the
    /// beginning; the returned token is absent on the last page.
    fn list_users(&self, page_token: Option<&str>) -> BoxFuture<'_, UserPage>;

    /// Bulk upsert users by UID with the source directory's password-hash
    /// parameters preserved. Per-record failures are reported in the
    /// result, not as an `Err`.
    fn import_users(
        &self,
        users: Vec<UserRecord>,
        hash_params: &PasswordHashParams,
    ) -> BoxFuture<'_, UserImportResult>;

    /// Replace a user's custom claims.
    fn set_custom_claims(&self, uid: &str, claims: Value) -> BoxFuture<'_, ()>;

    /// Fetch a single user by UID.
    fn get_user(&self, uid: &str) -> BoxFuture<'_, Option<UserRecord>>;

    /// A trivial listing proving the endpoint answers.
    fn probe(&self) -> BoxFuture<'_, ()>;
}

/// Process-wide owner of the four backend handles.
///
/// Every method applies the outbound-call policy: a deadline per call
/// kind (reads 30 s, batch writes 60 s, imports 120 s by default) and
/// retry with exponential backoff for transient errors. Probes carry
/// their own caller-supplied deadline and are never retried — a slow
/// probe is the signal, not an error to paper over.
pub struct Gateways {
    primary_db: Arc<dyn DocumentStore>,
    standby_db: Arc<dyn DocumentStore>,
    primary_auth: Arc<dyn AuthDirectory>,
    standby_auth: Arc<dyn AuthDirectory>,
    retry: RetryConfig,
    read_deadline: Duration,
    write_deadline: Duration,
    import_deadline: Duration,
}

impl Gateways {
    /// Assemble the gateway from the four backend handles.
    pub fn new(
        primary_db: Arc<dyn DocumentStore>,
        standby_db: Arc<dyn DocumentStore>,
        primary_auth: Arc<dyn AuthDirectory>,
        standby_auth: Arc<dyn AuthDirectory>,
        config: &crate::config::GatewayConfig,
    ) -> Self {
        Self {
            primary_db,
            standby_db,
            primary_auth,
            standby_auth,
            retry: config.retry_config(),
            read_deadline: config.read_deadline_duration(),
            write_deadline: config.write_deadline_duration(),
            import_deadline: config.import_deadline_duration(),
        }
    }

    fn db(&self, side: Side) -> &Arc<dyn DocumentStore> {
        match side {
            Side::Primary => &self.primary_db,
            Side::Standby => &self.standby_db,
        }
    }

    fn auth(&self, side: Side) -> &Arc<dyn AuthDirectory> {
        match side {
            Side::Primary => &self.primary_auth,
            Side::Standby => &self.standby_auth,
        }
    }

    /// Apply a deadline to a backend future.
    async fn bounded<T>(
        operation: &str,
        deadline: Duration,
        fut: BoxFuture<'_, T>,
    ) -> Result<T> {
        match tokio::time::timeout(deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(ReplicationError::deadline(operation)),
        }
    }

    /// List all top-level collections on one side.
    pub async fn list_collections(&self, side: Side) -> Result<Vec<String>> {
        let store = self.db(side);
        with_retry("list_collections", &self.retry, || {
            Self::bounded("list_collections", self.read_deadline, store.list_collections())
        })
        .await
    }

    /// Scan a collection on one side, optionally filtered by timestamp.
    pub async fn scan_since(
        &self,
        side: Side,
        collection: &str,
        since: Option<&str>,
    ) -> Result<Vec<Document>> {
        let store = self.db(side);
        with_retry("scan_since", &self.retry, || {
            Self::bounded(
                "scan_since",
                self.read_deadline,
                store.scan_since(collection, since),
            )
        })
        .await
    }

    /// Fetch up to `limit` documents from a collection on one side.
    pub async fn sample(&self, side: Side, collection: &str, limit: usize) -> Result<Vec<Document>> {
        let store = self.db(side);
        with_retry("sample", &self.retry, || {
            Self::bounded("sample", self.read_deadline, store.sample(collection, limit))
        })
        .await
    }

    /// Fetch documents by ID from a collection on one side.
    pub async fn multi_get(
        &self,
        side: Side,
        collection: &str,
        ids: &[String],
    ) -> Result<HashMap<String, Document>> {
        let store = self.db(side);
        with_retry("multi_get", &self.retry, || {
            Self::bounded(
                "multi_get",
                self.read_deadline,
                store.multi_get(collection, ids),
            )
        })
        .await
    }

    /// Commit a write batch to a collection on one side.
    ///
    /// Rejects batches over [`MAX_BATCH_WRITE_OPS`]; the caller must split.
    pub async fn batch_write(
        &self,
        side: Side,
        collection: &str,
        writes: Vec<(String, Value)>,
    ) -> Result<()> {
        if writes.len() > MAX_BATCH_WRITE_OPS {
            return Err(ReplicationError::Invalid(format!(
                "batch of {} exceeds the {}-operation commit limit",
                writes.len(),
                MAX_BATCH_WRITE_OPS
            )));
        }

        let store = self.db(side);
        with_retry("batch_write", &self.retry, || {
            Self::bounded(
                "batch_write",
                self.write_deadline,
                store.batch_write(collection, writes.clone()),
            )
        })
        .await
    }

    /// List one page of users from one side's directory.
    pub async fn list_users(&self, side: Side, page_token: Option<&str>) -> Result<UserPage> {
        let directory = self.auth(side);
        with_retry("list_users", &self.retry, || {
            Self::bounded(
                "list_users",
                self.read_deadline,
                directory.list_users(page_token),
            )
        })
        .await
    }

    /// Bulk import users into one side's directory.
    pub async fn import_users(
        &self,
        side: Side,
        users: Vec<UserRecord>,
        hash_params: &PasswordHashParams,
    ) -> Result<UserImportResult> {
        let directory = self.auth(side);
        with_retry("import_users", &self.retry, || {
            Self::bounded(
                "import_users",
                self.import_deadline,
                directory.import_users(users.clone(), hash_params),
            )
        })
        .await
    }

    /// Replace a user's custom claims on one side's directory.
    pub async fn set_custom_claims(&self, side: Side, uid: &str, claims: Value) -> Result<()> {
        let directory = self.auth(side);
        with_retry("set_custom_claims", &self.retry, || {
            Self::bounded(
                "set_custom_claims",
                self.write_deadline,
                directory.set_custom_claims(uid, claims.clone()),
            )
        })
        .await
    }

    /// Fetch a single user from one side's directory.
    pub async fn get_user(&self, side: Side, uid: &str) -> Result<Option<UserRecord>> {
        let directory = self.auth(side);
        with_retry("get_user", &self.retry, || {
            Self::bounded("get_user", self.read_deadline, directory.get_user(uid))
        })
        .await
    }

    /// Probe one endpoint with the given deadline. No retries: a probe
    /// that misses its deadline counts as unhealthy.
    pub async fn probe(&self, side: Side, kind: ProbeKind, deadline: Duration) -> Result<()> {
        let fut = match kind {
            ProbeKind::Database => self.db(side).probe(),
            ProbeKind::Directory => self.auth(side).probe(),
        };
        Self::bounded("probe", deadline, fut).await
    }
}
