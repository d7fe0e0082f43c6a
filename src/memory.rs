// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process backends for standalone mode and tests.
//!
//! [`MemoryStore`] and [`MemoryDirectory`] implement the gateway traits
//! against plain maps, with scripted fault injection (unavailability,
//! failing N calls, probe delays) so outage and retry paths are testable
//! without a network. The store also keeps a commit log of batch sizes,
//! which tests use to assert batch-splitting behavior.

use crate::document::Document;
use crate::error::{ReplicationError, Result};
use crate::gateway::{AuthDirectory, BoxFuture, DocumentStore};
use crate::user::{PasswordHashParams, UserImportError, UserImportResult, UserPage, UserRecord};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// Merge `patch` into `base` the way the backend's partial update does:
/// nested objects merge recursively, everything else replaces.
fn merge_value(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                match base_map.get_mut(key) {
                    Some(existing) => merge_value(existing, patch_value),
                    None => {
                        base_map.insert(key.clone(), patch_value.clone());
                    }
                }
            }
        }
        (slot, patch) => *slot = patch.clone(),
    }
}

/// An in-memory document database.
pub struct MemoryStore {
    /// Endpoint label used in error messages.
    name: String,
    /// collection name → document ID → payload
    collections: RwLock<BTreeMap<String, BTreeMap<String, Value>>>,
    /// Sizes of committed write batches, in commit order.
    commit_log: RwLock<Vec<usize>>,
    unavailable: AtomicBool,
    fail_reads: AtomicUsize,
    fail_writes: AtomicUsize,
    probe_delay_ms: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store labeled with an endpoint name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collections: RwLock::new(BTreeMap::new()),
            commit_log: RwLock::new(Vec::new()),
            unavailable: AtomicBool::new(false),
            fail_reads: AtomicUsize::new(0),
            fail_writes: AtomicUsize::new(0),
            probe_delay_ms: AtomicU64::new(0),
        }
    }

    /// Seed a document directly (test setup; replaces, no merge).
    pub async fn insert(&self, collection: &str, id: &str, data: Value) {
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), data);
    }

    /// Read a document payload directly.
    pub async fn get(&self, collection: &str, id: &str) -> Option<Value> {
        self.collections
            .read()
            .await
            .get(collection)
            .and_then(|docs| docs.get(id).cloned())
    }

    /// Number of documents in a collection.
    pub async fn collection_len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }

    /// Document IDs of a collection, sorted.
    pub async fn collection_ids(&self, collection: &str) -> Vec<String> {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|docs| docs.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Sizes of committed write batches, in commit order.
    pub async fn commit_log(&self) -> Vec<usize> {
        self.commit_log.read().await.clone()
    }

    /// Make every call fail with `Unavailable` until cleared.
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    /// Fail the next `n` read calls with `Unavailable`.
    pub fn fail_next_reads(&self, n: usize) {
        self.fail_reads.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` write calls with `Unavailable`.
    pub fn fail_next_writes(&self, n: usize) {
        self.fail_writes.store(n, Ordering::SeqCst);
    }

    /// Delay probes by the given duration (to exercise probe deadlines).
    pub fn set_probe_delay(&self, delay: Duration) {
        self.probe_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ReplicationError::unavailable(&self.name, "endpoint is down"));
        }
        Ok(())
    }

    fn take_injected_failure(&self, counter: &AtomicUsize) -> Result<()> {
        let mut current = counter.load(Ordering::SeqCst);
        while current > 0 {
            match counter.compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => {
                    return Err(ReplicationError::unavailable(&self.name, "injected failure"))
                }
                Err(observed) => current = observed,
            }
        }
        Ok(())
    }

    fn check_read(&self) -> Result<()> {
        self.check_available()?;
        self.take_injected_failure(&self.fail_reads)
    }

    fn check_write(&self) -> Result<()> {
        self.check_available()?;
        self.take_injected_failure(&self.fail_writes)
    }
}

impl DocumentStore for MemoryStore {
    fn list_collections(&self) -> BoxFuture<'_, Vec<String>> {
        Box::pin(async move {
            self.check_read()?;
            Ok(self.collections.read().await.keys().cloned().collect())
        })
    }

    fn scan_since(&self, collection: &str, since: Option<&str>) -> BoxFuture<'_, Vec<Document>> {
        let collection = collection.to_string();
        let since = since.map(str::to_string);
        Box::pin(async move {
            self.check_read()?;
            let collections = self.collections.read().await;
            let docs = collections
                .get(&collection)
                .map(|docs| {
                    docs.iter()
                        .map(|(id, data)| Document::new(id.clone(), data.clone()))
                        .filter(|doc| match (&since, doc.updated_at()) {
                            (None, _) => true,
                            (Some(since), Some(ts)) => ts.as_str() > since.as_str(),
                            // Timestamp-less documents are invisible to
                            // filtered scans, matching the backend's
                            // server-side field filter.
                            (Some(_), None) => false,
                        })
                        .collect()
                })
                .unwrap_or_default();
            Ok(docs)
        })
    }

    fn sample(&self, collection: &str, limit: usize) -> BoxFuture<'_, Vec<Document>> {
        let collection = collection.to_string();
        Box::pin(async move {
            self.check_read()?;
            let collections = self.collections.read().await;
            let docs = collections
                .get(&collection)
                .map(|docs| {
                    docs.iter()
                        .take(limit)
                        .map(|(id, data)| Document::new(id.clone(), data.clone()))
                        .collect()
                })
                .unwrap_or_default();
            Ok(docs)
        })
    }

    fn multi_get(
        &self,
        collection: &str,
        ids: &[String],
    ) -> BoxFuture<'_, HashMap<String, Document>> {
        let collection = collection.to_string();
        let ids = ids.to_vec();
        Box::pin(async move {
            self.check_read()?;
            let collections = self.collections.read().await;
            let mut found = HashMap::new();
            if let Some(docs) = collections.get(&collection) {
                for id in ids {
                    if let Some(data) = docs.get(&id) {
                        found.insert(id.clone(), Document::new(id, data.clone()));
                    }
                }
            }
            Ok(found)
        })
    }

    fn batch_write(&self, collection: &str, writes: Vec<(String, Value)>) -> BoxFuture<'_, ()> {
        let collection = collection.to_string();
        Box::pin(async move {
            self.check_write()?;
            let mut collections = self.collections.write().await;
            let docs = collections.entry(collection).or_default();
            let ops = writes.len();
            for (id, patch) in writes {
                match docs.get_mut(&id) {
                    Some(existing) => merge_value(existing, &patch),
                    None => {
                        docs.insert(id, patch);
                    }
                }
            }
            drop(collections);
            self.commit_log.write().await.push(ops);
            Ok(())
        })
    }

    fn probe(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let delay = self.probe_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            self.check_available()
        })
    }
}

/// An in-memory authentication directory.
pub struct MemoryDirectory {
    name: String,
    /// uid → record, iterated in uid order for stable pagination
    users: RwLock<BTreeMap<String, UserRecord>>,
    /// UIDs that every import rejects (per-record failure injection).
    rejected_uids: RwLock<HashSet<String>>,
    /// UIDs whose claims were set, in call order.
    claims_log: RwLock<Vec<String>>,
    page_size: AtomicUsize,
    unavailable: AtomicBool,
    probe_delay_ms: AtomicU64,
}

impl MemoryDirectory {
    /// Create an empty directory labeled with an endpoint name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            users: RwLock::new(BTreeMap::new()),
            rejected_uids: RwLock::new(HashSet::new()),
            claims_log: RwLock::new(Vec::new()),
            page_size: AtomicUsize::new(crate::gateway::USERS_PAGE_SIZE),
            unavailable: AtomicBool::new(false),
            probe_delay_ms: AtomicU64::new(0),
        }
    }

    /// Seed a user directly (test setup).
    pub async fn insert_user(&self, user: UserRecord) {
        self.users.write().await.insert(user.uid.clone(), user);
    }

    /// Read a user directly.
    pub async fn user(&self, uid: &str) -> Option<UserRecord> {
        self.users.read().await.get(uid).cloned()
    }

    /// Number of users in the directory.
    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    /// Whether the directory is empty.
    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }

    /// All UIDs, sorted.
    pub async fn uids(&self) -> Vec<String> {
        self.users.read().await.keys().cloned().collect()
    }

    /// UIDs whose claims were set, in call order.
    pub async fn claims_log(&self) -> Vec<String> {
        self.claims_log.read().await.clone()
    }

    /// Shrink the listing page size (to exercise pagination in tests).
    pub fn set_page_size(&self, size: usize) {
        self.page_size.store(size.max(1), Ordering::SeqCst);
    }

    /// Make every import reject this UID with a per-record error.
    pub async fn reject_uid(&self, uid: &str) {
        self.rejected_uids.write().await.insert(uid.to_string());
    }

    /// Make every call fail with `Unavailable` until cleared.
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    /// Delay probes by the given duration.
    pub fn set_probe_delay(&self, delay: Duration) {
        self.probe_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ReplicationError::unavailable(&self.name, "endpoint is down"));
        }
        Ok(())
    }
}

impl AuthDirectory for MemoryDirectory {
    fn list_users(&self, page_token: Option<&str>) -> BoxFuture<'_, UserPage> {
        let page_token = page_token.map(str::to_string);
        Box::pin(async move {
            self.check_available()?;
            let offset = match page_token.as_deref() {
                None => 0,
                Some(token) => token
                    .parse::<usize>()
                    .map_err(|_| ReplicationError::Invalid(format!("bad page token: {token}")))?,
            };

            let users = self.users.read().await;
            let page_size = self.page_size.load(Ordering::SeqCst);
            let page: Vec<UserRecord> = users.values().skip(offset).take(page_size).cloned().collect();
            let next_offset = offset + page.len();
            let next_page_token = if next_offset < users.len() {
                Some(next_offset.to_string())
            } else {
                None
            };

            Ok(UserPage {
                users: page,
                next_page_token,
            })
        })
    }

    fn import_users(
        &self,
        users: Vec<UserRecord>,
        _hash_params: &PasswordHashParams,
    ) -> BoxFuture<'_, UserImportResult> {
        Box::pin(async move {
            self.check_available()?;
            let rejected = self.rejected_uids.read().await.clone();
            let mut result = UserImportResult::default();
            let mut directory = self.users.write().await;

            for (index, user) in users.into_iter().enumerate() {
                if rejected.contains(&user.uid) {
                    result.failure_count += 1;
                    result.errors.push(UserImportError {
                        index,
                        reason: format!("uid {} rejected", user.uid),
                    });
                    continue;
                }
                // Upsert by UID, hashes and provider links carried as-is
                directory.insert(user.uid.clone(), user);
                result.success_count += 1;
            }

            Ok(result)
        })
    }

    fn set_custom_claims(&self, uid: &str, claims: Value) -> BoxFuture<'_, ()> {
        let uid = uid.to_string();
        Box::pin(async move {
            self.check_available()?;
            let mut users = self.users.write().await;
            let user = users
                .get_mut(&uid)
                .ok_or_else(|| ReplicationError::Invalid(format!("unknown uid {uid}")))?;
            user.custom_claims = match claims {
                Value::Object(map) => map,
                Value::Null => serde_json::Map::new(),
                other => {
                    return Err(ReplicationError::Invalid(format!(
                        "claims must be an object, got {other}"
                    )))
                }
            };
            drop(users);
            self.claims_log.write().await.push(uid);
            Ok(())
        })
    }

    fn get_user(&self, uid: &str) -> BoxFuture<'_, Option<UserRecord>> {
        let uid = uid.to_string();
        Box::pin(async move {
            self.check_available()?;
            Ok(self.users.read().await.get(&uid).cloned())
        })
    }

    fn probe(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let delay = self.probe_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            self.check_available()
        })
    }
}
