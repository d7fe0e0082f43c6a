//! Authentication-directory replication.
//!
//! The directory's list API cannot filter by time, so both modes export
//! the full user list page by page. Full mode imports every page;
//! incremental mode filters client-side to users created or signed in
//! after the stored auth watermark. Either way the import is an upsert
//! by UID with the source directory's password-hash parameters attached,
//! followed by custom-claims propagation for the submitted users.
//!
//! Individual import failures are logged with their reason and counted;
//! they never fail the batch. A failed page import counts the whole
//! page as errors and moves on.

use crate::events::{Event, EventBus};
use crate::gateway::{Direction, Gateways};
use crate::metrics;
use crate::user::{PasswordHashParams, UserRecord};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Whether to import every user or only those changed since the watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Full,
    Incremental,
}

/// How a directory pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthStatus {
    Completed,
    /// The source directory became unreadable; nothing was imported.
    Paused,
    Failed,
}

/// Accounting for one directory pass.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthOutcome {
    pub status: AuthStatus,
    /// Users seen on the source directory.
    pub total_users: u64,
    /// Users successfully imported.
    pub synced_users: u64,
    /// Custom-claims propagations performed.
    pub claims_propagated: u64,
    /// Failed imports and claim propagations.
    pub errors: u64,
}

impl AuthOutcome {
    fn empty(status: AuthStatus) -> Self {
        Self {
            status,
            total_users: 0,
            synced_users: 0,
            claims_propagated: 0,
            errors: 0,
        }
    }
}

/// Replicates one directory into the other.
pub struct AuthReplicator {
    gateways: Arc<Gateways>,
    bus: EventBus,
    hash_params: PasswordHashParams,
}

impl AuthReplicator {
    pub fn new(gateways: Arc<Gateways>, bus: EventBus, hash_params: PasswordHashParams) -> Self {
        Self {
            gateways,
            bus,
            hash_params,
        }
    }

    /// Run one directory pass in the given direction.
    ///
    /// `since` seeds the incremental filter and is ignored in full mode;
    /// an incremental pass without a watermark degrades to full.
    #[instrument(skip(self, since), fields(since = since.unwrap_or("-")))]
    pub async fn replicate(
        &self,
        direction: Direction,
        mode: AuthMode,
        since: Option<&str>,
    ) -> AuthOutcome {
        let source = direction.source();
        let target = direction.target();
        let since = match (mode, since) {
            (AuthMode::Incremental, Some(since)) => Some(since.to_string()),
            _ => None,
        };

        let mut outcome = AuthOutcome::empty(AuthStatus::Completed);
        // Users submitted for import that carry claims; propagated after
        // the import loop finishes.
        let mut claim_candidates: Vec<(String, Value)> = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = match self.gateways.list_users(source, page_token.as_deref()).await {
                Ok(page) => page,
                Err(e) => {
                    if e.is_retryable() && outcome.total_users == 0 {
                        warn!(%direction, error = %e, "Source directory unreadable, pausing pass");
                        return AuthOutcome::empty(AuthStatus::Paused);
                    }
                    warn!(%direction, error = %e, "User listing failed mid-export");
                    outcome.errors += 1;
                    outcome.status = AuthStatus::Failed;
                    metrics::record_error("auth", "list_users");
                    break;
                }
            };

            outcome.total_users += page.users.len() as u64;
            metrics::record_auth_export_page(page.users.len());
            self.bus.publish(Event::AuthProgress {
                phase: "export".to_string(),
                user_count: outcome.total_users,
                of_total: outcome.total_users,
            });

            let chunk: Vec<UserRecord> = match &since {
                Some(since) => page
                    .users
                    .into_iter()
                    .filter(|user| user.changed_since(since))
                    .collect(),
                None => page.users,
            };

            if !chunk.is_empty() {
                for user in &chunk {
                    if user.has_custom_claims() {
                        claim_candidates.push((
                            user.uid.clone(),
                            Value::Object(user.custom_claims.clone()),
                        ));
                    }
                }

                let submitted = chunk.len();
                match self
                    .gateways
                    .import_users(target, chunk, &self.hash_params)
                    .await
                {
                    Ok(result) => {
                        outcome.synced_users += result.success_count as u64;
                        outcome.errors += result.failure_count as u64;
                        metrics::record_auth_import(result.success_count, result.failure_count);
                        for error in &result.errors {
                            warn!(
                                %direction,
                                index = error.index,
                                reason = %error.reason,
                                "User import rejected a record"
                            );
                        }
                    }
                    Err(e) => {
                        // A failed batch counts every submitted record
                        outcome.errors += submitted as u64;
                        metrics::record_auth_import(0, submitted);
                        warn!(%direction, users = submitted, error = %e, "User import batch failed");
                    }
                }

                self.bus.publish(Event::AuthProgress {
                    phase: "import".to_string(),
                    user_count: outcome.synced_users,
                    of_total: outcome.total_users,
                });
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(
            %direction,
            candidates = claim_candidates.len(),
            "Propagating custom claims"
        );
        for (uid, claims) in claim_candidates {
            match self.gateways.set_custom_claims(target, &uid, claims).await {
                Ok(()) => outcome.claims_propagated += 1,
                Err(e) => {
                    outcome.errors += 1;
                    warn!(%direction, uid = %uid, error = %e, "Claims propagation failed");
                    metrics::record_error("auth", "set_custom_claims");
                }
            }
        }
        metrics::record_claims_propagated(outcome.claims_propagated as usize);

        if outcome.errors > 0 && outcome.status == AuthStatus::Completed {
            outcome.status = AuthStatus::Failed;
        }

        self.bus.publish(Event::AuthCompleted {
            total_users: outcome.total_users,
            synced_users: outcome.synced_users,
            custom_claims_propagated: outcome.claims_propagated,
            errors: outcome.errors,
            timestamp: chrono::Utc::now().to_rfc3339(),
        });

        info!(
            %direction,
            ?mode,
            total = outcome.total_users,
            synced = outcome.synced_users,
            claims = outcome.claims_propagated,
            errors = outcome.errors,
            "Directory pass finished"
        );

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::memory::{MemoryDirectory, MemoryStore};
    use crate::user::UserMetadata;
    use serde_json::json;

    struct Fixture {
        replicator: AuthReplicator,
        primary: Arc<MemoryDirectory>,
        standby: Arc<MemoryDirectory>,
        bus: EventBus,
    }

    fn fixture() -> Fixture {
        let primary = Arc::new(MemoryDirectory::new("primary-auth"));
        let standby = Arc::new(MemoryDirectory::new("standby-auth"));
        let gateways = Arc::new(Gateways::new(
            Arc::new(MemoryStore::new("primary-db")),
            Arc::new(MemoryStore::new("standby-db")),
            Arc::clone(&primary) as _,
            Arc::clone(&standby) as _,
            &GatewayConfig {
                max_retry_attempts: 1,
                ..Default::default()
            },
        ));
        let bus = EventBus::default();
        let replicator = AuthReplicator::new(gateways, bus.clone(), PasswordHashParams::default());

        Fixture {
            replicator,
            primary,
            standby,
            bus,
        }
    }

    fn user(uid: &str, created: &str) -> UserRecord {
        let mut user = UserRecord::with_uid(uid);
        user.metadata = UserMetadata {
            creation_time: Some(created.to_string()),
            last_sign_in_time: None,
        };
        user
    }

    #[tokio::test]
    async fn test_full_pass_copies_everyone() {
        let f = fixture();
        for i in 0..5 {
            f.primary
                .insert_user(user(&format!("u{}", i), "2024-01-01T00:00:00Z"))
                .await;
        }

        let outcome = f
            .replicator
            .replicate(Direction::Forward, AuthMode::Full, None)
            .await;

        assert_eq!(outcome.status, AuthStatus::Completed);
        assert_eq!(outcome.total_users, 5);
        assert_eq!(outcome.synced_users, 5);
        assert_eq!(outcome.errors, 0);
        assert_eq!(f.standby.len().await, 5);
    }

    #[tokio::test]
    async fn test_full_pass_preserves_hashes_and_metadata() {
        let f = fixture();
        let mut record = user("u1", "2024-01-01T00:00:00Z");
        record.email = Some("u1@example.com".to_string());
        record.password_hash = Some("opaque-hash".to_string());
        record.password_salt = Some("opaque-salt".to_string());
        record.metadata.last_sign_in_time = Some("2024-02-01T00:00:00Z".to_string());
        f.primary.insert_user(record.clone()).await;

        f.replicator
            .replicate(Direction::Forward, AuthMode::Full, None)
            .await;

        let imported = f.standby.user("u1").await.unwrap();
        assert_eq!(imported, record);
    }

    #[tokio::test]
    async fn test_pagination_across_pages() {
        let f = fixture();
        f.primary.set_page_size(2);
        for i in 0..5 {
            f.primary
                .insert_user(user(&format!("u{}", i), "2024-01-01T00:00:00Z"))
                .await;
        }

        let outcome = f
            .replicator
            .replicate(Direction::Forward, AuthMode::Full, None)
            .await;

        assert_eq!(outcome.total_users, 5);
        assert_eq!(outcome.synced_users, 5);
        assert_eq!(f.standby.len().await, 5);
    }

    #[tokio::test]
    async fn test_incremental_filters_by_watermark() {
        let f = fixture();
        f.primary.insert_user(user("old", "2024-01-01T00:00:00Z")).await;
        f.primary.insert_user(user("new", "2024-03-01T00:00:00Z")).await;
        let mut signed_in = user("active", "2023-01-01T00:00:00Z");
        signed_in.metadata.last_sign_in_time = Some("2024-03-02T00:00:00Z".to_string());
        f.primary.insert_user(signed_in).await;

        let outcome = f
            .replicator
            .replicate(
                Direction::Forward,
                AuthMode::Incremental,
                Some("2024-02-01T00:00:00Z"),
            )
            .await;

        // All three exported, only the changed two imported
        assert_eq!(outcome.total_users, 3);
        assert_eq!(outcome.synced_users, 2);
        assert!(f.standby.user("new").await.is_some());
        assert!(f.standby.user("active").await.is_some());
        assert!(f.standby.user("old").await.is_none());
    }

    #[tokio::test]
    async fn test_incremental_without_watermark_degrades_to_full() {
        let f = fixture();
        f.primary.insert_user(user("u1", "2020-01-01T00:00:00Z")).await;

        let outcome = f
            .replicator
            .replicate(Direction::Forward, AuthMode::Incremental, None)
            .await;

        assert_eq!(outcome.synced_users, 1);
    }

    #[tokio::test]
    async fn test_claims_propagated_after_import() {
        let f = fixture();
        let mut admin = user("admin", "2024-01-01T00:00:00Z");
        admin.custom_claims.insert("role".to_string(), json!("admin"));
        f.primary.insert_user(admin).await;
        f.primary.insert_user(user("plain", "2024-01-01T00:00:00Z")).await;

        let outcome = f
            .replicator
            .replicate(Direction::Forward, AuthMode::Full, None)
            .await;

        assert_eq!(outcome.claims_propagated, 1);
        assert_eq!(f.standby.claims_log().await, vec!["admin".to_string()]);
        assert_eq!(
            f.standby.user("admin").await.unwrap().custom_claims["role"],
            "admin"
        );
    }

    #[tokio::test]
    async fn test_per_record_rejection_counts_but_continues() {
        let f = fixture();
        f.primary.insert_user(user("good", "2024-01-01T00:00:00Z")).await;
        f.primary.insert_user(user("bad", "2024-01-01T00:00:00Z")).await;
        f.standby.reject_uid("bad").await;

        let outcome = f
            .replicator
            .replicate(Direction::Forward, AuthMode::Full, None)
            .await;

        assert_eq!(outcome.status, AuthStatus::Failed);
        assert_eq!(outcome.synced_users, 1);
        assert_eq!(outcome.errors, 1);
        assert!(f.standby.user("good").await.is_some());
    }

    #[tokio::test]
    async fn test_unreadable_source_pauses() {
        let f = fixture();
        f.primary.set_unavailable(true);

        let outcome = f
            .replicator
            .replicate(Direction::Forward, AuthMode::Full, None)
            .await;

        assert_eq!(outcome.status, AuthStatus::Paused);
        assert_eq!(outcome.errors, 0);
    }

    #[tokio::test]
    async fn test_unwritable_target_counts_page_as_errors() {
        let f = fixture();
        f.primary.insert_user(user("u1", "2024-01-01T00:00:00Z")).await;
        f.primary.insert_user(user("u2", "2024-01-01T00:00:00Z")).await;
        f.standby.set_unavailable(true);

        let outcome = f
            .replicator
            .replicate(Direction::Forward, AuthMode::Full, None)
            .await;

        assert_eq!(outcome.status, AuthStatus::Failed);
        assert_eq!(outcome.synced_users, 0);
        assert_eq!(outcome.errors, 2);
    }

    #[tokio::test]
    async fn test_recovery_direction_imports_into_primary() {
        let f = fixture();
        f.standby.insert_user(user("standby-only", "2024-03-01T00:00:00Z")).await;

        let outcome = f
            .replicator
            .replicate(
                Direction::Recover,
                AuthMode::Incremental,
                Some("2024-01-01T00:00:00Z"),
            )
            .await;

        assert_eq!(outcome.synced_users, 1);
        assert!(f.primary.user("standby-only").await.is_some());
    }

    #[tokio::test]
    async fn test_events_in_causal_order() {
        let f = fixture();
        f.primary.insert_user(user("u1", "2024-01-01T00:00:00Z")).await;
        let mut rx = f.bus.subscribe();

        f.replicator
            .replicate(Direction::Forward, AuthMode::Full, None)
            .await;

        assert!(matches!(
            rx.recv().await.unwrap(),
            Event::AuthProgress { ref phase, .. } if phase == "export"
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            Event::AuthProgress { ref phase, .. } if phase == "import"
        ));
        match rx.recv().await.unwrap() {
            Event::AuthCompleted {
                total_users,
                synced_users,
                errors,
                ..
            } => {
                assert_eq!(total_users, 1);
                assert_eq!(synced_users, 1);
                assert_eq!(errors, 0);
            }
            other => panic!("expected authCompleted, got {:?}", other),
        }
    }
}
