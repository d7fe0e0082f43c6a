//! Authentication-directory records.
//!
//! User records move through the engine opaquely: the export side hands
//! back everything the directory stores (including password hashes and
//! provider links), and the import side upserts them by UID with the
//! source directory's hash parameters attached. The engine never
//! inspects or re-hashes credentials.

use crate::document::normalize_or_raw;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One user in an authentication directory, keyed by UID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    /// Stable user ID, used as the upsert key on import.
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub metadata: UserMetadata,
    /// Custom claims map, propagated separately after import.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub custom_claims: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provider_data: Vec<ProviderData>,
    /// Opaque password hash, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_salt: Option<String>,
}

impl UserRecord {
    /// A minimal record with only the UID set.
    pub fn with_uid(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            email: None,
            email_verified: false,
            display_name: None,
            photo_url: None,
            phone_number: None,
            disabled: false,
            metadata: UserMetadata::default(),
            custom_claims: Map::new(),
            provider_data: Vec::new(),
            password_hash: None,
            password_salt: None,
        }
    }

    /// Whether this user carries claims worth propagating.
    pub fn has_custom_claims(&self) -> bool {
        !self.custom_claims.is_empty()
    }

    /// Whether the user was created or signed in after `since`.
    ///
    /// The directory's list API is not filterable by time, so incremental
    /// auth replication applies this check client-side. Timestamps are
    /// compared in normalized form.
    pub fn changed_since(&self, since: &str) -> bool {
        let since = normalize_or_raw(since);
        let after = |ts: &Option<String>| {
            ts.as_deref()
                .map(|t| normalize_or_raw(t) > since)
                .unwrap_or(false)
        };
        after(&self.metadata.creation_time) || after(&self.metadata.last_sign_in_time)
    }
}

/// Creation and last-sign-in timestamps (ISO-8601 strings).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sign_in_time: Option<String>,
}

/// One federated-provider link on a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderData {
    pub provider_id: String,
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
}

/// Password-hash parameters of the source directory.
///
/// Forwarded verbatim on every bulk import so imported users keep their
/// working credentials. All fields are opaque to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordHashParams {
    pub algorithm: String,
    pub rounds: u32,
    pub memory_cost: u32,
    pub signer_key: String,
    pub salt_separator: String,
}

impl Default for PasswordHashParams {
    fn default() -> Self {
        Self {
            algorithm: "SCRYPT".to_string(),
            rounds: 8,
            memory_cost: 14,
            signer_key: String::new(),
            salt_separator: String::new(),
        }
    }
}

/// One page of a paginated user listing.
#[derive(Debug, Clone, Default)]
pub struct UserPage {
    pub users: Vec<UserRecord>,
    /// Absent on the last page.
    pub next_page_token: Option<String>,
}

/// Outcome of one bulk import call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserImportResult {
    pub success_count: usize,
    pub failure_count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<UserImportError>,
}

/// One rejected record inside a bulk import.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserImportError {
    /// Index of the rejected record within the submitted chunk.
    pub index: usize,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user_with_times(uid: &str, created: Option<&str>, signed_in: Option<&str>) -> UserRecord {
        let mut user = UserRecord::with_uid(uid);
        user.metadata = UserMetadata {
            creation_time: created.map(String::from),
            last_sign_in_time: signed_in.map(String::from),
        };
        user
    }

    #[test]
    fn test_changed_since_by_creation() {
        let user = user_with_times("u1", Some("2024-03-01T00:00:00Z"), None);
        assert!(user.changed_since("2024-02-01T00:00:00Z"));
        assert!(!user.changed_since("2024-04-01T00:00:00Z"));
    }

    #[test]
    fn test_changed_since_by_sign_in() {
        let user = user_with_times(
            "u1",
            Some("2023-01-01T00:00:00Z"),
            Some("2024-03-01T00:00:00Z"),
        );
        assert!(user.changed_since("2024-02-01T00:00:00Z"));
    }

    #[test]
    fn test_changed_since_no_timestamps() {
        let user = UserRecord::with_uid("u1");
        assert!(!user.changed_since("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn test_changed_since_equal_is_not_changed() {
        let user = user_with_times("u1", Some("2024-01-01T00:00:00Z"), None);
        assert!(!user.changed_since("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn test_changed_since_mixed_offsets() {
        // Created at 01:00+01:00 == midnight UTC, so "since midnight" excludes it
        let user = user_with_times("u1", Some("2024-01-01T01:00:00+01:00"), None);
        assert!(!user.changed_since("2024-01-01T00:00:00Z"));
        assert!(user.changed_since("2023-12-31T23:59:59Z"));
    }

    #[test]
    fn test_has_custom_claims() {
        let mut user = UserRecord::with_uid("u1");
        assert!(!user.has_custom_claims());
        user.custom_claims
            .insert("role".to_string(), json!("admin"));
        assert!(user.has_custom_claims());
    }

    #[test]
    fn test_user_record_serde_camel_case() {
        let mut user = UserRecord::with_uid("u1");
        user.email = Some("x@example.com".to_string());
        user.email_verified = true;
        user.password_hash = Some("b64hash".to_string());

        let value = serde_json::to_value(&user).unwrap();
        assert_eq!(value["uid"], "u1");
        assert_eq!(value["emailVerified"], true);
        assert_eq!(value["passwordHash"], "b64hash");
        // Unset optionals are omitted entirely
        assert!(value.get("displayName").is_none());
    }

    #[test]
    fn test_user_record_roundtrip_preserves_everything() {
        let mut user = UserRecord::with_uid("u2");
        user.phone_number = Some("+15550001111".to_string());
        user.disabled = true;
        user.custom_claims.insert("tier".to_string(), json!(3));
        user.provider_data.push(ProviderData {
            provider_id: "password".to_string(),
            uid: "u2".to_string(),
            email: Some("u2@example.com".to_string()),
            display_name: None,
            photo_url: None,
        });
        user.password_hash = Some("hash".to_string());
        user.password_salt = Some("salt".to_string());

        let encoded = serde_json::to_string(&user).unwrap();
        let decoded: UserRecord = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, user);
    }

    #[test]
    fn test_hash_params_default() {
        let params = PasswordHashParams::default();
        assert_eq!(params.algorithm, "SCRYPT");
        assert_eq!(params.rounds, 8);
        assert_eq!(params.memory_cost, 14);
    }

    #[test]
    fn test_import_result_default() {
        let result = UserImportResult::default();
        assert_eq!(result.success_count, 0);
        assert_eq!(result.failure_count, 0);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_import_error_serializes_index_and_reason() {
        let err = UserImportError {
            index: 7,
            reason: "malformed email".to_string(),
        };
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["index"], 7);
        assert_eq!(value["reason"], "malformed email");
    }
}
