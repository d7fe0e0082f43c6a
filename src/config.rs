//! Configuration for the replication engine.
//!
//! Configuration is passed to [`Coordinator::new()`](crate::Coordinator::new)
//! and can be constructed programmatically, deserialized from JSON, or read
//! from the environment with [`ReplicationConfig::from_env()`].
//!
//! # Quick Start
//!
//! ```rust
//! use standby_replicator::config::ReplicationConfig;
//!
//! let config = ReplicationConfig {
//!     run_interval_minutes: 5,
//!     ..Default::default()
//! };
//! ```
//!
//! # Recognized environment variables
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `PORT` | 3001 | HTTP listener port for the control adapter |
//! | `RUN_INTERVAL_MINUTES` | 10 | cadence hint for the external scheduler |
//! | `HEALTH_PROBE_INTERVAL_SECONDS` | 10 | health probe cadence |
//! | `BATCH_SIZE` | 100 | read-chunk size for replication scans |
//! | `MAX_RETRY_ATTEMPTS` | 3 | gateway retry cap for transient errors |
//! | `STATS_PATH` | `stats.json` | persisted watermark/counter file |
//!
//! Backend credentials (`PRIMARY_*` / `STANDBY_*`) are consumed by the
//! out-of-process credential loader that constructs the backend handles;
//! they never reach this config.

use crate::resilience::RetryConfig;
use crate::user::PasswordHashParams;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config: passed to Coordinator::new()
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `Coordinator::new()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// HTTP listener port for the control adapter (informational to the
    /// engine; the adapter reads it from here).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Cadence hint for the external scheduler, echoed in the
    /// `autoRunTriggered` event.
    #[serde(default = "default_run_interval_minutes")]
    pub run_interval_minutes: u64,

    /// Health probing cadence and deadlines.
    #[serde(default)]
    pub health: HealthConfig,

    /// Document replication tunables.
    #[serde(default)]
    pub replication: ReplicationSettings,

    /// Auth directory replication settings.
    #[serde(default)]
    pub auth: AuthSettings,

    /// Gateway retry and per-call deadline settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Path of the persisted watermark/counter file.
    #[serde(default = "default_stats_path")]
    pub stats_path: String,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            run_interval_minutes: 10,
            health: HealthConfig::default(),
            replication: ReplicationSettings::default(),
            auth: AuthSettings::default(),
            gateway: GatewayConfig::default(),
            stats_path: "stats.json".to_string(),
        }
    }
}

impl ReplicationConfig {
    /// Build a config from the recognized environment variables,
    /// falling back to defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.port = env_parse("PORT", config.port);
        config.run_interval_minutes =
            env_parse("RUN_INTERVAL_MINUTES", config.run_interval_minutes);
        config.health.probe_interval_secs = env_parse(
            "HEALTH_PROBE_INTERVAL_SECONDS",
            config.health.probe_interval_secs,
        );
        config.replication.read_chunk_size =
            env_parse("BATCH_SIZE", config.replication.read_chunk_size);
        config.gateway.max_retry_attempts =
            env_parse("MAX_RETRY_ATTEMPTS", config.gateway.max_retry_attempts);
        if let Ok(path) = std::env::var("STATS_PATH") {
            if !path.is_empty() {
                config.stats_path = path;
            }
        }
        config
    }

    /// Create a minimal config for testing (tiny delays, temp-friendly).
    pub fn for_testing(stats_path: impl Into<String>) -> Self {
        Self {
            stats_path: stats_path.into(),
            gateway: GatewayConfig {
                max_retry_attempts: 1,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(fallback)
}

fn default_port() -> u16 {
    3001
}

fn default_run_interval_minutes() -> u64 {
    10
}

fn default_stats_path() -> String {
    "stats.json".to_string()
}

// ═══════════════════════════════════════════════════════════════════════════════
// HealthConfig: probe cadence and deadline
// ═══════════════════════════════════════════════════════════════════════════════

/// Health probing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// How often the background loop refreshes the snapshot (seconds).
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    /// Per-probe deadline as a duration string (e.g., "5s").
    /// A probe that misses the deadline counts as unhealthy.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout: String,
}

fn default_probe_interval_secs() -> u64 {
    10
}

fn default_probe_timeout() -> String {
    "5s".to_string()
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: 10,
            probe_timeout: "5s".to_string(),
        }
    }
}

impl HealthConfig {
    /// Probe interval as a Duration.
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    /// Parse the probe_timeout string to a Duration.
    pub fn probe_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.probe_timeout).unwrap_or(Duration::from_secs(5))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ReplicationSettings: document replication tunables
// ═══════════════════════════════════════════════════════════════════════════════

/// Document replication tunables.
///
/// The batch-write cap is deliberately not here: it is fixed at
/// [`MAX_BATCH_WRITE_OPS`](crate::gateway::MAX_BATCH_WRITE_OPS), a safe
/// bound below the backend's per-commit operation limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationSettings {
    /// Documents fetched per duplicate-check chunk.
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,

    /// Documents sampled per collection for schema tracking.
    #[serde(default = "default_schema_sample_size")]
    pub schema_sample_size: usize,

    /// Run an implicit integrity pass every N forward runs.
    #[serde(default = "default_reconcile_every_runs")]
    pub reconcile_every_runs: u64,
}

fn default_read_chunk_size() -> usize {
    100
}

fn default_schema_sample_size() -> usize {
    5
}

fn default_reconcile_every_runs() -> u64 {
    10
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            read_chunk_size: 100,
            schema_sample_size: 5,
            reconcile_every_runs: 10,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// AuthSettings: directory replication
// ═══════════════════════════════════════════════════════════════════════════════

/// Auth directory replication settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthSettings {
    /// Hash parameters of the primary directory, forwarded on import.
    #[serde(default)]
    pub hash_params: PasswordHashParams,
}

// ═══════════════════════════════════════════════════════════════════════════════
// GatewayConfig: retries and per-call deadlines
// ═══════════════════════════════════════════════════════════════════════════════

/// Gateway retry and deadline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Retry cap for transient errors.
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: usize,

    /// Deadline for reads (scans, multi-gets, listings).
    #[serde(default = "default_read_deadline")]
    pub read_deadline: String,

    /// Deadline for batch writes.
    #[serde(default = "default_write_deadline")]
    pub write_deadline: String,

    /// Deadline for bulk user imports.
    #[serde(default = "default_import_deadline")]
    pub import_deadline: String,
}

fn default_max_retry_attempts() -> usize {
    3
}

fn default_read_deadline() -> String {
    "30s".to_string()
}

fn default_write_deadline() -> String {
    "60s".to_string()
}

fn default_import_deadline() -> String {
    "120s".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            read_deadline: "30s".to_string(),
            write_deadline: "60s".to_string(),
            import_deadline: "120s".to_string(),
        }
    }
}

impl GatewayConfig {
    /// Build the retry config the gateway runs with.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::with_max_attempts(self.max_retry_attempts)
    }

    /// Parse the read deadline, defaulting to 30 s.
    pub fn read_deadline_duration(&self) -> Duration {
        humantime::parse_duration(&self.read_deadline).unwrap_or(Duration::from_secs(30))
    }

    /// Parse the batch-write deadline, defaulting to 60 s.
    pub fn write_deadline_duration(&self) -> Duration {
        humantime::parse_duration(&self.write_deadline).unwrap_or(Duration::from_secs(60))
    }

    /// Parse the user-import deadline, defaulting to 120 s.
    pub fn import_deadline_duration(&self) -> Duration {
        humantime::parse_duration(&self.import_deadline).unwrap_or(Duration::from_secs(120))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
