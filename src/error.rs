// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the replication engine.
//!
//! Errors are categorized by what the caller can do about them. The
//! gateway retries transient failures; everything else surfaces to the
//! coordinator, which decides whether the current collection, the auth
//! phase, or the whole run is affected.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Unavailable` | Yes | Endpoint unreachable, transport failure |
//! | `Throttled` | Yes | Rate/quota limit on the backend |
//! | `DeadlineExceeded` | Yes | Per-call deadline elapsed |
//! | `Invalid` | No | Argument or payload shape rejected |
//! | `Config` | No | Configuration invalid |
//! | `StatsFile` | No | Stats file I/O failure (operator attention) |
//! | `StatsEncoding` | No | Stats file JSON encode/decode failure |
//! | `InvalidState` | No | Engine state machine violation |
//! | `Internal` | No | Unexpected internal error |
//!
//! # Retry Behavior
//!
//! Use [`ReplicationError::is_retryable()`] to determine if an operation
//! should be retried with backoff. Retryable errors indicate transient
//! network or availability issues; non-retryable errors indicate bugs,
//! bad configuration, or rejected data.

use thiserror::Error;

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Errors that can occur during replication.
///
/// Each variant carries enough context to identify which of the four
/// endpoints (primary/standby database or directory) produced it.
/// Use [`is_retryable()`](Self::is_retryable) to check if the operation
/// should be retried.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// Endpoint unreachable or transport-level failure.
    ///
    /// Retryable with exponential backoff.
    #[error("endpoint unavailable ({endpoint}): {message}")]
    Unavailable { endpoint: String, message: String },

    /// Backend rejected the call due to rate or quota limits.
    ///
    /// Retryable; the backoff gives the quota window time to refill.
    #[error("throttled ({endpoint}): {message}")]
    Throttled { endpoint: String, message: String },

    /// A per-call deadline elapsed before the backend answered.
    ///
    /// Retryable; treated like an availability blip.
    #[error("deadline exceeded during {operation}")]
    DeadlineExceeded { operation: String },

    /// Argument or payload shape rejected by the backend.
    ///
    /// Not retryable; the same call will fail the same way.
    #[error("invalid argument: {0}")]
    Invalid(String),

    /// Invalid or missing configuration.
    ///
    /// Not retryable; fix the configuration and restart.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O failure while reading or writing the stats file.
    ///
    /// Not retryable; indicates local disk issues that need attention.
    #[error("stats file error: {0}")]
    StatsFile(#[from] std::io::Error),

    /// The stats file contents could not be encoded or decoded.
    ///
    /// Not retryable; the file is corrupt or from an incompatible version.
    #[error("stats encoding error: {0}")]
    StatsEncoding(#[from] serde_json::Error),

    /// Engine state machine violation.
    ///
    /// Occurs when an operation is attempted in the wrong state.
    /// Not retryable; indicates a bug in the caller.
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Unexpected internal error.
    ///
    /// Catch-all for errors that shouldn't happen.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ReplicationError {
    /// Create an `Unavailable` error for a named endpoint.
    pub fn unavailable(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create a `Throttled` error for a named endpoint.
    pub fn throttled(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Throttled {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create a `DeadlineExceeded` error for a named operation.
    pub fn deadline(operation: impl Into<String>) -> Self {
        Self::DeadlineExceeded {
            operation: operation.into(),
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable { .. } => true,
            Self::Throttled { .. } => true,
            Self::DeadlineExceeded { .. } => true,
            Self::Invalid(_) => false,
            Self::Config(_) => false,
            Self::StatsFile(_) => false,
            Self::StatsEncoding(_) => false,
            Self::InvalidState { .. } => false,
            Self::Internal(_) => false,
        }
    }
}
