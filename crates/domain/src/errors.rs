//! Error types used throughout the engine

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::impl_domain_status_conversions;

/// Main error type for Homeboard
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum HomeboardError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Homeboard operations
pub type Result<T> = std::result::Result<T, HomeboardError>;

/// Failure of a sync cycle or a sync request
///
/// Variants follow the operator-facing taxonomy: credential problems are
/// surfaced rather than retried, fetch problems are retried on the next tick,
/// store problems abort the cycle without rollback.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Missing or expired access to the source
    #[error("credential unavailable for source {source_id}: {message}")]
    Credential { source_id: String, message: String },

    /// Network or parse failure talking to the source
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// Persistence failure while applying the cycle
    #[error("store failure: {0}")]
    Store(String),

    /// A cycle for this source is already running
    #[error("sync already in progress for source {0}")]
    Busy(String),

    /// The request arrived inside the minimum interval between cycles
    #[error("sync for source {source_id} requested too soon; retry in {retry_after:?}")]
    Limiter { source_id: String, retry_after: Duration },

    /// No source with this identifier exists
    #[error("source not found: {0}")]
    NotFound(String),

    /// A bounded suspension point expired
    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },

    /// The source was unregistered while the request waited
    #[error("source {0} was unregistered")]
    Cancelled(String),
}

/// Serialisable classification of a [`SyncError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncErrorKind {
    Credential,
    Fetch,
    Store,
    Busy,
    Limiter,
    NotFound,
    Timeout,
    Cancelled,
}

impl_domain_status_conversions!(SyncErrorKind {
    Credential => "credential",
    Fetch => "fetch",
    Store => "store",
    Busy => "busy",
    Limiter => "limiter",
    NotFound => "not_found",
    Timeout => "timeout",
    Cancelled => "cancelled",
});

impl SyncError {
    /// Classification used in result records and API bodies
    pub fn kind(&self) -> SyncErrorKind {
        match self {
            Self::Credential { .. } => SyncErrorKind::Credential,
            Self::Fetch(_) => SyncErrorKind::Fetch,
            Self::Store(_) => SyncErrorKind::Store,
            Self::Busy(_) => SyncErrorKind::Busy,
            Self::Limiter { .. } => SyncErrorKind::Limiter,
            Self::NotFound(_) => SyncErrorKind::NotFound,
            Self::Timeout { .. } => SyncErrorKind::Timeout,
            Self::Cancelled(_) => SyncErrorKind::Cancelled,
        }
    }

    /// True for failures that happened inside a cycle and must be recorded
    /// on the source's error bookkeeping.
    pub fn counts_against_source(&self) -> bool {
        matches!(
            self,
            Self::Credential { .. } | Self::Fetch(_) | Self::Store(_) | Self::Timeout { .. }
        )
    }

    /// Wrap a domain error raised by a fetcher
    pub fn fetch(err: impl std::fmt::Display) -> Self {
        Self::Fetch(err.to_string())
    }

    /// Wrap a domain error raised by the store
    pub fn store(err: impl std::fmt::Display) -> Self {
        Self::Store(err.to_string())
    }
}
