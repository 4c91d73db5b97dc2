//! Scheduler error types

use homeboard_domain::{HomeboardError, SourceKind};
use thiserror::Error;

use crate::errors::InfraError;

/// Scheduler-specific errors
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// No fetcher is registered for the source's kind
    #[error("No fetcher registered for source kind '{kind}'")]
    NoFetcher { kind: SourceKind },

    /// Operation timed out
    #[error("Operation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Task join failed
    #[error("Task join failed: {0}")]
    TaskJoinFailed(String),
}

impl From<SchedulerError> for InfraError {
    fn from(err: SchedulerError) -> Self {
        let homeboard_err = match err {
            SchedulerError::NoFetcher { .. } => HomeboardError::InvalidInput(err.to_string()),
            SchedulerError::Timeout { .. } | SchedulerError::TaskJoinFailed(_) => {
                HomeboardError::Internal(err.to_string())
            }
        };
        InfraError(homeboard_err)
    }
}

impl From<SchedulerError> for HomeboardError {
    fn from(err: SchedulerError) -> Self {
        InfraError::from(err).into()
    }
}

/// Convenience type alias for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;
