//! Sync cycle results and orchestrator requests

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{SyncError, SyncErrorKind};

/// Outcome of one fetch-diff-upsert cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCycleReport {
    pub source_id: String,
    /// Events returned by the fetcher
    pub fetched: usize,
    /// Events inserted under an unseen external id
    pub new: usize,
    /// Stored events whose content changed
    pub updated: usize,
    /// Stored events removed by this cycle
    pub deleted: usize,
    /// Events dropped by the fetcher as malformed
    pub skipped: usize,
    pub duration_ms: u64,
    pub cursor_advanced: bool,
    pub finished_at: DateTime<Utc>,
}

impl SyncCycleReport {
    /// Number of store writes (inserts plus updates)
    pub fn upserts(&self) -> usize {
        self.new + self.updated
    }

    /// True when the cycle mutated the store
    pub fn changed(&self) -> bool {
        self.new + self.updated + self.deleted > 0
    }
}

/// Classified failure attached to a per-source result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub kind: SyncErrorKind,
    pub message: String,
}

impl From<&SyncError> for SyncFailure {
    fn from(err: &SyncError) -> Self {
        Self { kind: err.kind(), message: err.to_string() }
    }
}

/// Per-source entry in a sync-all summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSyncResult {
    pub source_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<SyncCycleReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SyncFailure>,
}

impl SourceSyncResult {
    /// Build an entry from the result of one trigger
    pub fn from_outcome(
        source_id: impl Into<String>,
        outcome: &Result<SyncCycleReport, SyncError>,
    ) -> Self {
        match outcome {
            Ok(report) => Self { source_id: source_id.into(), report: Some(report.clone()), error: None },
            Err(err) => Self { source_id: source_id.into(), report: None, error: Some(err.into()) },
        }
    }

    /// True when the cycle completed
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregate result of an administrative sync-all
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncAllSummary {
    pub sources: usize,
    pub fetched: usize,
    pub upserts: usize,
    pub deleted: usize,
    pub errors: usize,
    pub duration_ms: u64,
    pub results: Vec<SourceSyncResult>,
}

impl SyncAllSummary {
    /// Fold per-source results into the aggregate counters
    pub fn from_results(results: Vec<SourceSyncResult>, duration_ms: u64) -> Self {
        let mut summary = Self { sources: results.len(), duration_ms, ..Self::default() };
        for result in &results {
            match (&result.report, &result.error) {
                (Some(report), _) => {
                    summary.fetched += report.fetched;
                    summary.upserts += report.upserts();
                    summary.deleted += report.deleted;
                }
                (None, Some(_)) => summary.errors += 1,
                (None, None) => {}
            }
        }
        summary.results = results;
        summary
    }
}

/// Options for an explicit sync request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerOptions {
    /// Bypass the minimum interval between cycles
    pub force: bool,
    /// Wait for an in-flight cycle instead of failing with `busy`
    pub wait: bool,
}

impl Default for TriggerOptions {
    fn default() -> Self {
        Self { force: false, wait: true }
    }
}

/// Introspection record for an installed schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSchedule {
    pub source_id: String,
    pub interval_secs: u64,
    pub registered_at: DateTime<Utc>,
    pub in_flight: bool,
}
