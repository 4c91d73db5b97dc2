//! Fetch-related metrics for tracking upstream calendar requests
//!
//! Durations are stored in microseconds; reporting helpers convert to ms.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::observability::{MetricsError, MetricsResult};

/// Metrics for source fetches
#[derive(Debug, Default)]
pub struct FetchMetrics {
    /// Total time spent in successful fetches in microseconds
    pub total_fetch_time_micros: AtomicU64,
    /// Last successful fetch time in microseconds
    pub last_fetch_time_micros: AtomicU64,
    /// Number of successful fetches
    pub fetch_count: AtomicU64,
    /// Fetches answered with "not modified"
    pub not_modified: AtomicU64,
    /// Upstream entries dropped as malformed
    pub skipped_entries: AtomicU64,
    /// Fetches that returned an error
    pub errors: AtomicU64,
}

/// Point-in-time copy of [`FetchMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FetchMetricsSnapshot {
    pub fetch_count: u64,
    pub not_modified: u64,
    pub skipped_entries: u64,
    pub errors: u64,
    pub avg_fetch_ms: f64,
    pub last_fetch_ms: u64,
}

impl FetchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful fetch
    pub fn record_fetch(
        &self,
        duration: Duration,
        not_modified: bool,
        skipped: usize,
    ) -> MetricsResult<()> {
        let micros = u64::try_from(duration.as_micros())
            .map_err(|_| MetricsError::Overflow { metric: "fetch_duration" })?;

        // SeqCst for consistency with avg_fetch_ms
        self.total_fetch_time_micros.fetch_add(micros, Ordering::SeqCst);
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        self.last_fetch_time_micros.store(micros, Ordering::Relaxed);

        if not_modified {
            self.not_modified.fetch_add(1, Ordering::Relaxed);
        }
        self.skipped_entries.fetch_add(skipped as u64, Ordering::Relaxed);
        Ok(())
    }

    pub fn record_error(&self) -> MetricsResult<()> {
        self.errors.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Average successful fetch time in milliseconds
    pub fn avg_fetch_ms(&self) -> MetricsResult<f64> {
        let total = self.total_fetch_time_micros.load(Ordering::SeqCst);
        let count = self.fetch_count.load(Ordering::SeqCst);
        if count == 0 {
            return Err(MetricsError::EmptyData { metric: "average" });
        }

        #[allow(clippy::cast_precision_loss)]
        Ok((total as f64 / count as f64) / 1_000.0)
    }

    pub fn snapshot(&self) -> FetchMetricsSnapshot {
        FetchMetricsSnapshot {
            fetch_count: self.fetch_count.load(Ordering::SeqCst),
            not_modified: self.not_modified.load(Ordering::Relaxed),
            skipped_entries: self.skipped_entries.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            avg_fetch_ms: self.avg_fetch_ms().unwrap_or(0.0),
            last_fetch_ms: self.last_fetch_time_micros.load(Ordering::Relaxed) / 1_000,
        }
    }
}
