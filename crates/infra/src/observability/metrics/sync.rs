//! Sync cycle metrics
//!
//! Counters are plain atomics; derived values (average duration) read the
//! total and the count with SeqCst so the pair is consistent.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use homeboard_domain::SyncErrorKind;
use serde::Serialize;

use crate::observability::{MetricsError, MetricsResult};

/// Metrics for sync cycles run by the orchestrator
#[derive(Debug, Default)]
pub struct SyncMetrics {
    /// Cycles that acquired the source lock
    pub cycles_started: AtomicU64,
    /// Cycles that committed their changes
    pub cycles_succeeded: AtomicU64,
    /// Cycles that ended in a credential, fetch or store failure
    pub cycles_failed: AtomicU64,
    /// Cycles abandoned by the cycle timeout
    pub cycles_timed_out: AtomicU64,
    /// Requests rejected because a cycle was already running
    pub busy_rejections: AtomicU64,
    /// Requests rejected by the minimum trigger interval
    pub limiter_rejections: AtomicU64,
    /// Total time spent in finished cycles in microseconds
    pub total_cycle_micros: AtomicU64,
    /// Duration of the most recently finished cycle in microseconds
    pub last_cycle_micros: AtomicU64,
}

/// Point-in-time copy of [`SyncMetrics`] for status reporting
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SyncMetricsSnapshot {
    pub cycles_started: u64,
    pub cycles_succeeded: u64,
    pub cycles_failed: u64,
    pub cycles_timed_out: u64,
    pub busy_rejections: u64,
    pub limiter_rejections: u64,
    pub avg_cycle_ms: f64,
    pub last_cycle_ms: u64,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_started(&self) -> MetricsResult<()> {
        self.cycles_started.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Record a finished cycle and its duration
    pub fn record_finished(&self, duration: Duration, succeeded: bool) -> MetricsResult<()> {
        let micros = u64::try_from(duration.as_micros())
            .map_err(|_| MetricsError::Overflow { metric: "cycle_duration" })?;

        self.total_cycle_micros.fetch_add(micros, Ordering::SeqCst);
        self.last_cycle_micros.store(micros, Ordering::Relaxed);
        if succeeded {
            self.cycles_succeeded.fetch_add(1, Ordering::SeqCst);
        } else {
            self.cycles_failed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    pub fn record_timeout(&self) -> MetricsResult<()> {
        self.cycles_timed_out.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Record a request that never started a cycle
    pub fn record_rejection(&self, kind: SyncErrorKind) -> MetricsResult<()> {
        match kind {
            SyncErrorKind::Busy => {
                self.busy_rejections.fetch_add(1, Ordering::Relaxed);
            }
            SyncErrorKind::Limiter => {
                self.limiter_rejections.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        Ok(())
    }

    /// Average duration of finished cycles in milliseconds
    pub fn avg_cycle_ms(&self) -> MetricsResult<f64> {
        let total = self.total_cycle_micros.load(Ordering::SeqCst);
        let count = self.cycles_succeeded.load(Ordering::SeqCst)
            + self.cycles_failed.load(Ordering::SeqCst);

        if count == 0 {
            return Err(MetricsError::EmptyData { metric: "average" });
        }

        #[allow(clippy::cast_precision_loss)]
        Ok((total as f64 / count as f64) / 1_000.0)
    }

    pub fn snapshot(&self) -> SyncMetricsSnapshot {
        SyncMetricsSnapshot {
            cycles_started: self.cycles_started.load(Ordering::Relaxed),
            cycles_succeeded: self.cycles_succeeded.load(Ordering::SeqCst),
            cycles_failed: self.cycles_failed.load(Ordering::SeqCst),
            cycles_timed_out: self.cycles_timed_out.load(Ordering::Relaxed),
            busy_rejections: self.busy_rejections.load(Ordering::Relaxed),
            limiter_rejections: self.limiter_rejections.load(Ordering::Relaxed),
            avg_cycle_ms: self.avg_cycle_ms().unwrap_or(0.0),
            last_cycle_ms: self.last_cycle_micros.load(Ordering::Relaxed) / 1_000,
        }
    }
}
