//! Observability infrastructure for sync metrics
//!
//! Record methods return `MetricsResult<()>` so callers can log and drop a
//! failed recording without interrupting a sync cycle.
//!
//! ```rust
//! use homeboard_infra::observability::metrics::SyncMetrics;
//!
//! let metrics = SyncMetrics::new();
//! if let Err(e) = metrics.record_started() {
//!     tracing::warn!("Failed to record metric: {}", e);
//! }
//! ```

pub mod metrics;

/// Metrics error type
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Empty data set - cannot calculate aggregate metric
    #[error("Empty data: cannot calculate {metric}")]
    EmptyData {
        /// Metric name that failed (e.g., "average")
        metric: &'static str,
    },

    /// Counter would overflow its storage
    #[error("Counter overflow for metric '{metric}'")]
    Overflow {
        /// Metric name
        metric: &'static str,
    },
}

/// Result type for metrics operations
pub type MetricsResult<T> = Result<T, MetricsError>;

/// Log a failed metric recording and continue.
pub(crate) fn log_metric(result: MetricsResult<()>, name: &'static str) {
    if let Err(e) = result {
        tracing::warn!(metric = name, error = %e, "Failed to record metric");
    }
}
