//! Metrics collection modules
//!
//! Thread-safe metrics for the sync subsystem.

pub mod fetch;
pub mod sync;

pub use fetch::{FetchMetrics, FetchMetricsSnapshot};
pub use sync::{SyncMetrics, SyncMetricsSnapshot};
