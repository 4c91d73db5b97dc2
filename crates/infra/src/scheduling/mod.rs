//! Scheduling infrastructure for source synchronisation
//!
//! The orchestrator owns one interval timer per enabled source. Timers and
//! explicit triggers share a per-source mutex so at most one cycle per source
//! is ever in flight. Every spawned task keeps its join handle and its own
//! cancellation token.

pub mod error;
pub mod sync_orchestrator;

pub use error::{SchedulerError, SchedulerResult};
pub use sync_orchestrator::{OrchestratorSettings, SyncOrchestrator};
