//! # Homeboard Core
//!
//! Pure business logic layer - no infrastructure dependencies.
//!
//! This crate contains:
//! - Port/adapter interfaces (traits) for every external collaborator
//! - The sync executor (one fetch-diff-upsert cycle per source)
//! - The event merge layer and its per-source post-processing hook
//!
//! ## Architecture Principles
//! - Only depends on `homeboard-domain`
//! - No database, HTTP, or platform code
//! - All external dependencies via traits

pub mod calendar;
pub mod merge;
pub mod sync;

pub use calendar::ports::{
    CredentialStore, EventStore, FetchAuthority, FetchBatch, FetchRequest,
    NativeEventRepository, SourceFetcher, SourceRepository, UserDirectory,
};
pub use merge::{EventPostProcessor, MergeService, MergeSettings, ParticipantColorProcessor};
pub use sync::ports::ChangeNotifier;
pub use sync::{ExecutorSettings, SyncExecutor};
