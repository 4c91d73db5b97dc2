//! # Homeboard Infrastructure
//!
//! Infrastructure implementations of core domain ports.
//!
//! This crate contains:
//! - SQLite persistence for sources, synced and native events and members
//! - HTTP client and the calendar source fetchers (ICS, CalDAV, Google, roster)
//! - Configuration loading and credential resolution
//! - The sync orchestrator and the live update broadcaster
//!
//! ## Architecture
//! - Implements traits defined in `homeboard-core`
//! - Depends on `homeboard-common`, `homeboard-domain` and `homeboard-core`
//! - Contains all "impure" code (I/O, timers, network)

pub mod config;
pub mod credentials;
pub mod database;
pub mod errors;
pub mod http;
pub mod integrations;
pub mod live;
pub mod observability;
pub mod scheduling;

// Re-export commonly used items
pub use credentials::ConfigCredentialStore;
pub use database::{
    DbManager, SqliteEventStore, SqliteNativeEventRepository, SqliteSourceRepository,
    SqliteUserDirectory,
};
pub use errors::InfraError;
pub use http::HttpClient;
pub use integrations::calendar::{
    CalDavFetcher, GoogleCalendarFetcher, IcsFeedFetcher, RosterFetcher,
};
pub use integrations::{create_fetcher, FetcherRegistry, FetcherSettings};
pub use live::{LiveBroadcaster, LiveSettings, LiveSubscription};
pub use scheduling::{OrchestratorSettings, SchedulerError, SyncOrchestrator};
