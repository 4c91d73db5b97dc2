//! Port interfaces for calendar sources, fetchers and the event store

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use homeboard_domain::{
    CalendarSource, CanonicalEvent, Credential, NativeEvent, Result, SourceKind, SyncedEvent,
    TimeWindow,
};

/// How far a fetcher's snapshot can be trusted when deciding deletions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchAuthority {
    /// Every fetch returns the complete upstream calendar; stored events
    /// absent from the batch are deleted regardless of date.
    FullMirror,
    /// Fetches return a date window; deletions are limited to stored events
    /// overlapping that window.
    Windowed,
    /// Deltas name removals explicitly. A fetch without a cursor falls back
    /// to a windowed snapshot.
    Incremental,
}

/// Input to one fetch
#[derive(Debug, Clone)]
pub struct FetchRequest<'a> {
    pub source: &'a CalendarSource,
    pub credential: Option<&'a Credential>,
    /// Cursor persisted by the previous successful cycle
    pub cursor: Option<&'a str>,
    /// Window the engine wants covered
    pub window: TimeWindow,
}

/// Canonical events returned by one fetch
#[derive(Debug, Clone, Default)]
pub struct FetchBatch {
    pub events: Vec<CanonicalEvent>,
    /// External ids the upstream reported as removed
    pub removed: Vec<String>,
    /// Cursor to persist for the next fetch; `None` for snapshot sources
    pub cursor: Option<String>,
    /// `events` is the complete listing of `window` (or of the whole
    /// calendar for full mirrors)
    pub complete: bool,
    /// Window the snapshot covers when it differs from the request
    pub window: Option<TimeWindow>,
    /// Upstream reported no change since `cursor`
    pub not_modified: bool,
    /// Upstream entries dropped as malformed
    pub skipped: usize,
}

impl FetchBatch {
    /// Complete snapshot of the fetched scope
    pub fn snapshot(events: Vec<CanonicalEvent>, cursor: Option<String>) -> Self {
        Self { events, cursor, complete: true, ..Self::default() }
    }

    /// Incremental delta
    pub fn delta(events: Vec<CanonicalEvent>, removed: Vec<String>, cursor: Option<String>) -> Self {
        Self { events, removed, cursor, ..Self::default() }
    }

    /// Nothing changed upstream since `cursor`
    pub fn not_modified(cursor: Option<String>) -> Self {
        Self { cursor, not_modified: true, ..Self::default() }
    }

    pub fn with_skipped(mut self, skipped: usize) -> Self {
        self.skipped = skipped;
        self
    }

    pub fn with_window(mut self, window: TimeWindow) -> Self {
        self.window = Some(window);
        self
    }
}

/// Translates one external calendar system into canonical events
///
/// Returning [`HomeboardError::Auth`](homeboard_domain::HomeboardError::Auth)
/// signals rejected access and is surfaced as a credential failure; every
/// other error is treated as a fetch failure.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Source kind this fetcher serves
    fn kind(&self) -> SourceKind;

    /// Deletion authority of the batches this fetcher returns
    fn authority(&self) -> FetchAuthority;

    /// Fetch events for a source
    async fn fetch(&self, request: FetchRequest<'_>) -> Result<FetchBatch>;
}

/// Keyed store of synced events
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert or update by `(source_id, external_id)`
    async fn upsert_event(&self, event: &SyncedEvent) -> Result<()>;

    /// Every stored event of a source
    async fn find_by_source(&self, source_id: &str) -> Result<Vec<SyncedEvent>>;

    /// Events of a source overlapping `window`
    async fn find_in_window(&self, source_id: &str, window: TimeWindow) -> Result<Vec<SyncedEvent>>;

    /// Delete one event; returns whether it existed
    async fn delete_event(&self, source_id: &str, external_id: &str) -> Result<bool>;

    /// Delete every event of a source
    async fn delete_by_source(&self, source_id: &str) -> Result<usize>;
}

/// Persistence of source descriptors and their sync bookkeeping
#[async_trait]
pub trait SourceRepository: Send + Sync {
    async fn list_sources(&self) -> Result<Vec<CalendarSource>>;

    async fn get_source(&self, id: &str) -> Result<Option<CalendarSource>>;

    /// Insert or replace a descriptor, including its bookkeeping fields
    async fn save_source(&self, source: &CalendarSource) -> Result<()>;

    async fn delete_source(&self, id: &str) -> Result<bool>;

    /// Store cursor and `last_sync_at`, reset the error count
    async fn record_sync_success(
        &self,
        id: &str,
        at: DateTime<Utc>,
        cursor: Option<&str>,
    ) -> Result<()>;

    /// Atomically increment the error count and record the failure
    async fn record_sync_failure(&self, id: &str, at: DateTime<Utc>, message: &str) -> Result<()>;
}

/// Read access to locally authored events
#[async_trait]
pub trait NativeEventRepository: Send + Sync {
    async fn find_native_in_window(&self, window: TimeWindow) -> Result<Vec<NativeEvent>>;
}

/// Resolves access credentials for sources
///
/// Returns `Ok(None)` for sources without a credential reference and
/// [`HomeboardError::Auth`](homeboard_domain::HomeboardError::Auth) when the
/// referenced credential is missing or expired.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn credential_for(&self, source: &CalendarSource) -> Result<Option<Credential>>;
}

/// Household directory used to colour events by participant
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Display colour keyed by lowercase identity (email and name)
    async fn member_colors(&self) -> Result<HashMap<String, String>>;
}
