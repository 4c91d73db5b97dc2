//! One fetch-diff-upsert cycle for a single source
//!
//! The executor resolves the source's credential, calls its fetcher with the
//! stored cursor, diffs the batch against the stored events keyed by
//! `(source_id, external_id)` and applies inserts, updates and deletions
//! through the store's per-event primitives. Deletions honour the fetcher's
//! declared [`FetchAuthority`]: windowed sources only lose events that overlap
//! the window they actually returned.
//!
//! Failures are recorded on the source (error count incremented atomically,
//! `last_sync_at` untouched) and returned to the caller. A store failure part
//! way through leaves the already-applied writes in place; the next cycle
//! reconciles them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use homeboard_domain::constants::MAX_SOURCE_ERROR_LENGTH;
use homeboard_domain::{
    CalendarSource, ChangeKind, ChangeNotice, Credential, HomeboardError, SyncConfig,
    SyncCycleReport, SyncError, SyncedEvent, TimeWindow,
};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use super::ports::ChangeNotifier;
use crate::calendar::ports::{
    CredentialStore, EventStore, FetchAuthority, FetchBatch, FetchRequest, SourceFetcher,
    SourceRepository,
};

/// Bounds and window used by every cycle
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub fetch_timeout: Duration,
    pub credential_timeout: Duration,
    pub lookback_days: u32,
    pub lookahead_days: u32,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

impl ExecutorSettings {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            fetch_timeout: config.fetch_timeout(),
            credential_timeout: config.credential_timeout(),
            lookback_days: config.lookback_days,
            lookahead_days: config.lookahead_days,
        }
    }

    /// Fetch window for a source, honouring per-source overrides
    pub fn window_for(&self, source: &CalendarSource, now: DateTime<Utc>) -> TimeWindow {
        let lookback = source.options.lookback_days.unwrap_or(self.lookback_days);
        let lookahead = source.options.lookahead_days.unwrap_or(self.lookahead_days).max(1);
        TimeWindow {
            start: now - chrono::Duration::days(i64::from(lookback)),
            end: now + chrono::Duration::days(i64::from(lookahead)),
        }
    }
}

#[derive(Debug, Default)]
struct DiffCounts {
    new: usize,
    updated: usize,
    deleted: usize,
}

/// Runs sync cycles against the store
pub struct SyncExecutor {
    sources: Arc<dyn SourceRepository>,
    events: Arc<dyn EventStore>,
    credentials: Arc<dyn CredentialStore>,
    notifier: Arc<dyn ChangeNotifier>,
    settings: ExecutorSettings,
}

impl SyncExecutor {
    pub fn new(
        sources: Arc<dyn SourceRepository>,
        events: Arc<dyn EventStore>,
        credentials: Arc<dyn CredentialStore>,
        notifier: Arc<dyn ChangeNotifier>,
        settings: ExecutorSettings,
    ) -> Self {
        Self { sources, events, credentials, notifier, settings }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Run one cycle for `source_id` with `fetcher`.
    ///
    /// The source record is re-read so the cycle always starts from the
    /// cursor committed by the previous one.
    #[instrument(skip(self, fetcher), fields(kind = %fetcher.kind()))]
    pub async fn run_cycle(
        &self,
        source_id: &str,
        fetcher: &dyn SourceFetcher,
    ) -> Result<SyncCycleReport, SyncError> {
        let source = self
            .sources
            .get_source(source_id)
            .await
            .map_err(SyncError::store)?
            .ok_or_else(|| SyncError::NotFound(source_id.to_string()))?;

        let started = Instant::now();
        match self.execute(&source, fetcher, started).await {
            Ok(report) => {
                info!(
                    fetched = report.fetched,
                    new = report.new,
                    updated = report.updated,
                    deleted = report.deleted,
                    skipped = report.skipped,
                    duration_ms = report.duration_ms,
                    "sync cycle completed"
                );
                Ok(report)
            }
            Err(err) => {
                warn!(error = %err, kind = %err.kind(), "sync cycle failed");
                if err.counts_against_source() {
                    self.record_failure(&source.id, &err).await;
                }
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        source: &CalendarSource,
        fetcher: &dyn SourceFetcher,
        started: Instant,
    ) -> Result<SyncCycleReport, SyncError> {
        let credential = self.resolve_credential(source).await?;
        let window = self.settings.window_for(source, Utc::now());

        let request = FetchRequest {
            source,
            credential: credential.as_ref(),
            cursor: source.sync_cursor.as_deref(),
            window,
        };

        let batch = match timeout(self.settings.fetch_timeout, fetcher.fetch(request)).await {
            Err(_) => {
                return Err(SyncError::Timeout { stage: "fetch", after: self.settings.fetch_timeout })
            }
            Ok(Err(HomeboardError::Auth(message))) => {
                return Err(SyncError::Credential { source_id: source.id.clone(), message })
            }
            Ok(Err(err)) => return Err(SyncError::fetch(err)),
            Ok(Ok(batch)) => batch,
        };

        let counts = if batch.not_modified {
            debug!("upstream reported no changes");
            DiffCounts::default()
        } else {
            self.apply_batch(source, fetcher.authority(), &batch, window).await?
        };

        let cursor = match (&batch.cursor, batch.not_modified) {
            (None, true) => source.sync_cursor.as_deref(),
            (cursor, _) => cursor.as_deref(),
        };

        let finished_at = Utc::now();
        self.sources
            .record_sync_success(&source.id, finished_at, cursor)
            .await
            .map_err(SyncError::store)?;

        let report = SyncCycleReport {
            source_id: source.id.clone(),
            fetched: batch.events.len(),
            new: counts.new,
            updated: counts.updated,
            deleted: counts.deleted,
            skipped: batch.skipped,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            cursor_advanced: cursor != source.sync_cursor.as_deref(),
            finished_at,
        };

        if report.changed() {
            self.notifier.notify(ChangeNotice::calendar(
                ChangeKind::Synced,
                source.id.clone(),
                Some(source.id.clone()),
            ));
        }

        Ok(report)
    }

    async fn resolve_credential(
        &self,
        source: &CalendarSource,
    ) -> Result<Option<Credential>, SyncError> {
        let after = self.settings.credential_timeout;
        match timeout(after, self.credentials.credential_for(source)).await {
            Err(_) => Err(SyncError::Timeout { stage: "credential", after }),
            Ok(Err(err)) => Err(SyncError::Credential {
                source_id: source.id.clone(),
                message: credential_message(err),
            }),
            Ok(Ok(credential)) => Ok(credential),
        }
    }

    async fn apply_batch(
        &self,
        source: &CalendarSource,
        authority: FetchAuthority,
        batch: &FetchBatch,
        requested: TimeWindow,
    ) -> Result<DiffCounts, SyncError> {
        let stored = self.events.find_by_source(&source.id).await.map_err(SyncError::store)?;
        let known: HashMap<&str, &SyncedEvent> =
            stored.iter().map(|event| (event.external_id.as_str(), event)).collect();

        let now = Utc::now();
        let mut counts = DiffCounts::default();
        let mut seen: HashSet<&str> = HashSet::with_capacity(batch.events.len());

        // Later duplicates of an external id win
        for event in batch.events.iter().rev() {
            if !seen.insert(event.external_id.as_str()) {
                continue;
            }

            let synced = SyncedEvent::from_canonical(&source.id, event, now);
            let is_new = match known.get(event.external_id.as_str()) {
                Some(existing) if existing.content_hash == synced.content_hash => continue,
                Some(_) => false,
                None => true,
            };

            self.events.upsert_event(&synced).await.map_err(SyncError::store)?;
            if is_new {
                counts.new += 1;
            } else {
                counts.updated += 1;
            }
        }

        for external_id in deletions(authority, batch, requested, &stored, &seen) {
            if self.events.delete_event(&source.id, external_id).await.map_err(SyncError::store)? {
                counts.deleted += 1;
            }
        }

        Ok(counts)
    }

    async fn record_failure(&self, source_id: &str, err: &SyncError) {
        let message: String = err.to_string().chars().take(MAX_SOURCE_ERROR_LENGTH).collect();
        if let Err(record_err) =
            self.sources.record_sync_failure(source_id, Utc::now(), &message).await
        {
            warn!(error = %record_err, "failed to record sync failure on source");
        }
    }
}

/// External ids the batch proves are gone
fn deletions<'a>(
    authority: FetchAuthority,
    batch: &'a FetchBatch,
    requested: TimeWindow,
    stored: &'a [SyncedEvent],
    seen: &HashSet<&str>,
) -> Vec<&'a str> {
    let mut doomed: Vec<&str> = Vec::new();
    let mut marked: HashSet<&str> = HashSet::new();

    for external_id in &batch.removed {
        let id = external_id.as_str();
        if !seen.contains(id) && marked.insert(id) {
            doomed.push(id);
        }
    }

    if batch.complete {
        let scope = match authority {
            FetchAuthority::FullMirror => None,
            FetchAuthority::Windowed | FetchAuthority::Incremental => {
                Some(batch.window.unwrap_or(requested))
            }
        };

        for event in stored {
            let id = event.external_id.as_str();
            if seen.contains(id) || marked.contains(id) {
                continue;
            }
            if scope.map_or(true, |window| window.overlaps(event.start, event.end)) {
                marked.insert(id);
                doomed.push(id);
            }
        }
    }

    doomed
}

fn credential_message(err: HomeboardError) -> String {
    match err {
        HomeboardError::Auth(message) => message,
        other => other.to_string(),
    }
}
