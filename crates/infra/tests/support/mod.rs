//! Shared helpers for `homeboard-infra` integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use homeboard_core::{
    ChangeNotifier, EventStore, ExecutorSettings, FetchAuthority, FetchBatch, FetchRequest,
    SourceFetcher, SourceRepository, SyncExecutor,
};
use homeboard_domain::{
    CalendarSource, CanonicalEvent, HomeboardError, Result as DomainResult, SourceKind,
    SyncedEvent, TimeWindow,
};
use homeboard_infra::database::DbManager;
use homeboard_infra::observability::metrics::{FetchMetrics, SyncMetrics};
use homeboard_infra::{
    ConfigCredentialStore, FetcherRegistry, LiveBroadcaster, LiveSettings, OrchestratorSettings,
    SyncOrchestrator,
};
use tempfile::TempDir;

/// Temporary database wrapper that keeps the underlying file alive for the
/// duration of a test run.
pub struct TestDatabase {
    pub manager: Arc<DbManager>,
    _temp_dir: TempDir,
}

impl TestDatabase {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("temp dir should be created");
        let db_path = temp_dir.path().join("homeboard-test.db");

        let manager = DbManager::new(&db_path, 4).expect("db manager should be created");
        manager.run_migrations().expect("schema migrations should apply");

        Self { manager: Arc::new(manager), _temp_dir: temp_dir }
    }
}

impl Default for TestDatabase {
    fn default() -> Self {
        Self::new()
    }
}

pub fn source(id: &str, kind: SourceKind, url: &str) -> CalendarSource {
    let mut source = CalendarSource::new(id, kind, id.to_uppercase(), url);
    source.color = "#0ea5e9".into();
    source
}

pub fn canonical(external_id: &str, title: &str, start: DateTime<Utc>) -> CanonicalEvent {
    CanonicalEvent {
        external_id: external_id.into(),
        title: title.into(),
        description: None,
        start,
        end: start + ChronoDuration::hours(1),
        all_day: false,
        location: None,
        color: None,
        participants: vec![],
        version: None,
    }
}

pub fn window(start: DateTime<Utc>, days: i64) -> TimeWindow {
    TimeWindow::new(start, start + ChronoDuration::days(days)).expect("valid window")
}

/// Fetcher with a scripted result, an optional delay and call accounting
pub struct ScriptedFetcher {
    kind: SourceKind,
    events: Mutex<Vec<CanonicalEvent>>,
    failing: Mutex<HashSet<String>>,
    panicking: Mutex<HashSet<String>>,
    delay: Duration,
    calls: AtomicUsize,
    completed: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new(kind: SourceKind, delay: Duration) -> Self {
        Self {
            kind,
            events: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            panicking: Mutex::new(HashSet::new()),
            delay,
            calls: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn set_events(&self, events: Vec<CanonicalEvent>) {
        *self.events.lock().unwrap() = events;
    }

    pub fn fail_for(&self, source_id: &str) {
        self.failing.lock().unwrap().insert(source_id.to_string());
    }

    pub fn panic_for(&self, source_id: &str) {
        self.panicking.lock().unwrap().insert(source_id.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceFetcher for ScriptedFetcher {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn authority(&self) -> FetchAuthority {
        FetchAuthority::FullMirror
    }

    async fn fetch(&self, request: FetchRequest<'_>) -> DomainResult<FetchBatch> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let panics = self.panicking.lock().unwrap().contains(&request.source.id);
        if panics {
            panic!("scripted fetcher panicked for '{}'", request.source.id);
        }
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);

        if self.failing.lock().unwrap().contains(&request.source.id) {
            return Err(HomeboardError::Network("upstream unavailable".into()));
        }
        Ok(FetchBatch::snapshot(self.events.lock().unwrap().clone(), None))
    }
}

/// In-memory source repository
#[derive(Default)]
pub struct MemorySourceRepository {
    sources: Mutex<HashMap<String, CalendarSource>>,
}

impl MemorySourceRepository {
    pub fn get(&self, id: &str) -> Option<CalendarSource> {
        self.sources.lock().unwrap().get(id).cloned()
    }
}

#[async_trait]
impl SourceRepository for MemorySourceRepository {
    async fn list_sources(&self) -> DomainResult<Vec<CalendarSource>> {
        let mut sources: Vec<_> = self.sources.lock().unwrap().values().cloned().collect();
        sources.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sources)
    }

    async fn get_source(&self, id: &str) -> DomainResult<Option<CalendarSource>> {
        Ok(self.get(id))
    }

    async fn save_source(&self, source: &CalendarSource) -> DomainResult<()> {
        self.sources.lock().unwrap().insert(source.id.clone(), source.clone());
        Ok(())
    }

    async fn delete_source(&self, id: &str) -> DomainResult<bool> {
        Ok(self.sources.lock().unwrap().remove(id).is_some())
    }

    async fn record_sync_success(
        &self,
        id: &str,
        at: DateTime<Utc>,
        cursor: Option<&str>,
    ) -> DomainResult<()> {
        let mut sources = self.sources.lock().unwrap();
        let source = sources.get_mut(id).ok_or_else(|| HomeboardError::NotFound(id.into()))?;
        source.last_sync_at = Some(at);
        source.sync_cursor = cursor.map(str::to_string);
        source.consecutive_errors = 0;
        Ok(())
    }

    async fn record_sync_failure(&self, id: &str, at: DateTime<Utc>, message: &str) -> DomainResult<()> {
        let mut sources = self.sources.lock().unwrap();
        let source = sources.get_mut(id).ok_or_else(|| HomeboardError::NotFound(id.into()))?;
        source.consecutive_errors += 1;
        source.last_error_at = Some(at);
        source.last_error = Some(message.to_string());
        Ok(())
    }
}

/// In-memory event store keyed by `(source_id, external_id)`
#[derive(Default)]
pub struct MemoryEventStore {
    events: Mutex<HashMap<(String, String), SyncedEvent>>,
}

impl MemoryEventStore {
    pub fn count_for(&self, source_id: &str) -> usize {
        self.events.lock().unwrap().keys().filter(|(id, _)| id == source_id).count()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn upsert_event(&self, event: &SyncedEvent) -> DomainResult<()> {
        self.events
            .lock()
            .unwrap()
            .insert((event.source_id.clone(), event.external_id.clone()), event.clone());
        Ok(())
    }

    async fn find_by_source(&self, source_id: &str) -> DomainResult<Vec<SyncedEvent>> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.source_id == source_id)
            .cloned()
            .collect())
    }

    async fn find_in_window(&self, source_id: &str, window: TimeWindow) -> DomainResult<Vec<SyncedEvent>> {
        Ok(self
            .find_by_source(source_id)
            .await?
            .into_iter()
            .filter(|e| window.overlaps(e.start, e.end))
            .collect())
    }

    async fn delete_event(&self, source_id: &str, external_id: &str) -> DomainResult<bool> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .remove(&(source_id.to_string(), external_id.to_string()))
            .is_some())
    }

    async fn delete_by_source(&self, source_id: &str) -> DomainResult<usize> {
        let mut events = self.events.lock().unwrap();
        let before = events.len();
        events.retain(|(id, _), _| id != source_id);
        Ok(before - events.len())
    }
}

/// Orchestrator wired to in-memory ports and one scripted fetcher
pub struct Harness {
    pub orchestrator: SyncOrchestrator,
    pub sources: Arc<MemorySourceRepository>,
    pub events: Arc<MemoryEventStore>,
    pub fetcher: Arc<ScriptedFetcher>,
    pub broadcaster: LiveBroadcaster,
    pub metrics: Arc<SyncMetrics>,
}

pub fn test_settings() -> OrchestratorSettings {
    OrchestratorSettings { enabled: true, ..OrchestratorSettings::default() }
}

pub async fn harness(
    settings: OrchestratorSettings,
    fetcher: ScriptedFetcher,
    sources: Vec<CalendarSource>,
) -> Harness {
    let repo = Arc::new(MemorySourceRepository::default());
    for source in &sources {
        repo.save_source(source).await.unwrap();
    }
    let events = Arc::new(MemoryEventStore::default());
    let fetcher = Arc::new(fetcher);
    let broadcaster = LiveBroadcaster::new(LiveSettings::default());
    let metrics = Arc::new(SyncMetrics::new());

    let mut registry = FetcherRegistry::new(Arc::new(FetchMetrics::new()));
    registry.register(fetcher.clone());

    let notifier: Arc<dyn ChangeNotifier> = Arc::new(broadcaster.clone());
    let executor = Arc::new(SyncExecutor::new(
        repo.clone(),
        events.clone(),
        Arc::new(ConfigCredentialStore::default()),
        notifier,
        ExecutorSettings::default(),
    ));

    let orchestrator = SyncOrchestrator::new(
        executor,
        Arc::new(registry),
        repo.clone(),
        events.clone(),
        broadcaster.clone(),
        metrics.clone(),
        settings,
    );

    Harness { orchestrator, sources: repo, events, fetcher, broadcaster, metrics }
}

/// Let spawned tasks run up to their next suspension point
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
