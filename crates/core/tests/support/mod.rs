//! Shared test helpers for `homeboard-core` integration tests.
//!
//! In-memory implementations of every core port so executor and merge tests
//! can focus on behaviour instead of storage.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use homeboard_core::{
    ChangeNotifier, CredentialStore, EventStore, FetchAuthority, FetchBatch, FetchRequest,
    NativeEventRepository, SourceFetcher, SourceRepository, UserDirectory,
};
use homeboard_domain::{
    CalendarSource, CanonicalEvent, ChangeNotice, Credential, HomeboardError, NativeEvent,
    Result as DomainResult, SourceKind, SyncedEvent, TimeWindow,
};

/// 08:00 UTC today; inside the executor's default sync window
pub fn base_time() -> DateTime<Utc> {
    Utc::now().date_naive().and_hms_opt(8, 0, 0).unwrap().and_utc()
}

/// Fixed instant for tests that build their own windows
pub fn fixed_time(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
}

pub fn canonical(external_id: &str, title: &str, start: DateTime<Utc>) -> CanonicalEvent {
    CanonicalEvent {
        external_id: external_id.into(),
        title: title.into(),
        description: None,
        start,
        end: start + Duration::hours(1),
        all_day: false,
        location: None,
        color: None,
        participants: vec![],
        version: None,
    }
}

pub fn source(id: &str, kind: SourceKind) -> CalendarSource {
    let mut source = CalendarSource::new(id, kind, id.to_uppercase(), format!("https://{id}.test"));
    source.color = "#0ea5e9".into();
    source
}

/// In-memory `SourceRepository` with atomic-like bookkeeping.
#[derive(Default, Clone)]
pub struct MockSourceRepository {
    sources: Arc<Mutex<HashMap<String, CalendarSource>>>,
    failing: Arc<Mutex<bool>>,
}

impl MockSourceRepository {
    pub fn with_sources(sources: Vec<CalendarSource>) -> Self {
        let repo = Self::default();
        {
            let mut map = repo.sources.lock().unwrap();
            for source in sources {
                map.insert(source.id.clone(), source);
            }
        }
        repo
    }

    pub fn get(&self, id: &str) -> CalendarSource {
        self.sources.lock().unwrap()[id].clone()
    }

    pub fn fail_listing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }
}

#[async_trait]
impl SourceRepository for MockSourceRepository {
    async fn list_sources(&self) -> DomainResult<Vec<CalendarSource>> {
        if *self.failing.lock().unwrap() {
            return Err(HomeboardError::Database("sources table locked".into()));
        }
        let mut sources: Vec<_> = self.sources.lock().unwrap().values().cloned().collect();
        sources.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sources)
    }

    async fn get_source(&self, id: &str) -> DomainResult<Option<CalendarSource>> {
        Ok(self.sources.lock().unwrap().get(id).cloned())
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

    async fn record_sync_failure(
        &self,
        id: &str,
        at: DateTime<Utc>,
        message: &str,
    ) -> DomainResult<()> {
        let mut sources = self.sources.lock().unwrap();
        let source = sources.get_mut(id).ok_or_else(|| HomeboardError::NotFound(id.into()))?;
        source.consecutive_errors += 1;
        source.last_error_at = Some(at);
        source.last_error = Some(message.to_string());
        Ok(())
    }
}

/// In-memory `EventStore` keyed by `(source_id, external_id)`.
#[derive(Default, Clone)]
pub struct MockEventStore {
    events: Arc<Mutex<HashMap<(String, String), SyncedEvent>>>,
    failing_sources: Arc<Mutex<HashSet<String>>>,
    upsert_budget: Arc<Mutex<Option<usize>>>,
}

impl MockEventStore {
    pub fn insert(&self, event: SyncedEvent) {
        self.events
            .lock()
            .unwrap()
            .insert((event.source_id.clone(), event.external_id.clone()), event);
    }

    pub fn ids_for(&self, source_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .events
            .lock()
            .unwrap()
            .keys()
            .filter(|(source, _)| source == source_id)
            .map(|(_, id)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn get(&self, source_id: &str, external_id: &str) -> Option<SyncedEvent> {
        self.events.lock().unwrap().get(&(source_id.into(), external_id.into())).cloned()
    }

    /// Make every read for `source_id` fail
    pub fn fail_reads_for(&self, source_id: &str) {
        self.failing_sources.lock().unwrap().insert(source_id.into());
    }

    /// Allow only `n` more upserts before failing
    pub fn fail_after_upserts(&self, n: usize) {
        *self.upsert_budget.lock().unwrap() = Some(n);
    }

    fn check_readable(&self, source_id: &str) -> DomainResult<()> {
        if self.failing_sources.lock().unwrap().contains(source_id) {
            return Err(HomeboardError::Database(format!("events for {source_id} unreadable")));
        }
        Ok(())
    }
}

#[async_trait]
impl EventStore for MockEventStore {
    async fn upsert_event(&self, event: &SyncedEvent) -> DomainResult<()> {
        {
            let mut budget = self.upsert_budget.lock().unwrap();
            if let Some(remaining) = budget.as_mut() {
                if *remaining == 0 {
                    return Err(HomeboardError::Database("disk full".into()));
                }
                *remaining -= 1;
            }
        }
        self.insert(event.clone());
        Ok(())
    }

    async fn find_by_source(&self, source_id: &str) -> DomainResult<Vec<SyncedEvent>> {
        self.check_readable(source_id)?;
        Ok(self
            .events
            .lock()
            .unwrap()
            .values()
            .filter(|event| event.source_id == source_id)
            .cloned()
            .collect())
    }

    async fn find_in_window(
        &self,
        source_id: &str,
        window: TimeWindow,
    ) -> DomainResult<Vec<SyncedEvent>> {
        self.check_readable(source_id)?;
        Ok(self
            .events
            .lock()
            .unwrap()
            .values()
            .filter(|event| event.source_id == source_id && window.overlaps(event.start, event.end))
            .cloned()
            .collect())
    }

    async fn delete_event(&self, source_id: &str, external_id: &str) -> DomainResult<bool> {
        Ok(self.events.lock().unwrap().remove(&(source_id.into(), external_id.into())).is_some())
    }

    async fn delete_by_source(&self, source_id: &str) -> DomainResult<usize> {
        let mut events = self.events.lock().unwrap();
        let before = events.len();
        events.retain(|(source, _), _| source != source_id);
        Ok(before - events.len())
    }
}

/// In-memory native event repository.
#[derive(Default, Clone)]
pub struct MockNativeRepository {
    events: Arc<Mutex<Vec<NativeEvent>>>,
    failing: Arc<Mutex<bool>>,
}

impl MockNativeRepository {
    pub fn push(&self, event: NativeEvent) {
        self.events.lock().unwrap().push(event);
    }

    pub fn fail(&self) {
        *self.failing.lock().unwrap() = true;
    }
}

#[async_trait]
impl NativeEventRepository for MockNativeRepository {
    async fn find_native_in_window(&self, window: TimeWindow) -> DomainResult<Vec<NativeEvent>> {
        if *self.failing.lock().unwrap() {
            return Err(HomeboardError::Database("native table missing".into()));
        }
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| window.overlaps(event.start, event.end))
            .cloned()
            .collect())
    }
}

/// Credential store returning a fixed answer per source id.
#[derive(Default, Clone)]
pub struct MockCredentialStore {
    missing: Arc<Mutex<HashSet<String>>>,
}

impl MockCredentialStore {
    pub fn revoke(&self, source_id: &str) {
        self.missing.lock().unwrap().insert(source_id.into());
    }
}

#[async_trait]
impl CredentialStore for MockCredentialStore {
    async fn credential_for(&self, source: &CalendarSource) -> DomainResult<Option<Credential>> {
        if self.missing.lock().unwrap().contains(&source.id) {
            return Err(HomeboardError::Auth(format!("token for {} expired", source.id)));
        }
        Ok(Some(Credential::Bearer("test-token".into())))
    }
}

/// Scripted fetch outcome
pub enum Scripted {
    Batch(FetchBatch),
    Fail(HomeboardError),
    Hang,
}

/// Fetcher replaying scripted outcomes in order and recording the cursors
/// it was called with.
#[derive(Clone)]
pub struct ScriptedFetcher {
    authority: FetchAuthority,
    script: Arc<Mutex<VecDeque<Scripted>>>,
    cursors: Arc<Mutex<Vec<Option<String>>>>,
}

impl ScriptedFetcher {
    pub fn new(authority: FetchAuthority) -> Self {
        Self {
            authority,
            script: Arc::new(Mutex::new(VecDeque::new())),
            cursors: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn then(self, outcome: Scripted) -> Self {
        self.script.lock().unwrap().push_back(outcome);
        self
    }

    pub fn push(&self, outcome: Scripted) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn cursors(&self) -> Vec<Option<String>> {
        self.cursors.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceFetcher for ScriptedFetcher {
    fn kind(&self) -> SourceKind {
        SourceKind::IcsFeed
    }

    fn authority(&self) -> FetchAuthority {
        self.authority
    }

    async fn fetch(&self, request: FetchRequest<'_>) -> DomainResult<FetchBatch> {
        self.cursors.lock().unwrap().push(request.cursor.map(str::to_string));
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Batch(batch)) => Ok(batch),
            Some(Scripted::Fail(err)) => Err(err),
            Some(Scripted::Hang) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            None => Err(HomeboardError::Internal("script exhausted".into())),
        }
    }
}

/// Notifier that records every notice.
#[derive(Default, Clone)]
pub struct RecordingNotifier {
    notices: Arc<Mutex<Vec<ChangeNotice>>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<ChangeNotice> {
        self.notices.lock().unwrap().clone()
    }
}

impl ChangeNotifier for RecordingNotifier {
    fn notify(&self, notice: ChangeNotice) {
        self.notices.lock().unwrap().push(notice);
    }
}

/// Household directory with fixed colours.
#[derive(Default, Clone)]
pub struct MockUserDirectory {
    colors: HashMap<String, String>,
    failing: bool,
}

impl MockUserDirectory {
    pub fn with_member(mut self, identity: &str, color: &str) -> Self {
        self.colors.insert(identity.to_lowercase(), color.into());
        self
    }

    pub fn failing() -> Self {
        Self { failing: true, ..Self::default() }
    }
}

#[async_trait]
impl UserDirectory for MockUserDirectory {
    async fn member_colors(&self) -> DomainResult<HashMap<String, String>> {
        if self.failing {
            return Err(HomeboardError::Database("members unavailable".into()));
        }
        Ok(self.colors.clone())
    }
}
