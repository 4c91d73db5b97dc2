//! Per-source sync scheduling and trigger serialisation.
//!
//! The orchestrator installs one interval timer per enabled source and runs
//! explicit triggers on demand. Timers and triggers for a source take the same
//! async mutex before calling the executor, so at most one cycle per source is
//! in flight and cycle N+1 only starts after cycle N committed its writes.
//!
//! `cancel` stops the timer, then waits on that mutex for any in-flight cycle
//! before joining the timer task. Deleting a source holds the mutex while its
//! events and record are removed, so no cycle can write to it concurrently.
//!
//! # Example
//!
//! ```no_run
//! use homeboard_domain::TriggerOptions;
//! use homeboard_infra::scheduling::SyncOrchestrator;
//!
//! # async fn example(orchestrator: SyncOrchestrator) -> homeboard_domain::Result<()> {
//! orchestrator.start().await?;
//! let report = orchestrator
//!     .trigger("family", TriggerOptions { force: true, wait: false })
//!     .await;
//! println!("{report:?}");
//! orchestrator.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use homeboard_core::{EventStore, SourceFetcher, SourceRepository, SyncExecutor};
use homeboard_domain::{
    ActiveSchedule, CalendarSource, ChangeKind, ChangeNotice, HomeboardError, Result,
    SourceConfig, SourceKind, SourceSyncResult, SyncAllSummary, SyncConfig, SyncCycleReport,
    SyncError, SyncErrorKind, TriggerOptions,
};
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::integrations::FetcherRegistry;
use crate::live::LiveBroadcaster;
use crate::observability::log_metric;
use crate::observability::metrics::{SyncMetrics, SyncMetricsSnapshot};
use crate::scheduling::error::{SchedulerError, SchedulerResult};

const ALL_KINDS: [SourceKind; 4] =
    [SourceKind::IcsFeed, SourceKind::CalDav, SourceKind::VendorApi, SourceKind::Roster];

/// Configuration for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Install recurring timers. Explicit triggers work either way.
    pub enabled: bool,
    pub intervals: HashMap<SourceKind, Duration>,
    /// Upper bound on one cycle, including waits inside the executor
    pub cycle_timeout: Duration,
    /// Minimum spacing between two unforced cycles of one source
    pub min_trigger_interval: Duration,
    /// Timeout for awaiting a cancelled timer task
    pub join_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            enabled: config.enabled,
            intervals: ALL_KINDS.iter().map(|kind| (*kind, config.interval_for(*kind))).collect(),
            cycle_timeout: config.cycle_timeout(),
            min_trigger_interval: config.min_trigger_interval(),
            join_timeout: Duration::from_secs(5),
        }
    }

    /// Poll interval for a source kind
    pub fn interval_for(&self, kind: SourceKind) -> Duration {
        self.intervals
            .get(&kind)
            .copied()
            .filter(|interval| !interval.is_zero())
            .unwrap_or(Duration::from_secs(15 * 60))
    }
}

struct Schedule {
    interval: Duration,
    registered_at: DateTime<Utc>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    executor: Arc<SyncExecutor>,
    fetchers: Arc<FetcherRegistry>,
    sources: Arc<dyn SourceRepository>,
    events: Arc<dyn EventStore>,
    broadcaster: LiveBroadcaster,
    metrics: Arc<SyncMetrics>,
    settings: OrchestratorSettings,
    schedules: Mutex<HashMap<String, Schedule>>,
    locks: DashMap<String, Arc<AsyncMutex<()>>>,
    last_started: DashMap<String, Instant>,
    shutdown: CancellationToken,
}

impl Inner {
    fn lock_for(&self, source_id: &str) -> Arc<AsyncMutex<()>> {
        self.locks.entry(source_id.to_string()).or_default().value().clone()
    }

    fn is_in_flight(&self, source_id: &str) -> bool {
        self.locks.get(source_id).is_some_and(|lock| lock.try_lock().is_err())
    }

    /// Time left before an unforced trigger may start another cycle
    fn retry_after(&self, source_id: &str) -> Option<Duration> {
        let last = *self.last_started.get(source_id)?;
        self.settings.min_trigger_interval.checked_sub(last.elapsed()).filter(|d| !d.is_zero())
    }

    /// Run one cycle while holding the source's lock.
    ///
    /// The cycle runs in its own task that owns `guard`. A panic is recorded
    /// as a failed cycle, and the lock stays held until the cycle ends even if
    /// the caller is dropped.
    async fn run_locked(
        self: &Arc<Self>,
        source_id: &str,
        fetcher: Arc<dyn SourceFetcher>,
        guard: OwnedMutexGuard<()>,
    ) -> std::result::Result<SyncCycleReport, SyncError> {
        let started = Instant::now();
        self.last_started.insert(source_id.to_string(), started);
        log_metric(self.metrics.record_started(), "sync.cycle.started");

        let executor = Arc::clone(&self.executor);
        let id = source_id.to_string();
        let mut handle = tokio::spawn(async move {
            let _guard = guard;
            executor.run_cycle(&id, fetcher.as_ref()).await
        });

        let cycle_timeout = self.settings.cycle_timeout;
        let outcome = match tokio::time::timeout(cycle_timeout, &mut handle).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_err)) => {
                let err = SyncError::Fetch(format!("sync task for '{source_id}' failed: {join_err}"));
                warn!(source_id, error = %join_err, "sync cycle task failed");
                self.record_failure(source_id, &err).await;
                Err(err)
            }
            Err(_) => {
                handle.abort();
                log_metric(self.metrics.record_timeout(), "sync.cycle.timeout");
                let err = SyncError::Timeout { stage: "cycle", after: cycle_timeout };
                warn!(source_id, timeout_secs = cycle_timeout.as_secs(), "sync cycle timed out");
                self.record_failure(source_id, &err).await;
                Err(err)
            }
        };

        log_metric(
            self.metrics.record_finished(started.elapsed(), outcome.is_ok()),
            "sync.cycle.finished",
        );
        outcome
    }

    async fn record_failure(&self, source_id: &str, err: &SyncError) {
        if let Err(record_err) =
            self.sources.record_sync_failure(source_id, Utc::now(), &err.to_string()).await
        {
            warn!(source_id, error = %record_err, "failed to record sync failure");
        }
    }
}

/// Owns per-source schedules and serialises cycles per source
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl SyncOrchestrator {
    pub fn new(
        executor: Arc<SyncExecutor>,
        fetchers: Arc<FetcherRegistry>,
        sources: Arc<dyn SourceRepository>,
        events: Arc<dyn EventStore>,
        broadcaster: LiveBroadcaster,
        metrics: Arc<SyncMetrics>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                executor,
                fetchers,
                sources,
                events,
                broadcaster,
                metrics,
                settings,
                schedules: Mutex::new(HashMap::new()),
                locks: DashMap::new(),
                last_started: DashMap::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.inner.settings
    }

    /// Install or replace the recurring timer for a source.
    ///
    /// Any previous timer for the same id is cancelled before the new one is
    /// spawned, under the same lock, so two timers never coexist. Disabled
    /// sources only lose their timer. Returns whether a timer is installed.
    pub fn register(&self, source: &CalendarSource) -> SchedulerResult<bool> {
        if !source.enabled || !self.inner.settings.enabled {
            if let Some(previous) = self.inner.schedules.lock().remove(&source.id) {
                previous.cancel.cancel();
            }
            debug!(source_id = %source.id, enabled = source.enabled, "source not scheduled");
            return Ok(false);
        }
        if self.inner.fetchers.get(source.kind).is_none() {
            return Err(SchedulerError::NoFetcher { kind: source.kind });
        }

        let interval = self.inner.settings.interval_for(source.kind);
        let cancel = self.inner.shutdown.child_token();

        let mut schedules = self.inner.schedules.lock();
        if let Some(previous) = schedules.remove(&source.id) {
            previous.cancel.cancel();
            debug!(source_id = %source.id, "replacing existing schedule");
        }
        let handle = tokio::spawn(schedule_loop(
            Arc::clone(&self.inner),
            source.id.clone(),
            source.kind,
            interval,
            cancel.clone(),
        ));
        schedules.insert(
            source.id.clone(),
            Schedule { interval, registered_at: Utc::now(), cancel, handle },
        );
        drop(schedules);

        info!(source_id = %source.id, kind = %source.kind, interval_secs = interval.as_secs(), "source scheduled");
        Ok(true)
    }

    /// Register every enabled source in the repository
    pub async fn start(&self) -> Result<usize> {
        let sources = self.inner.sources.list_sources().await?;
        let mut registered = 0;
        for source in &sources {
            match self.register(source) {
                Ok(true) => registered += 1,
                Ok(false) => {}
                Err(err) => warn!(source_id = %source.id, error = %err, "source not scheduled"),
            }
        }
        info!(sources = sources.len(), registered, "sync orchestrator started");
        Ok(registered)
    }

    /// Run one cycle now.
    ///
    /// Unforced triggers inside the minimum interval fail with
    /// [`SyncError::Limiter`]. With `wait` unset an in-flight cycle makes the
    /// call fail with [`SyncError::Busy`]; otherwise it queues behind it.
    /// `force` never bypasses the in-flight exclusion.
    #[instrument(skip(self), fields(force = options.force, wait = options.wait))]
    pub async fn trigger(
        &self,
        source_id: &str,
        options: TriggerOptions,
    ) -> std::result::Result<SyncCycleReport, SyncError> {
        let source = self
            .inner
            .sources
            .get_source(source_id)
            .await
            .map_err(SyncError::store)?
            .ok_or_else(|| SyncError::NotFound(source_id.to_string()))?;
        let fetcher = self.inner.fetchers.get(source.kind).ok_or_else(|| {
            SyncError::Fetch(format!("no fetcher registered for source kind '{}'", source.kind))
        })?;

        if !options.force {
            if let Some(retry_after) = self.inner.retry_after(source_id) {
                log_metric(
                    self.inner.metrics.record_rejection(SyncErrorKind::Limiter),
                    "sync.trigger.limited",
                );
                return Err(SyncError::Limiter { source_id: source_id.to_string(), retry_after });
            }
        }

        let lock = self.inner.lock_for(source_id);
        let guard = if options.wait {
            lock.lock_owned().await
        } else {
            lock.try_lock_owned().map_err(|_| {
                log_metric(
                    self.inner.metrics.record_rejection(SyncErrorKind::Busy),
                    "sync.trigger.busy",
                );
                SyncError::Busy(format!("a sync cycle for '{source_id}' is already running"))
            })?
        };

        self.inner.run_locked(source_id, fetcher, guard).await
    }

    /// Stop a source's timer and wait for its in-flight cycle.
    ///
    /// Idempotent; returns whether a timer was installed.
    pub async fn cancel(&self, source_id: &str) -> SchedulerResult<bool> {
        let (existed, _guard) = self.stop_schedule(source_id).await?;
        Ok(existed)
    }

    async fn stop_schedule(&self, source_id: &str) -> SchedulerResult<(bool, OwnedMutexGuard<()>)> {
        let schedule = self.inner.schedules.lock().remove(source_id);
        if let Some(schedule) = &schedule {
            schedule.cancel.cancel();
        }

        let guard = self.inner.lock_for(source_id).lock_owned().await;

        let existed = match schedule {
            Some(schedule) => {
                let join_timeout = self.inner.settings.join_timeout;
                tokio::time::timeout(join_timeout, schedule.handle)
                    .await
                    .map_err(|_| SchedulerError::Timeout { seconds: join_timeout.as_secs() })?
                    .map_err(|e| SchedulerError::TaskJoinFailed(e.to_string()))?;
                info!(source_id, "schedule cancelled");
                true
            }
            None => false,
        };
        Ok((existed, guard))
    }

    /// Run every enabled source concurrently.
    ///
    /// Each source runs in its own task so one failure, or a panic, never
    /// affects the others.
    pub async fn sync_all(&self) -> std::result::Result<SyncAllSummary, SyncError> {
        let started = Instant::now();
        let sources = self.inner.sources.list_sources().await.map_err(SyncError::store)?;

        let handles: Vec<(String, JoinHandle<_>)> = sources
            .into_iter()
            .filter(|source| source.enabled)
            .map(|source| {
                let orchestrator = self.clone();
                let source_id = source.id.clone();
                let handle = tokio::spawn(async move {
                    orchestrator
                        .trigger(&source_id, TriggerOptions { force: true, wait: true })
                        .await
                });
                (source.id, handle)
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (source_id, handle) in handles {
            let outcome = handle.await.unwrap_or_else(|e| {
                Err(SyncError::Cancelled(format!("sync task for '{source_id}' failed: {e}")))
            });
            results.push(SourceSyncResult::from_outcome(source_id, &outcome));
        }

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let summary = SyncAllSummary::from_results(results, duration_ms);
        info!(
            sources = summary.sources,
            fetched = summary.fetched,
            upserts = summary.upserts,
            errors = summary.errors,
            duration_ms,
            "sync-all finished"
        );
        Ok(summary)
    }

    /// Installed schedules, ordered by source id
    pub fn list_active(&self) -> Vec<ActiveSchedule> {
        let mut active: Vec<ActiveSchedule> = self
            .inner
            .schedules
            .lock()
            .iter()
            .map(|(source_id, schedule)| ActiveSchedule {
                source_id: source_id.clone(),
                interval_secs: schedule.interval.as_secs(),
                registered_at: schedule.registered_at,
                in_flight: self.inner.is_in_flight(source_id),
            })
            .collect();
        active.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        active
    }

    /// Number of sources with a lock entry
    pub fn tracked_lock_count(&self) -> usize {
        self.inner.locks.len()
    }

    pub fn connected_client_count(&self) -> usize {
        self.inner.broadcaster.client_count()
    }

    pub fn metrics(&self) -> SyncMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Persist a source and (re)install its schedule.
    ///
    /// Sync bookkeeping of an existing record with the same id is kept.
    pub async fn save_source(&self, source: CalendarSource) -> Result<CalendarSource> {
        source.validate()?;
        if self.inner.fetchers.get(source.kind).is_none() {
            return Err(SchedulerError::NoFetcher { kind: source.kind }.into());
        }

        let previous = self.inner.sources.get_source(&source.id).await?;
        let (source, kind) = match &previous {
            Some(previous) => (source.with_bookkeeping_from(previous), ChangeKind::Updated),
            None => (source, ChangeKind::Created),
        };

        self.inner.sources.save_source(&source).await?;
        self.register(&source)?;
        self.inner.broadcaster.publish(ChangeNotice::calendar(
            kind,
            source.id.clone(),
            Some(source.id.clone()),
        ));
        info!(source_id = %source.id, change = %kind, "source saved");
        Ok(source)
    }

    /// Cancel a source's schedule, then delete its events and record.
    ///
    /// Returns whether the source existed.
    pub async fn delete_source(&self, source_id: &str) -> Result<bool> {
        let (_, guard) = self.stop_schedule(source_id).await?;

        let deleted_events = self.inner.events.delete_by_source(source_id).await?;
        let existed = self.inner.sources.delete_source(source_id).await?;
        self.inner.last_started.remove(source_id);
        drop(guard);
        // Queued triggers still hold a clone; their entry stays until they finish
        self.inner.locks.remove_if(source_id, |_, lock| Arc::strong_count(lock) == 1);

        if existed || deleted_events > 0 {
            self.inner.broadcaster.publish(ChangeNotice::calendar(
                ChangeKind::Deleted,
                source_id,
                Some(source_id.to_string()),
            ));
        }
        info!(source_id, existed, deleted_events, "source deleted");
        Ok(existed)
    }

    /// Upsert configured sources, keeping stored bookkeeping
    pub async fn seed_sources(&self, configured: &[SourceConfig]) -> Result<usize> {
        for entry in configured {
            let source = entry.to_source();
            source.validate().map_err(|e| HomeboardError::Config(e.to_string()))?;
            let source = match self.inner.sources.get_source(&source.id).await? {
                Some(previous) => source.with_bookkeeping_from(&previous),
                None => source,
            };
            self.inner.sources.save_source(&source).await?;
        }
        debug!(sources = configured.len(), "configured sources seeded");
        Ok(configured.len())
    }

    /// Cancel every timer and wait for the tasks to exit
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let schedules: Vec<(String, Schedule)> = self.inner.schedules.lock().drain().collect();
        let join_timeout = self.inner.settings.join_timeout;

        for (source_id, schedule) in schedules {
            schedule.cancel.cancel();
            match tokio::time::timeout(join_timeout, schedule.handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(source_id = %source_id, error = %err, "schedule task failed"),
                Err(_) => warn!(source_id = %source_id, "schedule task did not stop in time"),
            }
        }
        info!("sync orchestrator stopped");
    }
}

/// Timer task for one source. The first cycle runs immediately.
async fn schedule_loop(
    inner: Arc<Inner>,
    source_id: String,
    kind: SourceKind,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(fetcher) = inner.fetchers.get(kind) else {
            warn!(source_id = %source_id, %kind, "no fetcher for scheduled source");
            break;
        };

        let lock = inner.lock_for(&source_id);
        let guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            guard = lock.lock_owned() => guard,
        };
        if cancel.is_cancelled() {
            break;
        }

        match inner.run_locked(&source_id, fetcher, guard).await {
            Ok(_) => {}
            Err(SyncError::NotFound(_)) => {
                warn!(source_id = %source_id, "scheduled source no longer exists");
                break;
            }
            Err(err) => debug!(source_id = %source_id, error = %err, "scheduled cycle failed"),
        }
    }

    debug!(source_id = %source_id, "schedule loop exited");
}
