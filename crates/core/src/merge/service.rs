//! Unified, ordered view over native and synced events
//!
//! A merged read never fails. Each origin (native events, every enabled
//! source) is read independently; an origin that cannot be read is listed in
//! `failed_sources` and the result is flagged partial while the remaining
//! origins still contribute.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use futures::future::join_all;
use homeboard_domain::constants::DEFAULT_NATIVE_COLOR;
use homeboard_domain::{
    CalendarSource, EventOrigin, MergeConfig, MergedEvent, MergedEvents, NativeEvent, Result,
    SyncedEvent, TimeWindow,
};
use tracing::{debug, instrument, warn};

use super::post_process::EventPostProcessor;
use crate::calendar::ports::{EventStore, NativeEventRepository, SourceRepository};

/// Origin name reported in `failed_sources` when native events are unreadable
pub const NATIVE_ORIGIN: &str = "native";

/// Presentation rules of the merge
#[derive(Debug, Clone)]
pub struct MergeSettings {
    pub default_native_color: String,
    /// Household zone; all-day events span its local midnights
    pub timezone: Tz,
    pub dedupe_across_sources: bool,
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            default_native_color: DEFAULT_NATIVE_COLOR.to_string(),
            timezone: Tz::UTC,
            dedupe_across_sources: true,
        }
    }
}

impl MergeSettings {
    pub fn from_config(config: &MergeConfig) -> Result<Self> {
        Ok(Self {
            default_native_color: config.default_native_color.clone(),
            timezone: config.timezone()?,
            dedupe_across_sources: config.dedupe_across_sources,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupeKey {
    title: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    all_day: bool,
}

impl DedupeKey {
    fn of(event: &MergedEvent) -> Self {
        Self {
            title: event.title.trim().to_lowercase(),
            start: event.start,
            end: event.end,
            all_day: event.all_day,
        }
    }
}

/// Event merge service
pub struct MergeService {
    sources: Arc<dyn SourceRepository>,
    events: Arc<dyn EventStore>,
    native: Arc<dyn NativeEventRepository>,
    processors: Vec<Arc<dyn EventPostProcessor>>,
    settings: MergeSettings,
}

impl MergeService {
    pub fn new(
        sources: Arc<dyn SourceRepository>,
        events: Arc<dyn EventStore>,
        native: Arc<dyn NativeEventRepository>,
        settings: MergeSettings,
    ) -> Self {
        Self { sources, events, native, processors: Vec::new(), settings }
    }

    /// Add a post-processor to the service
    pub fn with_processor(mut self, processor: Arc<dyn EventPostProcessor>) -> Self {
        self.processors.push(processor);
        self
    }

    pub fn settings(&self) -> &MergeSettings {
        &self.settings
    }

    /// Events visible in `window`, ordered by start then title
    #[instrument(skip(self), fields(window = %window))]
    pub async fn merged_events(&self, window: TimeWindow) -> MergedEvents {
        let mut result = MergedEvents {
            window,
            events: Vec::new(),
            partial: false,
            failed_sources: Vec::new(),
            generated_at: Utc::now(),
            last_synced_at: None,
        };

        // All-day boundaries move with the household zone, so read a day wider
        let query = TimeWindow {
            start: window.start - chrono::Duration::days(1),
            end: window.end + chrono::Duration::days(1),
        };

        let (sources, native) =
            tokio::join!(self.sources.list_sources(), self.native.find_native_in_window(query));

        match native {
            Ok(native) => result
                .events
                .extend(native.into_iter().filter_map(|event| self.merge_native(event, window))),
            Err(err) => {
                warn!(error = %err, "native events unavailable for merge");
                result.partial = true;
                result.failed_sources.push(NATIVE_ORIGIN.to_string());
            }
        }

        let sources: Vec<CalendarSource> = match sources {
            Ok(sources) => sources.into_iter().filter(|source| source.enabled).collect(),
            Err(err) => {
                warn!(error = %err, "calendar sources unavailable for merge");
                result.partial = true;
                Vec::new()
            }
        };

        let reads = sources.iter().map(|source| async move {
            (source, self.events.find_in_window(&source.id, query).await)
        });

        let mut kept: HashMap<DedupeKey, String> = HashMap::new();
        for (source, outcome) in join_all(reads).await {
            let stored = match outcome {
                Ok(stored) => stored,
                Err(err) => {
                    warn!(source_id = %source.id, error = %err, "source events unavailable for merge");
                    result.partial = true;
                    result.failed_sources.push(source.id.clone());
                    continue;
                }
            };

            let mut merged: Vec<MergedEvent> = stored
                .into_iter()
                .filter_map(|event| self.merge_synced(source, event, window))
                .collect();
            self.post_process(source, &mut merged).await;

            if source.last_sync_at > result.last_synced_at {
                result.last_synced_at = source.last_sync_at;
            }

            for event in merged {
                if self.settings.dedupe_across_sources {
                    let owner = kept.entry(DedupeKey::of(&event)).or_insert_with(|| source.id.clone());
                    if *owner != source.id {
                        debug!(event_id = %event.id, kept_from = %owner, "duplicate event dropped");
                        continue;
                    }
                }
                result.events.push(event);
            }
        }

        result.events.sort_by(compare_events);
        result
    }

    async fn post_process(&self, source: &CalendarSource, events: &mut [MergedEvent]) {
        for processor in &self.processors {
            if !processor.applies_to(source) {
                continue;
            }
            if let Err(err) = processor.process(source, events).await {
                warn!(
                    source_id = %source.id,
                    processor = processor.name(),
                    error = %err,
                    "post-processor failed"
                );
            }
        }
    }

    fn merge_native(&self, event: NativeEvent, window: TimeWindow) -> Option<MergedEvent> {
        let (start, end) = self.visible_span(event.start, event.end, event.all_day);
        if !window.overlaps(start, end) {
            return None;
        }
        Some(MergedEvent {
            id: format!("{NATIVE_ORIGIN}:{}", event.id),
            title: event.title,
            description: event.description,
            start,
            end,
            all_day: event.all_day,
            location: event.location,
            color: event.color.unwrap_or_else(|| self.settings.default_native_color.clone()),
            participants: Vec::new(),
            origin: EventOrigin::Native { id: event.id.to_string() },
        })
    }

    fn merge_synced(
        &self,
        source: &CalendarSource,
        event: SyncedEvent,
        window: TimeWindow,
    ) -> Option<MergedEvent> {
        let (start, end) = self.visible_span(event.start, event.end, event.all_day);
        if !window.overlaps(start, end) {
            return None;
        }
        Some(MergedEvent {
            id: format!("{}:{}", source.id, event.external_id),
            title: event.title,
            description: event.description,
            start,
            end,
            all_day: event.all_day,
            location: event.location,
            color: event.color.unwrap_or_else(|| source.color.clone()),
            participants: event.participants,
            origin: EventOrigin::Synced {
                source_id: source.id.clone(),
                source_name: source.name.clone(),
                external_id: event.external_id,
            },
        })
    }

    /// All-day events are stored as UTC midnights of their dates; shift them
    /// to the household's local midnights.
    fn visible_span(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        all_day: bool,
    ) -> (DateTime<Utc>, DateTime<Utc>) {
        if !all_day {
            return (start, end);
        }

        let first = start.date_naive();
        let mut after_last = end.date_naive();
        if after_last <= first {
            after_last = first.succ_opt().unwrap_or(first);
        }
        (self.local_midnight(first), self.local_midnight(after_last))
    }

    fn local_midnight(&self, date: NaiveDate) -> DateTime<Utc> {
        let naive = date.and_time(NaiveTime::MIN);
        self.settings
            .timezone
            .from_local_datetime(&naive)
            .earliest()
            .map_or_else(|| naive.and_utc(), |local| local.with_timezone(&Utc))
    }
}

fn compare_events(a: &MergedEvent, b: &MergedEvent) -> Ordering {
    a.start.cmp(&b.start).then_with(|| a.title.cmp(&b.title)).then_with(|| a.id.cmp(&b.id))
}
