//! SQLite repositories against the real schema: upsert uniqueness, window
//! queries, bookkeeping counters and cascading deletes.

mod support;

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use homeboard_core::sync::NoopNotifier;
use homeboard_core::{
    EventStore, ExecutorSettings, NativeEventRepository, SourceRepository, SyncExecutor,
    UserDirectory,
};
use homeboard_domain::{NativeEvent, SourceKind, SourceOptions, SyncedEvent, WritePolicy};
use homeboard_infra::database::HouseholdMember;
use homeboard_infra::{
    ConfigCredentialStore, SqliteEventStore, SqliteNativeEventRepository, SqliteSourceRepository,
    SqliteUserDirectory,
};
use support::{canonical, source, window, ScriptedFetcher, TestDatabase};
use uuid::Uuid;

#[tokio::test(flavor = "multi_thread")]
async fn sources_round_trip_with_options_and_bookkeeping() {
    let db = TestDatabase::new();
    let repo = SqliteSourceRepository::new(Arc::clone(&db.manager));

    let mut family = source("family", SourceKind::VendorApi, "https://api.test");
    family.credential_ref = Some("google".into());
    family.write_policy = WritePolicy::Writable;
    family.options = SourceOptions {
        resolve_participant_colors: true,
        lookahead_days: Some(30),
        calendar_id: Some("family@group.calendar.google.com".into()),
        ..SourceOptions::default()
    };
    repo.save_source(&family).await.unwrap();
    repo.save_source(&source("school", SourceKind::IcsFeed, "webcal://school.test/cal.ics"))
        .await
        .unwrap();

    let stored = repo.get_source("family").await.unwrap().unwrap();
    assert_eq!(stored, family);
    assert_eq!(repo.list_sources().await.unwrap().len(), 2);
    assert!(repo.get_source("missing").await.unwrap().is_none());

    let at = Utc.with_ymd_and_hms(2024, 3, 4, 9, 30, 0).unwrap();
    repo.record_sync_failure("family", at, "HTTP 502").await.unwrap();
    repo.record_sync_failure("family", at, "HTTP 503").await.unwrap();
    let failed = repo.get_source("family").await.unwrap().unwrap();
    assert_eq!(failed.consecutive_errors, 2);
    assert_eq!(failed.last_error.as_deref(), Some("HTTP 503"));
    assert!(failed.last_sync_at.is_none());

    repo.record_sync_success("family", at, Some("sync-token")).await.unwrap();
    let healed = repo.get_source("family").await.unwrap().unwrap();
    assert_eq!(healed.consecutive_errors, 0);
    assert_eq!(healed.last_sync_at, Some(at));
    assert_eq!(healed.sync_cursor.as_deref(), Some("sync-token"));

    assert!(repo.record_sync_success("missing", at, None).await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_failures_are_counted_atomically() {
    let db = TestDatabase::new();
    let repo = Arc::new(SqliteSourceRepository::new(Arc::clone(&db.manager)));
    repo.save_source(&source("flaky", SourceKind::CalDav, "https://dav.test")).await.unwrap();

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let repo = Arc::clone(&repo);
            tokio::spawn(async move {
                repo.record_sync_failure("flaky", Utc::now(), &format!("failure {i}")).await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stored = repo.get_source("flaky").await.unwrap().unwrap();
    assert_eq!(stored.consecutive_errors, 16);
}

#[tokio::test(flavor = "multi_thread")]
async fn resaving_a_source_never_rolls_back_bookkeeping() {
    let db = TestDatabase::new();
    let repo = SqliteSourceRepository::new(Arc::clone(&db.manager));
    let school = source("school", SourceKind::IcsFeed, "https://school.test/cal.ics");
    repo.save_source(&school).await.unwrap();

    // A cycle commits between an edit reading the record and saving it
    let stale = repo.get_source("school").await.unwrap().unwrap();
    let at = Utc.with_ymd_and_hms(2024, 3, 4, 9, 30, 0).unwrap();
    repo.record_sync_failure("school", at, "HTTP 502").await.unwrap();
    repo.record_sync_success("school", at, Some("etag-1")).await.unwrap();
    repo.record_sync_failure("school", at, "HTTP 503").await.unwrap();

    let mut renamed = stale.clone();
    renamed.name = "School calendar".into();
    repo.save_source(&renamed).await.unwrap();
    let stored = repo.get_source("school").await.unwrap().unwrap();
    assert_eq!(stored.name, "School calendar");
    assert_eq!(stored.last_sync_at, Some(at));
    assert_eq!(stored.consecutive_errors, 1);
    assert_eq!(stored.last_error.as_deref(), Some("HTTP 503"));
    assert_eq!(stored.sync_cursor.as_deref(), Some("etag-1"));

    let mut moved = stale;
    moved.url = "https://school.test/other.ics".into();
    repo.save_source(&moved).await.unwrap();
    let stored = repo.get_source("school").await.unwrap().unwrap();
    assert_eq!(stored.url, "https://school.test/other.ics");
    assert!(stored.sync_cursor.is_none(), "a new url starts without a cursor");
    assert_eq!(stored.last_sync_at, Some(at));
}

#[tokio::test(flavor = "multi_thread")]
async fn events_upsert_in_place_and_query_by_window() {
    let db = TestDatabase::new();
    let sources = SqliteSourceRepository::new(Arc::clone(&db.manager));
    let store = SqliteEventStore::new(Arc::clone(&db.manager));
    sources.save_source(&source("family", SourceKind::IcsFeed, "https://feed.test")).await.unwrap();

    let monday = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
    let first = SyncedEvent::from_canonical("family", &canonical("evt-1", "Swim", monday), monday);
    store.upsert_event(&first).await.unwrap();

    let mut renamed = canonical("evt-1", "Swimming", monday);
    renamed.participants = vec!["mia@example.org".into()];
    store
        .upsert_event(&SyncedEvent::from_canonical("family", &renamed, monday))
        .await
        .unwrap();
    store
        .upsert_event(&SyncedEvent::from_canonical(
            "family",
            &canonical("evt-2", "Dentist", monday + ChronoDuration::days(10)),
            monday,
        ))
        .await
        .unwrap();

    let all = store.find_by_source("family").await.unwrap();
    assert_eq!(all.len(), 2);
    let evt1 = all.iter().find(|e| e.external_id == "evt-1").unwrap();
    assert_eq!(evt1.title, "Swimming");
    assert_eq!(evt1.participants, vec!["mia@example.org"]);

    let week = store.find_in_window("family", window(monday - ChronoDuration::days(1), 7)).await.unwrap();
    assert_eq!(week.len(), 1);
    assert_eq!(week[0].external_id, "evt-1");

    // The event ends exactly at the window start, so it does not overlap
    let after = store.find_in_window("family", window(monday + ChronoDuration::hours(1), 1)).await.unwrap();
    assert!(after.is_empty());

    assert!(store.delete_event("family", "evt-1").await.unwrap());
    assert!(!store.delete_event("family", "evt-1").await.unwrap());
    assert_eq!(store.delete_by_source("family").await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn deleting_a_source_cascades_to_its_events() {
    let db = TestDatabase::new();
    let sources = SqliteSourceRepository::new(Arc::clone(&db.manager));
    let store = SqliteEventStore::new(Arc::clone(&db.manager));
    sources.save_source(&source("family", SourceKind::Roster, "https://roster.test")).await.unwrap();

    let now = Utc::now();
    store
        .upsert_event(&SyncedEvent::from_canonical("family", &canonical("s-1", "Shift", now), now))
        .await
        .unwrap();

    assert!(sources.delete_source("family").await.unwrap());
    assert!(store.find_by_source("family").await.unwrap().is_empty());
    assert!(!sources.delete_source("family").await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn events_for_unknown_sources_are_rejected() {
    let db = TestDatabase::new();
    let store = SqliteEventStore::new(Arc::clone(&db.manager));
    let now = Utc::now();

    let orphan = SyncedEvent::from_canonical("ghost", &canonical("e", "Orphan", now), now);
    assert!(store.upsert_event(&orphan).await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn native_events_and_members_are_readable() {
    let db = TestDatabase::new();
    let natives = SqliteNativeEventRepository::new(Arc::clone(&db.manager));
    let members = SqliteUserDirectory::new(Arc::clone(&db.manager));

    let start = Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap();
    let bins = NativeEvent {
        id: Uuid::new_v4(),
        title: "Bins out".into(),
        description: None,
        start,
        end: start + ChronoDuration::days(1),
        all_day: true,
        location: None,
        color: Some("#16a34a".into()),
    };
    natives.save_native(&bins).await.unwrap();

    let found = natives.find_native_in_window(window(start, 1)).await.unwrap();
    assert_eq!(found, vec![bins]);
    assert!(natives.find_native_in_window(window(start + ChronoDuration::days(2), 1)).await.unwrap().is_empty());

    members
        .save_member(&HouseholdMember {
            id: "m1".into(),
            name: "Mia".into(),
            email: Some("Mia@Example.org".into()),
            color: "#f43f5e".into(),
        })
        .await
        .unwrap();
    let colors = members.member_colors().await.unwrap();
    assert_eq!(colors.get("mia@example.org").map(String::as_str), Some("#f43f5e"));
    assert_eq!(colors.get("mia").map(String::as_str), Some("#f43f5e"));
}

#[tokio::test(flavor = "multi_thread")]
async fn executor_cycles_against_sqlite() {
    let db = TestDatabase::new();
    let sources = Arc::new(SqliteSourceRepository::new(Arc::clone(&db.manager)));
    let store = Arc::new(SqliteEventStore::new(Arc::clone(&db.manager)));
    sources.save_source(&source("roster", SourceKind::Roster, "https://roster.test")).await.unwrap();

    let fetcher = ScriptedFetcher::new(SourceKind::Roster, Duration::ZERO);
    let now = Utc::now();
    fetcher.set_events(vec![canonical("s-1", "Early", now), canonical("s-2", "Late", now)]);

    let executor = SyncExecutor::new(
        sources.clone(),
        store.clone(),
        Arc::new(ConfigCredentialStore::default()),
        Arc::new(NoopNotifier),
        ExecutorSettings::default(),
    );

    let first = executor.run_cycle("roster", &fetcher).await.unwrap();
    assert_eq!((first.fetched, first.new, first.updated, first.deleted), (2, 2, 0, 0));

    fetcher.set_events(vec![canonical("s-2", "Late shift", now)]);
    let second = executor.run_cycle("roster", &fetcher).await.unwrap();
    assert_eq!((second.new, second.updated, second.deleted), (0, 1, 1));

    let stored = store.find_by_source("roster").await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].title, "Late shift");
    assert!(sources.get_source("roster").await.unwrap().unwrap().last_sync_at.is_some());
}
