//! Synced event store implementation using SQLite
//!
//! Every write is a single-row statement keyed by `(source_id, external_id)`.
//! Window reads pre-filter in SQL and apply the exact overlap rule of
//! [`TimeWindow::overlaps`] afterwards.

use std::sync::Arc;

use async_trait::async_trait;
use homeboard_core::EventStore;
use homeboard_domain::{HomeboardError, Result as DomainResult, SyncedEvent, TimeWindow};
use rusqlite::types::Type;
use rusqlite::{params, Row};
use tokio::task;

use super::manager::{from_millis, map_join_error, map_sql_error, to_millis, DbManager};

const EVENT_COLUMNS: &str = "source_id, external_id, title, description, start_ms, end_ms,
     all_day, location, color, participants, version, content_hash, updated_at_ms";

/// SQLite-backed implementation of [`EventStore`]
pub struct SqliteEventStore {
    db: Arc<DbManager>,
}

impl SqliteEventStore {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn upsert_event(&self, event: &SyncedEvent) -> DomainResult<()> {
        let db = Arc::clone(&self.db);
        let event = event.clone();

        task::spawn_blocking(move || -> DomainResult<()> {
            let conn = db.get_connection()?;
            let participants = serde_json::to_string(&event.participants)
                .map_err(|e| HomeboardError::Internal(format!("serialize participants: {e}")))?;
            conn.execute(
                "INSERT INTO synced_events (source_id, external_id, title, description, start_ms,
                     end_ms, all_day, location, color, participants, version, content_hash,
                     updated_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT(source_id, external_id) DO UPDATE SET
                     title = excluded.title,
                     description = excluded.description,
                     start_ms = excluded.start_ms,
                     end_ms = excluded.end_ms,
                     all_day = excluded.all_day,
                     location = excluded.location,
                     color = excluded.color,
                     participants = excluded.participants,
                     version = excluded.version,
                     content_hash = excluded.content_hash,
                     updated_at_ms = excluded.updated_at_ms",
                params![
                    event.source_id,
                    event.external_id,
                    event.title,
                    event.description,
                    to_millis(event.start),
                    to_millis(event.end),
                    event.all_day,
                    event.location,
                    event.color,
                    participants,
                    event.version,
                    event.content_hash,
                    to_millis(event.updated_at),
                ],
            )
            .map_err(map_sql_error)?;
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }

    async fn find_by_source(&self, source_id: &str) -> DomainResult<Vec<SyncedEvent>> {
        let db = Arc::clone(&self.db);
        let source_id = source_id.to_string();

        task::spawn_blocking(move || -> DomainResult<Vec<SyncedEvent>> {
            let conn = db.get_connection()?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {EVENT_COLUMNS} FROM synced_events WHERE source_id = ?1 ORDER BY start_ms"
                ))
                .map_err(map_sql_error)?;
            let rows = stmt.query_map(params![&source_id], map_event_row).map_err(map_sql_error)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn find_in_window(
        &self,
        source_id: &str,
        window: TimeWindow,
    ) -> DomainResult<Vec<SyncedEvent>> {
        let db = Arc::clone(&self.db);
        let source_id = source_id.to_string();

        task::spawn_blocking(move || -> DomainResult<Vec<SyncedEvent>> {
            let conn = db.get_connection()?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {EVENT_COLUMNS} FROM synced_events
                     WHERE source_id = ?1 AND start_ms < ?3 AND end_ms >= ?2
                     ORDER BY start_ms"
                ))
                .map_err(map_sql_error)?;
            let rows = stmt
                .query_map(
                    params![&source_id, to_millis(window.start), to_millis(window.end)],
                    map_event_row,
                )
                .map_err(map_sql_error)?;
            let events = rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sql_error)?;
            Ok(events.into_iter().filter(|e| window.overlaps(e.start, e.end)).collect())
        })
        .await
        .map_err(map_join_error)?
    }

    async fn delete_event(&self, source_id: &str, external_id: &str) -> DomainResult<bool> {
        let db = Arc::clone(&self.db);
        let source_id = source_id.to_string();
        let external_id = external_id.to_string();

        task::spawn_blocking(move || -> DomainResult<bool> {
            let conn = db.get_connection()?;
            let deleted = conn
                .execute(
                    "DELETE FROM synced_events WHERE source_id = ?1 AND external_id = ?2",
                    params![&source_id, &external_id],
                )
                .map_err(map_sql_error)?;
            Ok(deleted > 0)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn delete_by_source(&self, source_id: &str) -> DomainResult<usize> {
        let db = Arc::clone(&self.db);
        let source_id = source_id.to_string();

        task::spawn_blocking(move || -> DomainResult<usize> {
            let conn = db.get_connection()?;
            conn.execute("DELETE FROM synced_events WHERE source_id = ?1", params![&source_id])
                .map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }
}

fn map_event_row(row: &Row<'_>) -> rusqlite::Result<SyncedEvent> {
    let participants: String = row.get(9)?;
    let participants: Vec<String> = serde_json::from_str(&participants)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e)))?;

    Ok(SyncedEvent {
        source_id: row.get(0)?,
        external_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        start: from_millis(row.get(4)?)?,
        end: from_millis(row.get(5)?)?,
        all_day: row.get(6)?,
        location: row.get(7)?,
        color: row.get(8)?,
        participants,
        version: row.get(10)?,
        content_hash: row.get(11)?,
        updated_at: from_millis(row.get(12)?)?,
    })
}
