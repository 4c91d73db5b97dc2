//! Native (locally authored) event repository using SQLite

use std::sync::Arc;

use async_trait::async_trait;
use homeboard_core::NativeEventRepository;
use homeboard_domain::{NativeEvent, Result as DomainResult, TimeWindow};
use rusqlite::types::Type;
use rusqlite::{params, Row};
use tokio::task;
use uuid::Uuid;

use super::manager::{from_millis, map_join_error, map_sql_error, to_millis, DbManager};

/// SQLite-backed implementation of [`NativeEventRepository`]
pub struct SqliteNativeEventRepository {
    db: Arc<DbManager>,
}

impl SqliteNativeEventRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }

    /// Insert or replace a native event
    pub async fn save_native(&self, event: &NativeEvent) -> DomainResult<()> {
        let db = Arc::clone(&self.db);
        let event = event.clone();

        task::spawn_blocking(move || -> DomainResult<()> {
            let conn = db.get_connection()?;
            conn.execute(
                "INSERT OR REPLACE INTO native_events
                     (id, title, description, start_ms, end_ms, all_day, location, color)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    event.id.to_string(),
                    event.title,
                    event.description,
                    to_millis(event.start),
                    to_millis(event.end),
                    event.all_day,
                    event.location,
                    event.color,
                ],
            )
            .map_err(map_sql_error)?;
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }
}

#[async_trait]
impl NativeEventRepository for SqliteNativeEventRepository {
    async fn find_native_in_window(&self, window: TimeWindow) -> DomainResult<Vec<NativeEvent>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> DomainResult<Vec<NativeEvent>> {
            let conn = db.get_connection()?;
            let mut stmt = conn
                .prepare(
                    "SELECT id, title, description, start_ms, end_ms, all_day, location, color
                     FROM native_events
                     WHERE start_ms < ?2 AND end_ms >= ?1
                     ORDER BY start_ms",
                )
                .map_err(map_sql_error)?;
            let rows = stmt
                .query_map(params![to_millis(window.start), to_millis(window.end)], map_native_row)
                .map_err(map_sql_error)?;
            let events = rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sql_error)?;
            Ok(events.into_iter().filter(|e| window.overlaps(e.start, e.end)).collect())
        })
        .await
        .map_err(map_join_error)?
    }
}

fn map_native_row(row: &Row<'_>) -> rusqlite::Result<NativeEvent> {
    let id: String = row.get(0)?;
    let id = Uuid::parse_str(&id)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;

    Ok(NativeEvent {
        id,
        title: row.get(1)?,
        description: row.get(2)?,
        start: from_millis(row.get(3)?)?,
        end: from_millis(row.get(4)?)?,
        all_day: row.get(5)?,
        location: row.get(6)?,
        color: row.get(7)?,
    })
}
