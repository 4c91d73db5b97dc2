//! Calendar source repository implementation using SQLite
//!
//! Sync bookkeeping is updated with single statements so error counts are
//! incremented atomically in the database, never read-modify-written.
//! Saving an existing source only replaces its configuration: bookkeeping
//! stays as the last cycle left it, and the cursor is cleared when the kind
//! or url changes.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use homeboard_core::SourceRepository;
use homeboard_domain::{CalendarSource, HomeboardError, Result as DomainResult, SourceOptions};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use tokio::task;

use super::manager::{from_optional_millis, map_join_error, map_sql_error, to_millis, DbManager};

const SOURCE_COLUMNS: &str = "id, kind, name, color, url, credential_ref, write_policy, enabled,
     options, last_sync_at, consecutive_errors, last_error_at, last_error, sync_cursor";

/// SQLite-backed implementation of [`SourceRepository`]
pub struct SqliteSourceRepository {
    db: Arc<DbManager>,
}

impl SqliteSourceRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SourceRepository for SqliteSourceRepository {
    async fn list_sources(&self) -> DomainResult<Vec<CalendarSource>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> DomainResult<Vec<CalendarSource>> {
            let conn = db.get_connection()?;
            let mut stmt = conn
                .prepare(&format!("SELECT {SOURCE_COLUMNS} FROM calendar_sources ORDER BY id"))
                .map_err(map_sql_error)?;
            let rows = stmt.query_map([], map_source_row).map_err(map_sql_error)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn get_source(&self, id: &str) -> DomainResult<Option<CalendarSource>> {
        let db = Arc::clone(&self.db);
        let id = id.to_string();

        task::spawn_blocking(move || -> DomainResult<Option<CalendarSource>> {
            let conn = db.get_connection()?;
            conn.query_row(
                &format!("SELECT {SOURCE_COLUMNS} FROM calendar_sources WHERE id = ?1"),
                params![&id],
                map_source_row,
            )
            .optional()
            .map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn save_source(&self, source: &CalendarSource) -> DomainResult<()> {
        let db = Arc::clone(&self.db);
        let source = source.clone();

        task::spawn_blocking(move || -> DomainResult<()> {
            let conn = db.get_connection()?;
            let options = serde_json::to_string(&source.options)
                .map_err(|e| HomeboardError::Internal(format!("serialize source options: {e}")))?;
            conn.execute(
                "INSERT INTO calendar_sources (id, kind, name, color, url, credential_ref,
                     write_policy, enabled, options, last_sync_at, consecutive_errors,
                     last_error_at, last_error, sync_cursor)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                 ON CONFLICT(id) DO UPDATE SET
                     kind = excluded.kind,
                     name = excluded.name,
                     color = excluded.color,
                     url = excluded.url,
                     credential_ref = excluded.credential_ref,
                     write_policy = excluded.write_policy,
                     enabled = excluded.enabled,
                     options = excluded.options,
                     sync_cursor = CASE
                         WHEN calendar_sources.kind = excluded.kind
                             AND calendar_sources.url = excluded.url
                         THEN calendar_sources.sync_cursor
                         ELSE NULL
                     END",
                params![
                    source.id,
                    source.kind.to_string(),
                    source.name,
                    source.color,
                    source.url,
                    source.credential_ref,
                    source.write_policy.to_string(),
                    source.enabled,
                    options,
                    source.last_sync_at.map(to_millis),
                    source.consecutive_errors,
                    source.last_error_at.map(to_millis),
                    source.last_error,
                    source.sync_cursor,
                ],
            )
            .map_err(map_sql_error)?;
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }

    async fn delete_source(&self, id: &str) -> DomainResult<bool> {
        let db = Arc::clone(&self.db);
        let id = id.to_string();

        task::spawn_blocking(move || -> DomainResult<bool> {
            let conn = db.get_connection()?;
            let deleted = conn
                .execute("DELETE FROM calendar_sources WHERE id = ?1", params![&id])
                .map_err(map_sql_error)?;
            Ok(deleted > 0)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn record_sync_success(
        &self,
        id: &str,
        at: DateTime<Utc>,
        cursor: Option<&str>,
    ) -> DomainResult<()> {
        let db = Arc::clone(&self.db);
        let id = id.to_string();
        let cursor = cursor.map(str::to_string);

        task::spawn_blocking(move || -> DomainResult<()> {
            let conn = db.get_connection()?;
            let updated = conn
                .execute(
                    "UPDATE calendar_sources
                     SET last_sync_at = ?2, sync_cursor = ?3, consecutive_errors = 0
                     WHERE id = ?1",
                    params![&id, to_millis(at), cursor],
                )
                .map_err(map_sql_error)?;
            ensure_updated(updated, &id)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn record_sync_failure(
        &self,
        id: &str,
        at: DateTime<Utc>,
        message: &str,
    ) -> DomainResult<()> {
        let db = Arc::clone(&self.db);
        let id = id.to_string();
        let message = message.to_string();

        task::spawn_blocking(move || -> DomainResult<()> {
            let conn = db.get_connection()?;
            let updated = conn
                .execute(
                    "UPDATE calendar_sources
                     SET consecutive_errors = consecutive_errors + 1,
                         last_error_at = ?2,
                         last_error = ?3
                     WHERE id = ?1",
                    params![&id, to_millis(at), message],
                )
                .map_err(map_sql_error)?;
            ensure_updated(updated, &id)
        })
        .await
        .map_err(map_join_error)?
    }
}

fn ensure_updated(rows: usize, id: &str) -> DomainResult<()> {
    if rows == 0 {
        return Err(HomeboardError::NotFound(format!("calendar source {id}")));
    }
    Ok(())
}

fn parse_column<T: FromStr<Err = String>>(idx: usize, value: &str) -> rusqlite::Result<T> {
    value
        .parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn map_source_row(row: &Row<'_>) -> rusqlite::Result<CalendarSource> {
    let kind: String = row.get(1)?;
    let write_policy: String = row.get(6)?;
    let options: String = row.get(8)?;
    let options: SourceOptions = serde_json::from_str(&options)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?;

    Ok(CalendarSource {
        id: row.get(0)?,
        kind: parse_column(1, &kind)?,
        name: row.get(2)?,
        color: row.get(3)?,
        url: row.get(4)?,
        credential_ref: row.get(5)?,
        write_policy: parse_column(6, &write_policy)?,
        enabled: row.get(7)?,
        options,
        last_sync_at: from_optional_millis(row.get(9)?)?,
        consecutive_errors: row.get(10)?,
        last_error_at: from_optional_millis(row.get(11)?)?,
        last_error: row.get(12)?,
        sync_cursor: row.get(13)?,
    })
}
