//! Database connection manager backed by an r2d2 SQLite pool.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use homeboard_domain::{HomeboardError, Result};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use tokio::task;
use tracing::info;

use crate::errors::InfraError;

const SCHEMA_VERSION: i32 = 1;
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Pool of SQLite connections
pub type SqlitePool = r2d2::Pool<SqliteConnectionManager>;
/// Connection checked out of a [`SqlitePool`]
pub type SqliteConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Database manager that wraps a [`SqlitePool`].
pub struct DbManager {
    pool: SqlitePool,
    path: PathBuf,
}

impl DbManager {
    /// Open (or create) the database file with the given pool size.
    pub fn new<P: AsRef<Path>>(db_path: P, pool_size: u32) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();

        let manager = SqliteConnectionManager::file(&path).with_init(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
            )
        });
        let pool = r2d2::Pool::builder()
            .max_size(pool_size.max(1))
            .build(manager)
            .map_err(|e| HomeboardError::from(InfraError::from(e)))?;

        info!(db_path = %path.display(), max_connections = pool.max_size(), "sqlite pool initialised");

        Ok(Self { pool, path })
    }

    /// Borrow the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Acquire a connection from the pool.
    pub fn get_connection(&self) -> Result<SqliteConnection> {
        self.pool.get().map_err(|e| HomeboardError::from(InfraError::from(e)))
    }

    /// Ensure the full schema exists on the current database.
    pub fn run_migrations(&self) -> Result<()> {
        let conn = self.get_connection()?;
        conn.execute_batch(SCHEMA_SQL).map_err(map_sql_error)?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?1, CAST(strftime('%s','now') AS INTEGER))",
            params![SCHEMA_VERSION],
        )
        .map_err(map_sql_error)?;
        Ok(())
    }

    /// Return the configured database path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Verify the database is reachable and answering queries.
    pub fn health_check(&self) -> Result<()> {
        let conn = self.get_connection()?;
        conn.query_row("SELECT 1", params![], |row| row.get::<_, i32>(0)).map_err(map_sql_error)?;
        Ok(())
    }
}

pub(crate) fn map_sql_error(err: rusqlite::Error) -> HomeboardError {
    HomeboardError::from(InfraError::from(err))
}

pub(crate) fn map_join_error(err: task::JoinError) -> HomeboardError {
    if err.is_cancelled() {
        HomeboardError::Internal("blocking database task cancelled".into())
    } else {
        HomeboardError::Internal(format!("blocking database task failed: {err}"))
    }
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Integer,
            format!("timestamp {ms} out of range").into(),
        )
    })
}

pub(crate) fn from_optional_millis(ms: Option<i64>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    ms.map(from_millis).transpose()
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn migrations_create_schema_version() {
        let temp_dir = TempDir::new().unwrap();
        let manager = DbManager::new(temp_dir.path().join("test.db"), 2).unwrap();
        manager.run_migrations().unwrap();
        manager.run_migrations().unwrap();

        let conn = manager.get_connection().unwrap();
        let version: i32 =
            conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0)).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn health_check_succeeds_for_valid_database() {
        let temp_dir = TempDir::new().unwrap();
        let manager = DbManager::new(temp_dir.path().join("test.db"), 2).unwrap();
        manager.run_migrations().unwrap();
        manager.health_check().unwrap();
        assert!(manager.path().ends_with("test.db"));
    }

    #[test]
    fn millisecond_timestamps_round_trip() {
        let at = DateTime::from_timestamp_millis(1_709_546_400_123).unwrap();
        assert_eq!(from_millis(to_millis(at)).unwrap(), at);
        assert!(from_millis(i64::MAX).is_err());
    }
}
