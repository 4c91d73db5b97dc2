//! Household member directory using SQLite

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use homeboard_core::UserDirectory;
use homeboard_domain::Result as DomainResult;
use rusqlite::params;
use tokio::task;

use super::manager::{map_join_error, map_sql_error, DbManager};

/// One household member with a display colour
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HouseholdMember {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub color: String,
}

/// SQLite-backed implementation of [`UserDirectory`]
pub struct SqliteUserDirectory {
    db: Arc<DbManager>,
}

impl SqliteUserDirectory {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }

    /// Insert or replace a member
    pub async fn save_member(&self, member: &HouseholdMember) -> DomainResult<()> {
        let db = Arc::clone(&self.db);
        let member = member.clone();

        task::spawn_blocking(move || -> DomainResult<()> {
            let conn = db.get_connection()?;
            conn.execute(
                "INSERT OR REPLACE INTO household_members (id, name, email, color)
                 VALUES (?1, ?2, ?3, ?4)",
                params![member.id, member.name, member.email, member.color],
            )
            .map_err(map_sql_error)?;
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }
}

#[async_trait]
impl UserDirectory for SqliteUserDirectory {
    async fn member_colors(&self) -> DomainResult<HashMap<String, String>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> DomainResult<HashMap<String, String>> {
            let conn = db.get_connection()?;
            let mut stmt = conn
                .prepare("SELECT name, email, color FROM household_members ORDER BY id")
                .map_err(map_sql_error)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })
                .map_err(map_sql_error)?;

            let mut colors = HashMap::new();
            for row in rows {
                let (name, email, color) = row.map_err(map_sql_error)?;
                if let Some(email) = email.filter(|e| !e.trim().is_empty()) {
                    colors.insert(email.trim().to_lowercase(), color.clone());
                }
                colors.entry(name.trim().to_lowercase()).or_insert(color);
            }
            Ok(colors)
        })
        .await
        .map_err(map_join_error)?
    }
}
