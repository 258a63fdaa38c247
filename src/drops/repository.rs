// Repository pattern - isolates all database side effects
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::db;
use crate::drops::domain::*;
use crate::state::DbPool;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] r2d2::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Database task interrupted: {0}")]
    Interrupted(String),
}

/// Drop catalog reads and writes.
///
/// Every mutation is a single read-modify-write unit and reports the
/// before/after pair so callers can dispatch document-write handlers.
#[async_trait]
pub trait DropRepository: Send + Sync {
    /// Full, unpaginated catalog scan
    async fn fetch_all(&self) -> Result<Vec<DropRecord>, RepositoryError>;

    async fn get(&self, id: &str) -> Result<Option<DropRecord>, RepositoryError>;

    /// Create or replace a drop. On replace, server-owned state (verdict,
    /// collectors, likes, creation time) is kept from the stored version.
    async fn put(&self, drop: &DropRecord) -> Result<DropWrite, RepositoryError>;

    /// Drops whose stored media reference equals `path`
    async fn find_by_media_path(&self, path: &str) -> Result<Vec<DropRecord>, RepositoryError>;

    /// Set `collectedBy[user] = true`; `None` when the drop does not exist
    async fn mark_collected(
        &self,
        id: &str,
        user_id: &str,
    ) -> Result<Option<DropWrite>, RepositoryError>;

    /// Like or unlike; no write happens when the state already matches
    async fn set_liked(
        &self,
        id: &str,
        user_id: &str,
        liked: bool,
    ) -> Result<Option<DropWrite>, RepositoryError>;
}

/// SQLite implementation
pub struct SqliteDropRepository {
    pool: DbPool,
}

impl SqliteDropRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const DROP_COLUMNS: &str = "id, lat, lng, created_by, group_code, is_deleted, content_type, text,
     media_storage_path, moderation, collected_by, liked_by, like_count, created_at";

/// Raw column values; JSON and enum decoding happens outside the row closure
struct DropRow {
    id: String,
    lat: f64,
    lng: f64,
    created_by: String,
    group_code: Option<String>,
    is_deleted: bool,
    content_type: String,
    text: Option<String>,
    media_storage_path: Option<String>,
    moderation: Option<String>,
    collected_by: String,
    liked_by: String,
    like_count: i64,
    created_at: String,
}

impl DropRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            lat: row.get(1)?,
            lng: row.get(2)?,
            created_by: row.get(3)?,
            group_code: row.get(4)?,
            is_deleted: row.get(5)?,
            content_type: row.get(6)?,
            text: row.get(7)?,
            media_storage_path: row.get(8)?,
            moderation: row.get(9)?,
            collected_by: row.get(10)?,
            liked_by: row.get(11)?,
            like_count: row.get(12)?,
            created_at: row.get(13)?,
        })
    }

    fn into_record(self) -> Result<DropRecord, RepositoryError> {
        let content_type = self
            .content_type
            .parse::<ContentType>()
            .map_err(RepositoryError::Corrupt)?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| RepositoryError::Corrupt(format!("created_at: {}", e)))?;
        let moderation = self
            .moderation
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        let collected_by: BTreeMap<String, bool> = serde_json::from_str(&self.collected_by)?;
        let liked_by: BTreeMap<String, bool> = serde_json::from_str(&self.liked_by)?;

        Ok(DropRecord {
            id: self.id,
            lat: self.lat,
            lng: self.lng,
            created_by: self.created_by,
            group_code: self.group_code,
            is_deleted: self.is_deleted,
            content_type,
            text: self.text,
            media_storage_path: self.media_storage_path,
            moderation,
            collected_by,
            liked_by,
            like_count: self.like_count.max(0) as u32,
            created_at,
        })
    }
}

/// Load one drop on an existing connection (usable inside a transaction)
pub(crate) fn load_drop(conn: &Connection, id: &str) -> Result<Option<DropRecord>, RepositoryError> {
    let sql = format!("SELECT {} FROM drops WHERE id = ?1", DROP_COLUMNS);
    let row = conn
        .query_row(&sql, params![id], DropRow::from_row)
        .optional()?;
    row.map(DropRow::into_record).transpose()
}

pub(crate) fn load_drops_by_media_path(
    conn: &Connection,
    path: &str,
) -> Result<Vec<DropRecord>, RepositoryError> {
    let sql = format!(
        "SELECT {} FROM drops WHERE media_storage_path = ?1 ORDER BY id",
        DROP_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![path], DropRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(DropRow::into_record).collect()
}

/// Upsert a drop on an existing connection
pub(crate) fn store_drop(conn: &Connection, drop: &DropRecord) -> Result<(), RepositoryError> {
    let moderation = drop
        .moderation
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        "INSERT INTO drops (id, lat, lng, created_by, group_code, is_deleted, content_type, text,
                            media_storage_path, moderation, collected_by, liked_by, like_count, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
         ON CONFLICT(id) DO UPDATE SET
           lat = excluded.lat,
           lng = excluded.lng,
           created_by = excluded.created_by,
           group_code = excluded.group_code,
           is_deleted = excluded.is_deleted,
           content_type = excluded.content_type,
           text = excluded.text,
           media_storage_path = excluded.media_storage_path,
           moderation = excluded.moderation,
           collected_by = excluded.collected_by,
           liked_by = excluded.liked_by,
           like_count = excluded.like_count,
           created_at = excluded.created_at",
        params![
            drop.id,
            drop.lat,
            drop.lng,
            drop.created_by,
            drop.group_code,
            drop.is_deleted,
            drop.content_type.as_str(),
            drop.text,
            drop.media_storage_path,
            moderation,
            serde_json::to_string(&drop.collected_by)?,
            serde_json::to_string(&drop.liked_by)?,
            drop.like_count as i64,
            drop.created_at.to_rfc3339(),
        ],
    )?;

    Ok(())
}

impl SqliteDropRepository {
    /// Atomic read-modify-write of one drop; `mutate` returns `None` for a no-op
    async fn update_with<F>(&self, id: &str, mutate: F) -> Result<Option<DropWrite>, RepositoryError>
    where
        F: FnOnce(&DropRecord) -> Option<DropRecord> + Send + 'static,
    {
        let id = id.to_string();

        db::immediate_blocking(&self.pool, move |conn| {
            let Some(before) = load_drop(conn, &id)? else {
                return Ok(None);
            };

            let after = match mutate(&before) {
                Some(updated) => {
                    store_drop(conn, &updated)?;
                    updated
                }
                None => before.clone(),
            };

            Ok(Some(DropWrite {
                before: Some(before),
                after: Some(after),
            }))
        })
        .await
    }
}

#[async_trait]
impl DropRepository for SqliteDropRepository {
    async fn fetch_all(&self) -> Result<Vec<DropRecord>, RepositoryError> {
        let conn = self.pool.get()?;

        let sql = format!("SELECT {} FROM drops ORDER BY id", DROP_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], DropRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(DropRow::into_record).collect()
    }

    async fn get(&self, id: &str) -> Result<Option<DropRecord>, RepositoryError> {
        let conn = self.pool.get()?;
        load_drop(&conn, id)
    }

    async fn put(&self, drop: &DropRecord) -> Result<DropWrite, RepositoryError> {
        let drop = drop.clone();

        db::immediate_blocking(&self.pool, move |conn| {
            let before = load_drop(conn, &drop.id)?;
            let mut after = match &before {
                Some(stored) => drop.edited_over(stored),
                None => drop,
            };
            // Keep like_count consistent with liked_by no matter what the caller sent
            after.like_count = after.liked_by.values().filter(|v| **v).count() as u32;

            store_drop(conn, &after)?;
            Ok(DropWrite {
                before,
                after: Some(after),
            })
        })
        .await
    }

    async fn find_by_media_path(&self, path: &str) -> Result<Vec<DropRecord>, RepositoryError> {
        let conn = self.pool.get()?;
        load_drops_by_media_path(&conn, path)
    }

    async fn mark_collected(
        &self,
        id: &str,
        user_id: &str,
    ) -> Result<Option<DropWrite>, RepositoryError> {
        let user_id = user_id.to_string();
        self.update_with(id, move |drop| match drop.with_collector(&user_id) {
            std::borrow::Cow::Borrowed(_) => None,
            std::borrow::Cow::Owned(updated) => Some(updated),
        })
        .await
    }

    async fn set_liked(
        &self,
        id: &str,
        user_id: &str,
        liked: bool,
    ) -> Result<Option<DropWrite>, RepositoryError> {
        let user_id = user_id.to_string();
        self.update_with(id, move |drop| match drop.set_liked(&user_id, liked) {
            std::borrow::Cow::Borrowed(_) => None,
            std::borrow::Cow::Owned(updated) => Some(updated),
        })
        .await
    }
}

/// Type alias for Arc-wrapped repository (for AppState)
pub type DynDropRepository = Arc<dyn DropRepository>;
