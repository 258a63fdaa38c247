// Pending-verdict queue plus the atomic drop merges that consume it
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;

use crate::db;
use crate::drops::repository::{load_drop, load_drops_by_media_path, store_drop};
use crate::drops::RepositoryError;
use crate::moderation::ModerationVerdict;
use crate::state::DbPool;

/// Result of applying a freshly computed verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// Merged into this many drops; any stale queue entry was removed
    Merged(usize),
    /// No drop references the path yet, verdict parked in the queue
    Queued,
    /// No drop and no verdict: nothing to park
    Skipped,
}

/// Result of draining the queue for one written drop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// No queue entry for the drop's media
    NoEntry,
    /// Entry held the "no verdict" sentinel and was removed
    Sentinel,
    /// Verdict merged into the drop and the entry removed
    Merged,
    /// The drop no longer exists; entry left in place
    StaleDrop,
}

#[async_trait]
pub trait ModerationStore: Send + Sync {
    /// Merge `verdict` into every drop referencing `path`, or park it under
    /// `key` when none exists. One atomic unit.
    async fn finalize(
        &self,
        path: &str,
        key: &str,
        verdict: Option<&ModerationVerdict>,
    ) -> Result<FinalizeOutcome, RepositoryError>;

    /// Consume the queue entry under `key` into drop `drop_id`. One atomic unit.
    async fn drain_into(&self, drop_id: &str, key: &str) -> Result<DrainOutcome, RepositoryError>;

    /// Read a parked entry; the inner `None` is the sentinel
    async fn pending(&self, key: &str) -> Result<Option<Option<ModerationVerdict>>, RepositoryError>;
}

pub struct SqliteModerationStore {
    pool: DbPool,
}

impl SqliteModerationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn read_entry(
    conn: &Connection,
    key: &str,
) -> Result<Option<Option<ModerationVerdict>>, RepositoryError> {
    let raw: Option<Option<String>> = conn
        .query_row(
            "SELECT verdict FROM moderation_queue WHERE path_key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;

    match raw {
        None => Ok(None),
        Some(None) => Ok(Some(None)),
        Some(Some(json)) => Ok(Some(Some(serde_json::from_str(&json)?))),
    }
}

fn delete_entry(conn: &Connection, key: &str) -> Result<bool, RepositoryError> {
    let rows = conn.execute(
        "DELETE FROM moderation_queue WHERE path_key = ?1",
        params![key],
    )?;
    Ok(rows > 0)
}

#[async_trait]
impl ModerationStore for SqliteModerationStore {
    async fn finalize(
        &self,
        path: &str,
        key: &str,
        verdict: Option<&ModerationVerdict>,
    ) -> Result<FinalizeOutcome, RepositoryError> {
        let path = path.to_string();
        let key = key.to_string();
        let verdict = verdict.cloned();

        db::immediate_blocking(&self.pool, move |conn| {
            let drops = load_drops_by_media_path(conn, &path)?;

            if drops.is_empty() {
                let payload = verdict.as_ref().map(serde_json::to_string).transpose()?;
                conn.execute(
                    "INSERT INTO moderation_queue (path_key, verdict) VALUES (?1, ?2)
                     ON CONFLICT(path_key) DO UPDATE SET verdict = excluded.verdict",
                    params![key, payload],
                )?;
                return Ok(FinalizeOutcome::Queued);
            }

            let Some(verdict) = verdict.as_ref() else {
                delete_entry(conn, &key)?;
                return Ok(FinalizeOutcome::Skipped);
            };

            for mut drop in drops.iter().cloned() {
                let merged = ModerationVerdict::merged(drop.moderation.as_ref(), verdict);
                if drop.moderation.as_ref() != Some(&merged) {
                    drop.moderation = Some(merged);
                    store_drop(conn, &drop)?;
                }
            }
            delete_entry(conn, &key)?;

            Ok(FinalizeOutcome::Merged(drops.len()))
        })
        .await
    }

    async fn drain_into(&self, drop_id: &str, key: &str) -> Result<DrainOutcome, RepositoryError> {
        let drop_id = drop_id.to_string();
        let key = key.to_string();

        db::immediate_blocking(&self.pool, move |conn| {
            let verdict = match read_entry(conn, &key)? {
                None => return Ok(DrainOutcome::NoEntry),
                Some(None) => {
                    delete_entry(conn, &key)?;
                    return Ok(DrainOutcome::Sentinel);
                }
                Some(Some(verdict)) => verdict,
            };

            let Some(mut drop) = load_drop(conn, &drop_id)? else {
                return Ok(DrainOutcome::StaleDrop);
            };

            drop.moderation = Some(ModerationVerdict::merged(drop.moderation.as_ref(), &verdict));
            store_drop(conn, &drop)?;
            delete_entry(conn, &key)?;

            Ok(DrainOutcome::Merged)
        })
        .await
    }

    async fn pending(&self, key: &str) -> Result<Option<Option<ModerationVerdict>>, RepositoryError> {
        let conn = self.pool.get()?;
        read_entry(&conn, key)
    }
}

pub type DynModerationStore = Arc<dyn ModerationStore>;
