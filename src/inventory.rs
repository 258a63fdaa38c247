// Device-local record of collected / ignored drops
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use crate::drops::{ContentType, DropSnapshot, RepositoryError};
use crate::state::DbPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InventoryStatus {
    Collected,
    Ignored,
}

impl InventoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InventoryStatus::Collected => "COLLECTED",
            InventoryStatus::Ignored => "IGNORED",
        }
    }
}

impl FromStr for InventoryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COLLECTED" => Ok(InventoryStatus::Collected),
            "IGNORED" => Ok(InventoryStatus::Ignored),
            other => Err(format!("unknown inventory status: {}", other)),
        }
    }
}

/// One resolved drop. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryEntry {
    pub drop_id: String,
    pub status: InventoryStatus,
    /// Content kept at pick-up; ignored drops keep nothing beyond the id
    pub snapshot: Option<DropSnapshot>,
    pub decided_at: DateTime<Utc>,
}

impl InventoryEntry {
    pub fn collected(snapshot: DropSnapshot, decided_at: DateTime<Utc>) -> Self {
        Self {
            drop_id: snapshot.drop_id.clone(),
            status: InventoryStatus::Collected,
            snapshot: Some(snapshot),
            decided_at,
        }
    }

    pub fn ignored(drop_id: impl Into<String>, decided_at: DateTime<Utc>) -> Self {
        Self {
            drop_id: drop_id.into(),
            status: InventoryStatus::Ignored,
            snapshot: None,
            decided_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    /// A decision already exists for this drop; the new one was discarded
    AlreadyResolved,
}

#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn record(&self, entry: &InventoryEntry) -> Result<RecordOutcome, RepositoryError>;

    async fn get(&self, drop_id: &str) -> Result<Option<InventoryEntry>, RepositoryError>;

    async fn is_resolved(&self, drop_id: &str) -> Result<bool, RepositoryError> {
        Ok(self.get(drop_id).await?.is_some())
    }

    /// Ids of every drop with a decision, either status
    async fn resolved_ids(&self) -> Result<HashSet<String>, RepositoryError>;

    /// Collected entries, newest first
    async fn collected(&self) -> Result<Vec<InventoryEntry>, RepositoryError>;
}

pub struct SqliteInventory {
    pool: DbPool,
}

impl SqliteInventory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const ENTRY_COLUMNS: &str =
    "drop_id, status, text, media_url, content_type, lat, lng, group_code, drop_created_at, decided_at";

fn parse_time(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Corrupt(format!("timestamp {}: {}", raw, e)))
}

type EntryRow = (
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<f64>,
    Option<f64>,
    Option<String>,
    Option<String>,
    String,
);

fn read_row(row: &Row<'_>) -> rusqlite::Result<EntryRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

fn into_entry(row: EntryRow) -> Result<InventoryEntry, RepositoryError> {
    let (drop_id, status, text, media_url, content_type, lat, lng, group_code, created, decided) =
        row;
    let status = status
        .parse::<InventoryStatus>()
        .map_err(RepositoryError::Corrupt)?;

    let snapshot = match (status, content_type, lat, lng, created) {
        (InventoryStatus::Collected, Some(ct), Some(lat), Some(lng), Some(created)) => {
            Some(DropSnapshot {
                drop_id: drop_id.clone(),
                text,
                media_url,
                content_type: ct.parse::<ContentType>().map_err(RepositoryError::Corrupt)?,
                lat,
                lng,
                group_code,
                created_at: parse_time(&created)?,
            })
        }
        _ => None,
    };

    Ok(InventoryEntry {
        drop_id,
        status,
        snapshot,
        decided_at: parse_time(&decided)?,
    })
}

#[async_trait]
impl InventoryStore for SqliteInventory {
    async fn record(&self, entry: &InventoryEntry) -> Result<RecordOutcome, RepositoryError> {
        let conn = self.pool.get()?;
        let snap = entry.snapshot.as_ref();

        // First decision wins; later ones are dropped by the primary key
        let rows = conn.execute(
            "INSERT OR IGNORE INTO inventory
               (drop_id, status, text, media_url, content_type, lat, lng, group_code, drop_created_at, decided_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                entry.drop_id,
                entry.status.as_str(),
                snap.and_then(|s| s.text.clone()),
                snap.and_then(|s| s.media_url.clone()),
                snap.map(|s| s.content_type.as_str()),
                snap.map(|s| s.lat),
                snap.map(|s| s.lng),
                snap.and_then(|s| s.group_code.clone()),
                snap.map(|s| s.created_at.to_rfc3339()),
                entry.decided_at.to_rfc3339(),
            ],
        )?;

        if rows == 0 {
            Ok(RecordOutcome::AlreadyResolved)
        } else {
            Ok(RecordOutcome::Recorded)
        }
    }

    async fn get(&self, drop_id: &str) -> Result<Option<InventoryEntry>, RepositoryError> {
        let conn = self.pool.get()?;
        let sql = format!("SELECT {} FROM inventory WHERE drop_id = ?1", ENTRY_COLUMNS);
        let row = conn
            .query_row(&sql, params![drop_id], read_row)
            .optional()?;
        row.map(into_entry).transpose()
    }

    async fn resolved_ids(&self) -> Result<HashSet<String>, RepositoryError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT drop_id FROM inventory")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<HashSet<String>, _>>()?;
        Ok(ids)
    }

    async fn collected(&self) -> Result<Vec<InventoryEntry>, RepositoryError> {
        let conn = self.pool.get()?;
        let sql = format!(
            "SELECT {} FROM inventory WHERE status = 'COLLECTED' ORDER BY decided_at DESC",
            ENTRY_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], read_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(into_entry).collect()
    }
}

pub type DynInventoryStore = Arc<dyn InventoryStore>;
