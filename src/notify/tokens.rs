use async_trait::async_trait;
use rusqlite::params;
use std::sync::Arc;

use crate::db;
use crate::drops::RepositoryError;
use crate::state::DbPool;

/// Per-user set of device delivery tokens.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Add or refresh a token; re-registering an existing token is a no-op
    async fn register(&self, user_id: &str, token: &str) -> Result<(), RepositoryError>;

    async fn tokens_for(&self, user_id: &str) -> Result<Vec<String>, RepositoryError>;

    /// Remove all given tokens in one unit; returns how many were removed
    async fn remove(&self, user_id: &str, tokens: &[String]) -> Result<usize, RepositoryError>;
}

pub struct SqliteTokenStore {
    pool: DbPool,
}

impl SqliteTokenStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenStore for SqliteTokenStore {
    async fn register(&self, user_id: &str, token: &str) -> Result<(), RepositoryError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO notification_tokens (user_id, token, updated_at)
             VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(user_id, token) DO UPDATE SET updated_at = excluded.updated_at",
            params![user_id, token],
        )?;
        Ok(())
    }

    async fn tokens_for(&self, user_id: &str) -> Result<Vec<String>, RepositoryError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT token FROM notification_tokens WHERE user_id = ?1 ORDER BY updated_at, token",
        )?;
        let tokens = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(tokens)
    }

    async fn remove(&self, user_id: &str, tokens: &[String]) -> Result<usize, RepositoryError> {
        if tokens.is_empty() {
            return Ok(0);
        }

        let user_id = user_id.to_string();
        let tokens = tokens.to_vec();
        db::immediate_blocking(&self.pool, move |conn| {
            let mut stmt = conn
                .prepare("DELETE FROM notification_tokens WHERE user_id = ?1 AND token = ?2")?;
            let mut removed = 0;
            for token in &tokens {
                removed += stmt.execute(params![user_id, token])?;
            }
            Ok(removed)
        })
        .await
    }
}

pub type DynTokenStore = Arc<dyn TokenStore>;
