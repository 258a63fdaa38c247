//! Username claims: a unique username -> owner mapping plus the owner's
//! reverse pointer, reassigned together in one serialized transaction.

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::db;
use crate::drops::RepositoryError;
use crate::state::DbPool;

pub const MIN_USERNAME_LEN: usize = 3;
pub const MAX_USERNAME_LEN: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationReason {
    TooShort,
    TooLong,
    InvalidCharacters,
}

impl ValidationReason {
    /// Machine-readable reason code
    pub fn code(&self) -> &'static str {
        match self {
            ValidationReason::TooShort => "TOO_SHORT",
            ValidationReason::TooLong => "TOO_LONG",
            ValidationReason::InvalidCharacters => "INVALID_CHARACTERS",
        }
    }
}

impl fmt::Display for ValidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("Invalid username: {0}")]
    Validation(ValidationReason),

    #[error("Username already taken")]
    Conflict,

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<rusqlite::Error> for ClaimError {
    fn from(e: rusqlite::Error) -> Self {
        ClaimError::Repository(e.into())
    }
}

impl From<r2d2::Error> for ClaimError {
    fn from(e: r2d2::Error) -> Self {
        ClaimError::Repository(e.into())
    }
}

/// Lowercase and validate a requested username.
pub fn normalize_username(raw: &str) -> Result<String, ValidationReason> {
    let username = raw.trim().to_lowercase();
    let len = username.chars().count();

    if len < MIN_USERNAME_LEN {
        return Err(ValidationReason::TooShort);
    }
    if len > MAX_USERNAME_LEN {
        return Err(ValidationReason::TooLong);
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '_')
    {
        return Err(ValidationReason::InvalidCharacters);
    }

    Ok(username)
}

#[async_trait]
pub trait UsernameRegistry: Send + Sync {
    /// Claim `desired` for `user_id`. When the name belongs to
    /// `allow_transfer_from`, ownership moves to `user_id`.
    async fn claim(
        &self,
        user_id: &str,
        desired: &str,
        allow_transfer_from: Option<&str>,
    ) -> Result<String, ClaimError>;

    async fn owner_of(&self, username: &str) -> Result<Option<String>, RepositoryError>;

    async fn username_of(&self, user_id: &str) -> Result<Option<String>, RepositoryError>;
}

pub struct SqliteUsernameRegistry {
    pool: DbPool,
}

impl SqliteUsernameRegistry {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsernameRegistry for SqliteUsernameRegistry {
    async fn claim(
        &self,
        user_id: &str,
        desired: &str,
        allow_transfer_from: Option<&str>,
    ) -> Result<String, ClaimError> {
        let username = normalize_username(desired).map_err(ClaimError::Validation)?;
        let claimant = user_id.to_string();
        let allow_transfer_from = allow_transfer_from.map(str::to_string);

        let username = db::immediate_blocking(&self.pool, move |conn| {
            let owner: Option<String> = conn
                .query_row(
                    "SELECT owner_id FROM usernames WHERE username = ?1",
                    params![username],
                    |row| row.get(0),
                )
                .optional()?;
            let current: Option<String> = conn
                .query_row(
                    "SELECT username FROM users WHERE id = ?1",
                    params![claimant],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()?
                .flatten();

            if let Some(owner) = owner.as_deref() {
                if owner != claimant && Some(owner) != allow_transfer_from.as_deref() {
                    return Err(ClaimError::Conflict);
                }
            }

            conn.execute(
                "INSERT INTO usernames (username, owner_id) VALUES (?1, ?2)
                 ON CONFLICT(username) DO UPDATE SET owner_id = excluded.owner_id",
                params![username, claimant],
            )?;

            if let Some(old) = current.as_deref().filter(|old| *old != username) {
                conn.execute(
                    "DELETE FROM usernames WHERE username = ?1 AND owner_id = ?2",
                    params![old, claimant],
                )?;
            }

            // A transferred name must no longer be the previous owner's
            if let Some(previous) = owner.as_deref().filter(|o| *o != claimant) {
                conn.execute(
                    "UPDATE users SET username = NULL WHERE id = ?1 AND username = ?2",
                    params![previous, username],
                )?;
            }

            conn.execute(
                "INSERT INTO users (id, username) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET username = excluded.username",
                params![claimant, username],
            )?;

            Ok(username)
        })
        .await?;

        tracing::info!("User {} now owns username {}", user_id, username);
        Ok(username)
    }

    async fn owner_of(&self, username: &str) -> Result<Option<String>, RepositoryError> {
        let conn = self.pool.get()?;
        let owner = conn
            .query_row(
                "SELECT owner_id FROM usernames WHERE username = ?1",
                params![username.to_lowercase()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(owner)
    }

    async fn username_of(&self, user_id: &str) -> Result<Option<String>, RepositoryError> {
        let conn = self.pool.get()?;
        let username: Option<Option<String>> = conn
            .query_row(
                "SELECT username FROM users WHERE id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(username.flatten())
    }
}

pub type DynUsernameRegistry = Arc<dyn UsernameRegistry>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::migrated_pool;

    #[test]
    fn validation_reasons() {
        assert_eq!(normalize_username("ab"), Err(ValidationReason::TooShort));
        assert_eq!(
            normalize_username("abcdefghijklmnopqrstu"),
            Err(ValidationReason::TooLong)
        );
        assert_eq!(
            normalize_username("bad name"),
            Err(ValidationReason::InvalidCharacters)
        );
        assert_eq!(
            normalize_username("dash-es"),
            Err(ValidationReason::InvalidCharacters)
        );
        assert_eq!(
            normalize_username("Valid.User_1").as_deref(),
            Ok("valid.user_1")
        );
        assert_eq!(normalize_username("abc").as_deref(), Ok("abc"));
        assert_eq!(
            normalize_username("abcdefghijklmnopqrst").map(|u| u.len()),
            Ok(20)
        );
    }

    #[tokio::test]
    async fn test_claim_free_username_normalizes() {
        let (pool, _tmp) = migrated_pool();
        let registry = SqliteUsernameRegistry::new(pool);

        let name = registry.claim("u1", "Valid.User_1", None).await.unwrap();
        assert_eq!(name, "valid.user_1");
        assert_eq!(
            registry.owner_of("valid.user_1").await.unwrap().as_deref(),
            Some("u1")
        );
        assert_eq!(
            registry.username_of("u1").await.unwrap().as_deref(),
            Some("valid.user_1")
        );
    }

    #[tokio::test]
    async fn test_claim_rejects_invalid_before_touching_storage() {
        let (pool, _tmp) = migrated_pool();
        let registry = SqliteUsernameRegistry::new(pool);

        let err = registry.claim("u1", "ab", None).await.unwrap_err();
        assert!(matches!(err, ClaimError::Validation(ValidationReason::TooShort)));
        assert_eq!(registry.username_of("u1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_claim_taken_username_conflicts() {
        let (pool, _tmp) = migrated_pool();
        let registry = SqliteUsernameRegistry::new(pool);

        registry.claim("u1", "alice", None).await.unwrap();
        let err = registry.claim("u2", "alice", None).await.unwrap_err();
        assert!(matches!(err, ClaimError::Conflict));

        // Transfer from someone other than the owner is still a conflict
        let err = registry.claim("u2", "alice", Some("u3")).await.unwrap_err();
        assert!(matches!(err, ClaimError::Conflict));
    }

    #[tokio::test]
    async fn test_rename_releases_old_username() {
        let (pool, _tmp) = migrated_pool();
        let registry = SqliteUsernameRegistry::new(pool);

        registry.claim("u1", "alice", None).await.unwrap();
        registry.claim("u1", "alicia", None).await.unwrap();

        assert_eq!(registry.owner_of("alice").await.unwrap(), None);
        assert_eq!(
            registry.owner_of("alicia").await.unwrap().as_deref(),
            Some("u1")
        );
        assert_eq!(
            registry.username_of("u1").await.unwrap().as_deref(),
            Some("alicia")
        );

        // The released name is free for others
        registry.claim("u2", "alice", None).await.unwrap();
    }

    #[tokio::test]
    async fn test_reclaiming_own_username_is_idempotent() {
        let (pool, _tmp) = migrated_pool();
        let registry = SqliteUsernameRegistry::new(pool);

        registry.claim("u1", "alice", None).await.unwrap();
        registry.claim("u1", "ALICE", None).await.unwrap();
        assert_eq!(
            registry.owner_of("alice").await.unwrap().as_deref(),
            Some("u1")
        );
    }

    #[tokio::test]
    async fn test_authorized_transfer() {
        let (pool, _tmp) = migrated_pool();
        let registry = SqliteUsernameRegistry::new(pool);

        registry.claim("old-account", "alice", None).await.unwrap();
        registry.claim("new-account", "bob", None).await.unwrap();

        let name = registry
            .claim("new-account", "alice", Some("old-account"))
            .await
            .unwrap();
        assert_eq!(name, "alice");
        assert_eq!(
            registry.owner_of("alice").await.unwrap().as_deref(),
            Some("new-account")
        );
        assert_eq!(registry.owner_of("bob").await.unwrap(), None);
        assert_eq!(registry.username_of("old-account").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_have_one_winner() {
        let (pool, _tmp) = migrated_pool();
        let registry = Arc::new(SqliteUsernameRegistry::new(pool));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    registry
                        .claim(&format!("user-{}", i), "contested", None)
                        .await
                })
            })
            .collect();

        let mut winners = Vec::new();
        let mut conflicts = 0;
        for (i, handle) in handles.into_iter().enumerate() {
            match handle.await.unwrap() {
                Ok(_) => winners.push(format!("user-{}", i)),
                Err(ClaimError::Conflict) => conflicts += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(winners.len(), 1);
        assert_eq!(conflicts, 3);
        assert_eq!(
            registry.owner_of("contested").await.unwrap(),
            Some(winners[0].clone())
        );
    }

    #[tokio::test]
    async fn test_claim_waiting_on_write_lock_leaves_runtime_free() {
        let (pool, _tmp) = migrated_pool();
        let registry = Arc::new(SqliteUsernameRegistry::new(pool.clone()));

        let holder = pool.get().unwrap();
        holder.execute("BEGIN IMMEDIATE", []).unwrap();

        let claim = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.claim("u1", "alice", None).await })
        };

        // The only runtime thread keeps ticking while the claim waits on the lock
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(!claim.is_finished());

        holder.execute("ROLLBACK", []).unwrap();
        assert_eq!(claim.await.unwrap().unwrap(), "alice");
    }
}
