// User profile lookups used for notification labels
use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;

use crate::drops::RepositoryError;
use crate::state::DbPool;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserProfile {
    pub id: String,
    pub display_name: Option<String>,
    pub username: Option<String>,
}

impl UserProfile {
    /// Display name, else "@username", else `None`. Blank values are skipped.
    pub fn label(&self) -> Option<String> {
        let non_blank = |s: &Option<String>| {
            s.as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        non_blank(&self.display_name).or_else(|| non_blank(&self.username).map(|u| format!("@{}", u)))
    }
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn profile(&self, user_id: &str) -> Result<Option<UserProfile>, RepositoryError>;

    async fn set_display_name(&self, user_id: &str, display_name: &str)
        -> Result<(), RepositoryError>;
}

pub struct SqliteUserDirectory {
    pool: DbPool,
}

impl SqliteUserDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for SqliteUserDirectory {
    async fn profile(&self, user_id: &str) -> Result<Option<UserProfile>, RepositoryError> {
        let conn = self.pool.get()?;
        let profile = conn
            .query_row(
                "SELECT id, display_name, username FROM users WHERE id = ?1",
                params![user_id],
                |row| {
                    Ok(UserProfile {
                        id: row.get(0)?,
                        display_name: row.get(1)?,
                        username: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(profile)
    }

    async fn set_display_name(
        &self,
        user_id: &str,
        display_name: &str,
    ) -> Result<(), RepositoryError> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO users (id, display_name) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET display_name = excluded.display_name",
            params![user_id, display_name],
        )?;
        Ok(())
    }
}

pub type DynUserDirectory = Arc<dyn UserDirectory>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::migrated_pool;

    fn profile(display_name: Option<&str>, username: Option<&str>) -> UserProfile {
        UserProfile {
            id: "u1".into(),
            display_name: display_name.map(String::from),
            username: username.map(String::from),
        }
    }

    #[test]
    fn label_prefers_display_name() {
        assert_eq!(profile(Some("Ana"), Some("ana")).label().as_deref(), Some("Ana"));
        assert_eq!(profile(None, Some("ana")).label().as_deref(), Some("@ana"));
        assert_eq!(profile(Some("  "), Some("ana")).label().as_deref(), Some("@ana"));
        assert_eq!(profile(None, None).label(), None);
    }

    #[tokio::test]
    async fn test_profile_lookup() {
        let (pool, _tmp) = migrated_pool();
        let users = SqliteUserDirectory::new(pool);

        assert!(users.profile("u1").await.unwrap().is_none());

        users.set_display_name("u1", "Ana").await.unwrap();
        let p = users.profile("u1").await.unwrap().unwrap();
        assert_eq!(p.display_name.as_deref(), Some("Ana"));
        assert_eq!(p.username, None);
    }
}
