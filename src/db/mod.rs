use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection};
use std::path::Path;

use crate::drops::RepositoryError;
use crate::state::DbPool;

pub const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_initial",
        include_str!("../../migrations/001_initial.sql"),
    ),
    (
        "002_inventory",
        include_str!("../../migrations/002_inventory.sql"),
    ),
];

pub fn create_pool(db_path: &Path) -> anyhow::Result<DbPool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Pragmas are per-connection, so apply them on every checkout
    let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            ",
        )
    });
    let pool = Pool::builder().max_size(8).build(manager)?;

    Ok(pool)
}

pub fn run_migrations(pool: &DbPool) -> anyhow::Result<()> {
    let conn = pool.get()?;

    // Create migrations tracking table
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    for (name, sql) in MIGRATIONS {
        let already_applied: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM schema_version WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;

        if !already_applied {
            tracing::info!("Applying migration: {}", name);
            conn.execute_batch(sql)?;
            conn.execute(
                "INSERT INTO schema_version (name) VALUES (?1)",
                params![name],
            )?;
        }
    }

    tracing::info!("Database migrations complete");
    Ok(())
}

/// Rolls back an open transaction unless disarmed after `COMMIT`.
struct RollbackGuard<'c> {
    conn: &'c Connection,
    armed: bool,
}

impl Drop for RollbackGuard<'_> {
    fn drop(&mut self) {
        // SQLite already rolled back on some errors
        if !self.armed || self.conn.is_autocommit() {
            return;
        }
        if let Err(e) = self.conn.execute("ROLLBACK", []) {
            tracing::error!("Rollback failed: {}", e);
        }
    }
}

/// Run `f` inside a `BEGIN IMMEDIATE` transaction.
///
/// The write lock is taken up front, so every unit run through here is
/// serialized against other writers. Commits when `f` returns `Ok`. An
/// error from `f`, a failed `COMMIT` or a panic rolls back, so the
/// connection goes back to the pool with no transaction open.
pub fn immediate<T, E, F>(conn: &Connection, f: F) -> Result<T, E>
where
    F: FnOnce(&Connection) -> Result<T, E>,
    E: From<rusqlite::Error>,
{
    conn.execute("BEGIN IMMEDIATE", [])?;
    let mut guard = RollbackGuard { conn, armed: true };

    let value = f(conn)?;
    conn.execute("COMMIT", [])?;
    guard.armed = false;

    Ok(value)
}

/// [`immediate`] on a pooled connection, run on the blocking thread pool.
///
/// Taking the write lock can wait out the whole `busy_timeout`, which must
/// not park an async worker. A panic inside `f` is resumed on the caller.
pub async fn immediate_blocking<T, E, F>(pool: &DbPool, f: F) -> Result<T, E>
where
    F: FnOnce(&Connection) -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: From<RepositoryError> + From<rusqlite::Error> + Send + 'static,
{
    let pool = pool.clone();
    let task = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(RepositoryError::from)?;
        immediate(&conn, f)
    });

    match task.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(RepositoryError::Interrupted(e.to_string()).into()),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tempfile::TempDir;

    /// Migrated file-backed pool; keep the TempDir alive for the test's duration.
    pub fn migrated_pool() -> (DbPool, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let pool = create_pool(&temp_dir.path().join("test.db")).unwrap();
        run_migrations(&pool).unwrap();
        (pool, temp_dir)
    }
}
