//! Local persistence for the task-to-session mapping.
//!
//! A small SQLite database remembers which remote session each local task
//! syncs to, plus the "last active session" pointer used for
//! restore-on-launch.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

const LAST_SESSION_KEY: &str = "last_session";

#[derive(Debug, Clone)]
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    /// Opens (or creates) the store at `path`.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory: {}", parent.display()))?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", path.display());
        let options = SqliteConnectOptions::from_str(&database_url)
            .context("parsing database URL")?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("connecting to database")?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Creates an in-memory store (for testing).
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("parsing in-memory database URL")?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("connecting to in-memory database")?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_sessions (
                task_id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("creating task_sessions table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS app_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("creating app_state table")?;

        Ok(())
    }

    pub async fn get_session_for_task(&self, task_id: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT session_id FROM task_sessions WHERE task_id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .context("querying session for task")?;
        Ok(row.map(|r| r.get("session_id")))
    }

    pub async fn set_session_for_task(&self, task_id: &str, session_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO task_sessions (task_id, session_id, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(task_id) DO UPDATE SET
                session_id = excluded.session_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(task_id)
        .bind(session_id)
        .execute(&self.pool)
        .await
        .context("storing session for task")?;
        Ok(())
    }

    pub async fn get_last_session(&self) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM app_state WHERE key = ?")
            .bind(LAST_SESSION_KEY)
            .fetch_optional(&self.pool)
            .await
            .context("querying last session")?;
        Ok(row.map(|r| r.get("value")))
    }

    pub async fn set_last_session(&self, session_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO app_state (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(LAST_SESSION_KEY)
        .bind(session_id)
        .execute(&self.pool)
        .await
        .context("storing last session")?;
        Ok(())
    }

    /// Removes the last-session pointer. Used when restore-on-launch finds
    /// the pointer refers to a session that no longer loads.
    pub async fn clear_last_session(&self) -> Result<()> {
        sqlx::query("DELETE FROM app_state WHERE key = ?")
            .bind(LAST_SESSION_KEY)
            .execute(&self.pool)
            .await
            .context("clearing last session")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_task_mapping_round_trip() {
        let store = SessionStore::in_memory().await.unwrap();
        assert_eq!(store.get_session_for_task("t1").await.unwrap(), None);

        store.set_session_for_task("t1", "s1").await.unwrap();
        assert_eq!(
            store.get_session_for_task("t1").await.unwrap(),
            Some("s1".to_string())
        );

        store.set_session_for_task("t1", "s2").await.unwrap();
        assert_eq!(
            store.get_session_for_task("t1").await.unwrap(),
            Some("s2".to_string())
        );
    }

    #[tokio::test]
    async fn test_last_session_pointer() {
        let store = SessionStore::in_memory().await.unwrap();
        assert_eq!(store.get_last_session().await.unwrap(), None);

        store.set_last_session("s9").await.unwrap();
        assert_eq!(
            store.get_last_session().await.unwrap(),
            Some("s9".to_string())
        );

        store.clear_last_session().await.unwrap();
        assert_eq!(store.get_last_session().await.unwrap(), None);
    }
}
