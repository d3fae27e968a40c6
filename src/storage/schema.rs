use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::StorageError;

// ============================================================================
// Database
// ============================================================================

#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations.
    ///
    /// Pass `":memory:"` for a throwaway database.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InstanceLocked` if another process has the
    /// database locked, `StorageError::Migration` if the schema could not be
    /// created.
    pub async fn open(path: &str) -> Result<Self, StorageError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // Pre-create the file user-only so it never exists with umask permissions
        #[cfg(unix)]
        if path != ":memory:" {
            use std::os::unix::fs::OpenOptionsExt;
            let db_path = std::path::Path::new(path);
            if !db_path.exists() && db_path.parent().is_some_and(|p| p.exists()) {
                // If creation fails, SQLite reports the error at connect time
                let _file = std::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o600)
                    .open(db_path)
                    .ok();
            }
        }

        let options = SqliteConnectOptions::from_str(&url)
            .map_err(StorageError::from_sqlx)?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");
        // Single writer (the hub); a couple of readers at most. Every
        // connection to `:memory:` is its own database, so keep exactly one.
        let in_memory = path == ":memory:";
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 4 })
            .idle_timeout(if in_memory { None } else { Some(Duration::from_secs(600)) })
            .max_lifetime(if in_memory { None } else { Some(Duration::from_secs(1800)) })
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(StorageError::from_sqlx)?;

        let db = Self { pool };
        db.migrate().await.map_err(|e| match StorageError::from_sqlx(e) {
            StorageError::Database(e) => StorageError::Migration(e.to_string()),
            locked => locked,
        })?;
        tracing::debug!(path = %path, "Opened stories database");
        Ok(db)
    }

    /// Create tables inside one transaction. Every statement is idempotent.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        // `position` preserves list order and tolerates duplicate company ids
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS companies (
                position INTEGER PRIMARY KEY,
                company_id INTEGER NOT NULL,
                external_id TEXT NOT NULL,
                name TEXT NOT NULL,
                logo_url TEXT NOT NULL,
                story_count INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                rank INTEGER NOT NULL,
                showcase TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stories (
                company_position INTEGER NOT NULL
                    REFERENCES companies(position) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                story_id TEXT NOT NULL,
                kind INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                view_count INTEGER NOT NULL,
                clap_count INTEGER NOT NULL,
                thumbnail_url TEXT NOT NULL,
                media_url TEXT NOT NULL,
                is_seen INTEGER NOT NULL DEFAULT 0,
                is_clapped INTEGER NOT NULL DEFAULT 0,
                link TEXT NOT NULL,
                PRIMARY KEY (company_position, position)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
