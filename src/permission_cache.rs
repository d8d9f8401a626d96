//! Permission Rule Cache: the one piece of durable state this daemon
//! keeps — "always allow" decisions recorded against a fingerprint of
//! the permission prompt, so the same tool call doesn't re-prompt on a
//! later request within the same workspace.
//!
//! Grounded in the teacher's `src/persistence/db.rs` bootstrap idiom
//! (`SqliteConnectOptions`, WAL journal mode, a single-writer pool);
//! simplified into one module instead of the teacher's separate
//! `db.rs`/`schema.rs`/`*_repo.rs` split, since this cache has exactly
//! one table and two operations.

use std::str::FromStr;

use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::Result;

/// Handle to the permission rule cache database.
#[derive(Debug, Clone)]
pub struct PermissionCache {
    pool: SqlitePool,
}

impl PermissionCache {
    /// Open (creating if missing) the cache database at `path`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the connection or schema bootstrap fails.
    pub async fn open(path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            std::fs::create_dir_all(parent).map_err(|err| {
                crate::AppError::Db(format!("failed to create permission cache dir: {err}"))
            })?;
        }

        let opts = SqliteConnectOptions::from_str(path)
            .map_err(|err| crate::AppError::Db(format!("invalid permission cache path: {err}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new().max_connections(1).connect_with(opts).await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS permission_rules (
                fingerprint TEXT PRIMARY KEY,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Open an in-memory cache, for tests.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the connection or schema bootstrap fails.
    pub async fn open_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|err| crate::AppError::Db(format!("invalid memory uri: {err}")))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .connect_with(opts)
            .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS permission_rules (
                fingerprint TEXT PRIMARY KEY,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    /// Record an "always allow" decision for a permission prompt.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn remember(&self, session: &str, prompt: &str) -> Result<()> {
        let fingerprint = fingerprint(session, prompt);
        sqlx::query(
            "INSERT OR REPLACE INTO permission_rules (fingerprint, created_at) VALUES (?, ?)",
        )
        .bind(fingerprint)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Whether this exact permission prompt was previously "always allowed".
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the lookup fails.
    pub async fn is_remembered(&self, session: &str, prompt: &str) -> Result<bool> {
        let fingerprint = fingerprint(session, prompt);
        let row: Option<(String,)> =
            sqlx::query_as("SELECT fingerprint FROM permission_rules WHERE fingerprint = ?")
                .bind(fingerprint)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }
}

/// Fingerprint a `(session, prompt)` pair into the cache key. Sessions
/// are namespaced so the same prompt text from two different working
/// directories never collides.
fn fingerprint(session: &str, prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(session.as_bytes());
    hasher.update(b"\0");
    hasher.update(prompt.as_bytes());
    format!("{:x}", hasher.finalize())
}
