//! Journal database connection pool
//!
//! The journal is written by one controller per chunk and read back once at
//! startup, so the pool is tuned for small frequent upserts:
//!
//! - WAL journaling with `synchronous = NORMAL`. A commit appends to the
//!   WAL without an fsync; a power loss may lose the last chunk records,
//!   and those chunks are sent again on resume.
//! - Two connections. Upserts serialize on SQLite's write lock.
//!
//! In-memory mode uses a single connection so every query sees the same
//! database.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use crate::JournalError;

const MAX_CONNECTIONS: u32 = 2;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn tune(options: SqliteConnectOptions) -> SqliteConnectOptions {
    options
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT)
}

/// Pool of SQLite connections for the checkpoint journal
pub struct JournalPool {
    pool: SqlitePool,
}

impl JournalPool {
    /// Open (creating if needed) the journal database at `db_path`
    ///
    /// # Errors
    ///
    /// Returns `JournalError::ConnectionFailed` if the connection cannot be
    /// established, or `JournalError::MigrationFailed` if the schema cannot
    /// be created.
    pub async fn new(db_path: &Path) -> Result<Self, JournalError> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                JournalError::ConnectionFailed(format!(
                    "Failed to create journal directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let options = tune(
            SqliteConnectOptions::new()
                .filename(db_path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal),
        );

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|e| {
                JournalError::ConnectionFailed(format!(
                    "Failed to open journal at {}: {}",
                    db_path.display(),
                    e
                ))
            })?;

        Self::run_migrations(&pool).await?;

        tracing::info!(path = %db_path.display(), "Journal pool initialized");

        Ok(Self { pool })
    }

    /// In-memory journal for tests
    pub async fn in_memory() -> Result<Self, JournalError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| JournalError::ConnectionFailed(e.to_string()))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(tune(options))
            .await
            .map_err(|e| {
                JournalError::ConnectionFailed(format!("Failed to create in-memory journal: {}", e))
            })?;

        Self::run_migrations(&pool).await?;

        tracing::debug!("In-memory journal pool initialized");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<(), JournalError> {
        let migration_sql = include_str!("migrations/20261016_journal.sql");
        sqlx::raw_sql(migration_sql)
            .execute(pool)
            .await
            .map_err(|e| {
                JournalError::MigrationFailed(format!("Failed to run journal migration: {}", e))
            })?;

        tracing::debug!("Journal migrations completed");
        Ok(())
    }
}
