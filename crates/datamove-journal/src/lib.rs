//! Datamove Journal - Durable checkpoint records
//!
//! SQLite-backed implementation of the `IJournalSink` port from
//! `datamove-core`. The engine hands it one opaque record per unfinished
//! job; records survive a crash and are replayed by
//! `TransferManager::load_journal` on the next start.
//!
//! ## Key Components
//!
//! - [`JournalPool`] - Connection pool with migration support
//! - [`SqliteJournalSink`] - `IJournalSink` implementation
//! - [`JournalError`] - Error types for journal operations
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use datamove_journal::{JournalPool, SqliteJournalSink};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = JournalPool::new(Path::new("/var/lib/datamove/journal.db")).await?;
//! let sink = Arc::new(SqliteJournalSink::new(pool.pool().clone()));
//! // Pass sink to TransferManagerBuilder::journal_sink...
//! # Ok(())
//! # }
//! ```

pub mod pool;
pub mod sink;

pub use pool::JournalPool;
pub use sink::SqliteJournalSink;

/// Errors that can occur during journal operations
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// A stored row could not be decoded
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<sqlx::Error> for JournalError {
    fn from(e: sqlx::Error) -> Self {
        JournalError::QueryFailed(e.to_string())
    }
}
