//! SQLite implementation of IJournalSink
//!
//! | Column     | SQL Type | Strategy                                  |
//! |------------|----------|-------------------------------------------|
//! | job_id     | TEXT     | UUID string via `.to_string()` / `FromStr` |
//! | record     | BLOB     | Opaque bytes produced by the engine       |
//! | updated_at | TEXT     | ISO 8601 via `to_rfc3339()`               |

use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use datamove_core::domain::JobId;
use datamove_core::ports::IJournalSink;
use sqlx::{Row, SqlitePool};

use crate::JournalError;

/// Journal sink storing one row per job
pub struct SqliteJournalSink {
    pool: SqlitePool,
}

impl SqliteJournalSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Number of stored records
    pub async fn count(&self) -> Result<u64, JournalError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM checkpoints")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

#[async_trait]
impl IJournalSink for SqliteJournalSink {
    async fn persist(&self, job_id: &JobId, record: &[u8]) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO checkpoints (job_id, record, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(job_id) DO UPDATE SET record = excluded.record, updated_at = excluded.updated_at",
        )
        .bind(job_id.to_string())
        .bind(record)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(JournalError::from)?;

        tracing::trace!(%job_id, bytes = record.len(), "Journal record persisted");
        Ok(())
    }

    async fn remove(&self, job_id: &JobId) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM checkpoints WHERE job_id = ?")
            .bind(job_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(JournalError::from)?;
        Ok(())
    }

    async fn load_all(&self) -> anyhow::Result<Vec<(JobId, Vec<u8>)>> {
        let rows = sqlx::query("SELECT job_id, record FROM checkpoints ORDER BY updated_at")
            .fetch_all(&self.pool)
            .await
            .map_err(JournalError::from)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("job_id").map_err(JournalError::from)?;
            let job_id = JobId::from_str(&id).map_err(|e| {
                JournalError::SerializationError(format!("Invalid job id {id:?}: {e}"))
            })?;
            let record: Vec<u8> = row.try_get("record").map_err(JournalError::from)?;
            records.push((job_id, record));
        }
        Ok(records)
    }
}
