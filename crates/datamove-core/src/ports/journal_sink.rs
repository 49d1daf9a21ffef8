//! Journal sink port (driven/secondary port)
//!
//! A durable byte store for per-job checkpoint records. The engine writes
//! one record per job after every mutation that must survive a crash, and
//! removes it when the job reaches a terminal status.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage failures are adapter-specific.
//! - Records are opaque bytes; encoding is owned by the engine.

use async_trait::async_trait;

use crate::domain::JobId;

#[async_trait]
pub trait IJournalSink: Send + Sync {
    /// Replace the stored record for `job_id`
    async fn persist(&self, job_id: &JobId, record: &[u8]) -> anyhow::Result<()>;

    /// Drop the record for `job_id`; a missing record is not an error
    async fn remove(&self, job_id: &JobId) -> anyhow::Result<()>;

    /// Every stored record
    async fn load_all(&self) -> anyhow::Result<Vec<(JobId, Vec<u8>)>>;
}
