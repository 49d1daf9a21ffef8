//! Progress sink port (driven/secondary port)
//!
//! Receives incremental byte counts while a job runs and exactly one
//! outcome when it stops. Calls are made from engine tasks and must not
//! block.

use serde::{Deserialize, Serialize};

use crate::domain::{JobId, JobStatus};

/// Final report for one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Logical bytes covered, including chunks completed in earlier runs
    pub bytes_transferred: u64,
    /// Display form of the error for failed jobs
    pub error: Option<String>,
}

pub trait IProgressSink: Send + Sync {
    /// `delta` more bytes of `job_id` are durable
    fn on_bytes_transferred(&self, job_id: &JobId, delta: u64);

    /// Called once per job run
    fn on_job_finished(&self, outcome: &JobOutcome);
}
