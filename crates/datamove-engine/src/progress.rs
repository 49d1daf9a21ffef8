//! Progress aggregation for job handles.
//!
//! A [`ProgressTracker`] publishes [`ProgressSnapshot`]s on a `watch`
//! channel. A single job gets its own tracker; every entry of a directory
//! transfer shares one, so the handle sees aggregate counters.

use std::sync::Arc;

use datamove_core::domain::{JobId, JobStatus};
use datamove_core::ports::{IProgressSink, JobOutcome};
use serde::Serialize;
use tokio::sync::watch;

/// Counters reported on a job handle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub bytes_transferred: u64,
    pub files_completed: u64,
    pub files_skipped: u64,
    pub files_failed: u64,
}

/// Shared publisher of [`ProgressSnapshot`]s
#[derive(Clone)]
pub struct ProgressTracker {
    tx: Arc<watch::Sender<ProgressSnapshot>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ProgressSnapshot::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        *self.tx.borrow()
    }

    pub fn add_bytes(&self, bytes: u64) {
        if bytes > 0 {
            self.tx.send_modify(|p| p.bytes_transferred += bytes);
        }
    }

    /// Count a finished job; canceled jobs are not counted
    pub fn record_outcome(&self, status: JobStatus) {
        self.tx.send_modify(|p| match status {
            JobStatus::Completed => p.files_completed += 1,
            JobStatus::Skipped => p.files_skipped += 1,
            JobStatus::Failed => p.files_failed += 1,
            _ => {}
        });
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress sink that writes to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgressSink;

impl IProgressSink for LogProgressSink {
    fn on_bytes_transferred(&self, job_id: &JobId, delta: u64) {
        tracing::trace!(%job_id, delta, "Bytes transferred");
    }

    fn on_job_finished(&self, outcome: &JobOutcome) {
        match &outcome.error {
            Some(error) => tracing::warn!(
                job_id = %outcome.job_id,
                status = %outcome.status,
                bytes = outcome.bytes_transferred,
                %error,
                "Transfer finished with error"
            ),
            None => tracing::info!(
                job_id = %outcome.job_id,
                status = %outcome.status,
                bytes = outcome.bytes_transferred,
                "Transfer finished"
            ),
        }
    }
}
