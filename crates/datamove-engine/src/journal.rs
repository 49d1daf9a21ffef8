//! Serialized journal writes.
//!
//! Provides [`JournalWriter`], a cloneable handle in front of a single task
//! that owns the [`IJournalSink`]. Every persist/remove goes through one
//! channel and is applied in order, so at most one journal mutation is in
//! flight at a time no matter how many chunks complete concurrently.
//!
//! ```text
//! ┌─────────────┐   JournalOp    ┌───────────────┐     ┌──────────────┐
//! │ controllers │ ─────────────► │ journal task  │ ──► │ IJournalSink │
//! └─────────────┘                └───────────────┘     └──────────────┘
//!        ▲      result via oneshot      │
//!        └──────────────────────────────┘
//! ```

use std::sync::Arc;

use datamove_core::domain::JobId;
use datamove_core::ports::IJournalSink;
use tokio::sync::{mpsc, oneshot};

use crate::{Result, TransferError};

/// Operations accepted by the journal task
#[derive(Debug)]
enum JournalOp {
    Persist {
        job_id: JobId,
        record: Vec<u8>,
        reply: oneshot::Sender<anyhow::Result<()>>,
    },
    Remove {
        job_id: JobId,
        reply: oneshot::Sender<anyhow::Result<()>>,
    },
}

/// Handle for sending journal writes to the journal task
#[derive(Clone)]
pub struct JournalWriter {
    tx: mpsc::Sender<JournalOp>,
}

impl JournalWriter {
    /// Spawn the journal task on the current runtime
    ///
    /// The task stops once every handle has been dropped.
    pub fn spawn(sink: Arc<dyn IJournalSink>) -> Self {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(run(rx, sink));
        Self { tx }
    }

    /// Replace the stored record of `job_id`
    ///
    /// Returns once the sink has acknowledged the write.
    pub async fn persist(&self, job_id: JobId, record: Vec<u8>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(JournalOp::Persist {
            job_id,
            record,
            reply,
        })
        .await?;
        Self::wait(rx).await
    }

    /// Drop the stored record of `job_id`
    pub async fn remove(&self, job_id: JobId) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(JournalOp::Remove { job_id, reply }).await?;
        Self::wait(rx).await
    }

    async fn send(&self, op: JournalOp) -> Result<()> {
        self.tx.send(op).await.map_err(|_| {
            TransferError::Journal(anyhow::anyhow!("journal task has stopped"))
        })
    }

    async fn wait(rx: oneshot::Receiver<anyhow::Result<()>>) -> Result<()> {
        rx.await
            .map_err(|_| TransferError::Journal(anyhow::anyhow!("journal response lost")))?
            .map_err(TransferError::Journal)
    }
}

async fn run(mut rx: mpsc::Receiver<JournalOp>, sink: Arc<dyn IJournalSink>) {
    tracing::debug!("Journal task started");

    while let Some(op) = rx.recv().await {
        match op {
            JournalOp::Persist {
                job_id,
                record,
                reply,
            } => {
                tracing::trace!(%job_id, bytes = record.len(), "Persisting checkpoint");
                let _ = reply.send(sink.persist(&job_id, &record).await);
            }
            JournalOp::Remove { job_id, reply } => {
                tracing::trace!(%job_id, "Removing checkpoint");
                let _ = reply.send(sink.remove(&job_id).await);
            }
        }
    }

    tracing::debug!("Journal task stopped (all handles dropped)");
}
