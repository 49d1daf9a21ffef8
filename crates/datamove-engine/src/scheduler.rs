//! Execution slots and the job queue
//!
//! Two budgets bound the engine process-wide:
//!
//! - [`ExecutionSlots`]: chunk operations of every active job compete for
//!   one fair (FIFO) semaphore. This, not per-job threading, caps total
//!   I/O parallelism and with it buffer pressure.
//! - [`Scheduler`]: jobs wait in arrival order until one of
//!   `max_concurrent_jobs` job permits frees up, then their controller runs
//!   on its own task.
//!
//! ```text
//!  submit() ──► mpsc queue ──► dispatcher ──► job permit ──► controller task
//!                                                                 │
//!                                         ExecutionSlots ◄── chunk ops
//! ```
//!
//! A chunk waiting for a buffer lease holds its slot but no CPU; at least
//! one buffer is always eventually returned, so the queue cannot wedge.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::controller::{JobReport, TransferController};
use crate::{Result, TransferError};

// ============================================================================
// ExecutionSlots
// ============================================================================

/// Process-wide budget of concurrently executing chunk operations
#[derive(Clone, Debug)]
pub struct ExecutionSlots {
    semaphore: Arc<Semaphore>,
    total: usize,
}

impl ExecutionSlots {
    pub fn new(total: usize) -> Self {
        let total = total.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(total)),
            total,
        }
    }

    /// Wait for a slot; waiters are served in arrival order
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| TransferError::SchedulerClosed)
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Refuse every future acquire
    pub fn close(&self) {
        self.semaphore.close();
    }
}

// ============================================================================
// Scheduler
// ============================================================================

struct QueuedJob {
    controller: TransferController,
    reply: oneshot::Sender<JobReport>,
}

/// FIFO job queue in front of a bounded set of running controllers
pub struct Scheduler {
    queue: mpsc::UnboundedSender<QueuedJob>,
    slots: ExecutionSlots,
    shutdown: CancellationToken,
}

impl Scheduler {
    /// Start the dispatcher on the current runtime
    pub fn start(slots: ExecutionSlots, max_concurrent_jobs: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let job_permits = Arc::new(Semaphore::new(max_concurrent_jobs.max(1)));

        info!(
            slots = slots.total(),
            max_concurrent_jobs, "Starting transfer scheduler"
        );
        tokio::spawn(dispatch(rx, job_permits, shutdown.clone()));

        Self {
            queue: tx,
            slots,
            shutdown,
        }
    }

    /// Queue a controller; the receiver yields its report
    ///
    /// A receiver that errors means the scheduler shut down before the job
    /// ran.
    pub fn submit(&self, controller: TransferController) -> Result<oneshot::Receiver<JobReport>> {
        if self.shutdown.is_cancelled() {
            return Err(TransferError::SchedulerClosed);
        }
        let (reply, rx) = oneshot::channel();
        let job_id = controller.job_id();
        self.queue
            .send(QueuedJob { controller, reply })
            .map_err(|_| TransferError::SchedulerClosed)?;
        debug!(%job_id, "Job queued");
        Ok(rx)
    }

    pub fn slots(&self) -> &ExecutionSlots {
        &self.slots
    }

    /// Token every job token descends from
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Stop dispatching and cancel every running job
    ///
    /// Running jobs stop at their next chunk boundary with their
    /// checkpoints intact. Queued jobs finish as canceled without running.
    pub fn shutdown(&self) {
        info!("Transfer scheduler shutting down");
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn dispatch(
    mut rx: mpsc::UnboundedReceiver<QueuedJob>,
    job_permits: Arc<Semaphore>,
    shutdown: CancellationToken,
) {
    let mut held: Option<QueuedJob> = None;
    loop {
        let queued = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = rx.recv() => match next {
                Some(queued) => queued,
                None => break,
            },
        };

        let permit = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                held = Some(queued);
                break;
            }
            permit = Arc::clone(&job_permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    held = Some(queued);
                    break;
                }
            },
        };

        tokio::spawn(async move {
            let QueuedJob { controller, reply } = queued;
            let report = controller.run().await;
            drop(permit);
            // The handle may have been dropped
            let _ = reply.send(report);
        });
    }

    // Later submits fail with SchedulerClosed
    rx.close();
    let mut canceled = 0usize;
    while let Some(queued) = held.take().or_else(|| rx.try_recv().ok()) {
        let QueuedJob { controller, reply } = queued;
        let report = controller.cancel_unstarted().await;
        let _ = reply.send(report);
        canceled += 1;
    }
    info!(canceled, "Job dispatcher stopped");
}
