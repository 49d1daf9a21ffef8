//! Transfer manager facade.
//!
//! [`TransferManager`] wires the buffer pools, checkpoint, journal writer,
//! permission cache and scheduler together and turns requests into
//! scheduled [`TransferController`]s.
//!
//! ```text
//! ┌──────────┐ submit/copy ┌─────────────────┐  controller  ┌───────────┐
//! │  caller  │ ──────────► │ TransferManager │ ───────────► │ Scheduler │
//! └──────────┘             └─────────────────┘              └───────────┘
//!      ▲                           │                              │
//!      │    JobHandle: progress,   │ EngineContext                │ JobReport
//!      │    checkpoint, cancel     ▼                              │
//!      └──────────────────── ProgressTracker ◄────────────────────┘
//! ```

use std::sync::Arc;

use datamove_core::config::Config;
use datamove_core::domain::{
    JobCheckpoint, JobId, JobOptions, JobStatus, TransferJob, TransferLocation, TransferMethod,
};
use datamove_core::ports::{
    IJournalSink, IMemoryProbe, IOverwritePrompt, IProgressSink, IStorageClient, StorageError,
};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::buffer_pool::BufferPools;
use crate::checkpoint::Checkpoint;
use crate::chunking::ChunkSettings;
use crate::controller::{EngineContext, JobReport, TransferController};
use crate::journal::JournalWriter;
use crate::permissions::PermissionCache;
use crate::policy::OverwritePolicy;
use crate::progress::{LogProgressSink, ProgressSnapshot, ProgressTracker};
use crate::scheduler::{ExecutionSlots, Scheduler};
use crate::{Result, TransferError};

// ============================================================================
// TransferManagerBuilder
// ============================================================================

/// Assembles a [`TransferManager`]
///
/// Without a prompt every existing destination is kept
/// ([`OverwritePolicy::Never`]); without a progress sink outcomes are only
/// logged; without a journal sink checkpoints live in memory only.
pub struct TransferManagerBuilder {
    client: Arc<dyn IStorageClient>,
    config: Config,
    prompt: Option<Arc<dyn IOverwritePrompt>>,
    progress_sink: Option<Arc<dyn IProgressSink>>,
    journal_sink: Option<Arc<dyn IJournalSink>>,
    memory_probe: Option<Arc<dyn IMemoryProbe>>,
}

impl TransferManagerBuilder {
    pub fn new(client: Arc<dyn IStorageClient>) -> Self {
        Self {
            client,
            config: Config::default(),
            prompt: None,
            progress_sink: None,
            journal_sink: None,
            memory_probe: None,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn overwrite_prompt(mut self, prompt: Arc<dyn IOverwritePrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn progress_sink(mut self, sink: Arc<dyn IProgressSink>) -> Self {
        self.progress_sink = Some(sink);
        self
    }

    pub fn journal_sink(mut self, sink: Arc<dyn IJournalSink>) -> Self {
        self.journal_sink = Some(sink);
        self
    }

    pub fn memory_probe(mut self, probe: Arc<dyn IMemoryProbe>) -> Self {
        self.memory_probe = Some(probe);
        self
    }

    /// Validate the configuration and start the scheduler
    ///
    /// Must be called inside a tokio runtime.
    pub fn build(self) -> Result<TransferManager> {
        let errors = self.config.validate();
        if !errors.is_empty() {
            let joined = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(TransferError::InvalidOptions(joined));
        }

        let transfer = &self.config.transfer;
        let buffers = BufferPools::from_config(transfer, self.memory_probe.as_deref())?;
        let slots = ExecutionSlots::new(transfer.parallelism);
        let scheduler = Scheduler::start(slots.clone(), transfer.max_concurrent_jobs);

        let journal_sink = self
            .journal_sink
            .filter(|_| self.config.journal.enabled);
        let journal = journal_sink.clone().map(JournalWriter::spawn);

        let ctx = EngineContext {
            client: self.client,
            buffers,
            checkpoint: Checkpoint::new(),
            journal,
            progress_sink: self
                .progress_sink
                .unwrap_or_else(|| Arc::new(LogProgressSink) as Arc<dyn IProgressSink>),
            prompt: self
                .prompt
                .unwrap_or_else(|| Arc::new(OverwritePolicy::Never) as Arc<dyn IOverwritePrompt>),
            permissions: PermissionCache::new(self.config.permissions.cache_capacity),
            slots,
            chunk_settings: ChunkSettings::from_config(transfer),
        };

        info!(
            parallelism = transfer.parallelism,
            large_blocks = ctx.buffers.large().capacity(),
            small_blocks = ctx.buffers.small().capacity(),
            journal = ctx.journal.is_some(),
            "Transfer manager ready"
        );

        Ok(TransferManager {
            ctx,
            scheduler,
            journal_sink,
            config: self.config,
        })
    }
}

// ============================================================================
// TransferManager
// ============================================================================

/// Entry point for submitting and resuming transfers
pub struct TransferManager {
    ctx: EngineContext,
    scheduler: Scheduler,
    journal_sink: Option<Arc<dyn IJournalSink>>,
    config: Config,
}

impl TransferManager {
    pub fn builder(client: Arc<dyn IStorageClient>) -> TransferManagerBuilder {
        TransferManagerBuilder::new(client)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Live multi-job checkpoint
    pub fn checkpoint(&self) -> &Checkpoint {
        &self.ctx.checkpoint
    }

    /// Token that [`shutdown`](Self::shutdown) cancels; derive per-job
    /// tokens from it to have shutdown reach them
    pub fn shutdown_token(&self) -> &CancellationToken {
        self.scheduler.shutdown_token()
    }

    /// Queue `job`; it is canceled by the handle or by shutdown
    pub fn submit(&self, job: TransferJob) -> Result<JobHandle> {
        let cancel = self.scheduler.shutdown_token().child_token();
        self.submit_with_cancel(job, cancel)
    }

    /// Queue `job` under a caller-supplied cancellation token
    pub fn submit_with_cancel(&self, job: TransferJob, cancel: CancellationToken) -> Result<JobHandle> {
        let job_id = job.id();
        let tracker = ProgressTracker::new();
        let controller = TransferController::new(job, self.ctx.clone(), tracker.clone(), cancel.clone());
        let report = self.scheduler.submit(controller)?;
        Ok(JobHandle {
            job_id,
            tracker,
            checkpoint: self.ctx.checkpoint.clone(),
            cancel,
            report,
        })
    }

    /// Copy between any two supported endpoints
    pub fn copy(
        &self,
        source: TransferLocation,
        dest: TransferLocation,
        method: TransferMethod,
        options: JobOptions,
    ) -> Result<JobHandle> {
        self.submit(TransferJob::new(source, dest, method).with_options(options))
    }

    /// Local file to a remote destination
    pub fn upload(
        &self,
        path: impl Into<std::path::PathBuf>,
        dest: TransferLocation,
        options: JobOptions,
    ) -> Result<JobHandle> {
        self.copy(TransferLocation::local(path), dest, TransferMethod::SyncCopy, options)
    }

    /// Remote source to a local file
    pub fn download(
        &self,
        source: TransferLocation,
        path: impl Into<std::path::PathBuf>,
        options: JobOptions,
    ) -> Result<JobHandle> {
        self.copy(source, TransferLocation::local(path), TransferMethod::SyncCopy, options)
    }

    /// Transfer every object under `source` to the same relative name under `dest`
    ///
    /// Entries run as independent jobs sharing one progress tracker; a
    /// failing entry does not stop its siblings.
    pub async fn copy_directory(
        &self,
        source: TransferLocation,
        dest: TransferLocation,
        method: TransferMethod,
        options: JobOptions,
    ) -> Result<DirectoryHandle> {
        let entries = self
            .ctx
            .client
            .list_entries(&source)
            .await
            .map_err(|e| match e {
                StorageError::NotFound(_) => TransferError::SourceNotFound(source.id()),
                other => TransferError::Storage(other),
            })?;

        let tracker = ProgressTracker::new();
        let cancel = self.scheduler.shutdown_token().child_token();
        let mut pending = Vec::with_capacity(entries.len());
        let mut failures = Vec::new();

        for entry in &entries {
            let name = entry.relative_name.clone();
            let children = source.child(&name).and_then(|s| Ok((s, dest.child(&name)?)));
            let job = match children {
                Ok((s, d)) => TransferJob::new(s, d, method).with_options(options.clone()),
                Err(e) => {
                    warn!(entry = %name, error = %e, "Skipping unaddressable entry");
                    tracker.record_outcome(JobStatus::Failed);
                    failures.push(SubTransferFailure {
                        relative_name: name,
                        error: e.into(),
                    });
                    continue;
                }
            };
            let job_id = job.id();
            let controller = TransferController::new(job, self.ctx.clone(), tracker.clone(), cancel.clone());
            match self.scheduler.submit(controller) {
                Ok(report) => pending.push(PendingEntry {
                    relative_name: name,
                    job_id,
                    report,
                }),
                Err(e) => {
                    warn!(entry = %name, %job_id, error = %e, "Entry not queued");
                    tracker.record_outcome(JobStatus::Failed);
                    failures.push(SubTransferFailure {
                        relative_name: name,
                        error: e,
                    });
                }
            }
        }

        info!(
            source = %source,
            dest = %dest,
            entries = entries.len(),
            "Directory transfer queued"
        );

        Ok(DirectoryHandle {
            total: entries.len(),
            tracker,
            cancel,
            pending,
            failures,
        })
    }

    /// Merge a serialized checkpoint; returns the number of jobs taken in
    ///
    /// Resubmitting a job with the same id resumes it.
    pub fn restore_checkpoint(&self, bytes: &[u8]) -> Result<usize> {
        let restored = Checkpoint::restore(bytes)?;
        let merged = self.ctx.checkpoint.merge(&restored);
        info!(jobs = merged, "Checkpoint restored");
        Ok(merged)
    }

    /// Restore every record held by the journal sink
    ///
    /// Unreadable records are logged and skipped. Returns the ids of the
    /// jobs that can be resumed.
    pub async fn load_journal(&self) -> Result<Vec<JobId>> {
        let Some(sink) = &self.journal_sink else {
            return Ok(Vec::new());
        };
        let records = sink.load_all().await.map_err(TransferError::Journal)?;

        let mut resumable = Vec::new();
        for (job_id, bytes) in records {
            match Checkpoint::restore(&bytes) {
                Ok(restored) => {
                    self.ctx.checkpoint.merge(&restored);
                    if self.ctx.checkpoint.contains(&job_id) {
                        resumable.push(job_id);
                    }
                }
                Err(e) => warn!(%job_id, error = %e, "Ignoring unreadable journal record"),
            }
        }
        info!(jobs = resumable.len(), "Journal loaded");
        Ok(resumable)
    }

    /// Encode the checkpoint of every unfinished job
    pub fn checkpoint_bytes(&self) -> Result<Vec<u8>> {
        self.ctx.checkpoint.serialize()
    }

    /// Cancel every job; checkpoints of running jobs are kept
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}

impl std::fmt::Debug for TransferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferManager")
            .field("jobs", &self.ctx.checkpoint.len())
            .field("free_slots", &self.ctx.slots.available())
            .field("journal", &self.journal_sink.is_some())
            .field("shut_down", &self.scheduler.is_shut_down())
            .finish()
    }
}

// ============================================================================
// JobHandle
// ============================================================================

/// Caller's view of one submitted job
pub struct JobHandle {
    job_id: JobId,
    tracker: ProgressTracker,
    checkpoint: Checkpoint,
    cancel: CancellationToken,
    report: oneshot::Receiver<JobReport>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.job_id
    }

    /// Stream of progress snapshots
    pub fn progress(&self) -> watch::Receiver<ProgressSnapshot> {
        self.tracker.subscribe()
    }

    pub fn latest(&self) -> ProgressSnapshot {
        self.tracker.snapshot()
    }

    /// Current checkpoint entry; `None` once the job finished
    pub fn checkpoint_snapshot(&self) -> Option<JobCheckpoint> {
        self.checkpoint.snapshot(&self.job_id)
    }

    /// Serialized checkpoint of this job, suitable for `restore_checkpoint`
    pub fn checkpoint_bytes(&self) -> Result<Vec<u8>> {
        self.checkpoint.serialize_job(&self.job_id)
    }

    /// Request cooperative cancellation
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the job's terminal report
    pub async fn wait(self) -> Result<JobReport> {
        self.report.await.map_err(|_| TransferError::SchedulerClosed)
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("job_id", &self.job_id)
            .field("progress", &self.tracker.snapshot())
            .finish()
    }
}

// ============================================================================
// DirectoryHandle
// ============================================================================

struct PendingEntry {
    relative_name: String,
    job_id: JobId,
    report: oneshot::Receiver<JobReport>,
}

/// One entry of a directory transfer that did not succeed
#[derive(Debug)]
pub struct SubTransferFailure {
    pub relative_name: String,
    pub error: TransferError,
}

/// Aggregate outcome of a directory transfer
#[derive(Debug, Default)]
pub struct DirectoryReport {
    pub total: usize,
    pub completed: usize,
    pub skipped: usize,
    pub canceled: usize,
    pub bytes_transferred: u64,
    pub failures: Vec<SubTransferFailure>,
}

impl DirectoryReport {
    /// `Err(SubTransferFailed)` when any entry failed
    pub fn into_result(self) -> Result<DirectoryReport> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(TransferError::SubTransferFailed {
                failed: self.failures.len(),
                total: self.total,
            })
        }
    }
}

/// Caller's view of a directory transfer
pub struct DirectoryHandle {
    total: usize,
    tracker: ProgressTracker,
    cancel: CancellationToken,
    pending: Vec<PendingEntry>,
    failures: Vec<SubTransferFailure>,
}

impl DirectoryHandle {
    /// Number of entries found under the source
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn job_ids(&self) -> Vec<JobId> {
        self.pending.iter().map(|p| p.job_id).collect()
    }

    /// Aggregate progress across every entry
    pub fn progress(&self) -> watch::Receiver<ProgressSnapshot> {
        self.tracker.subscribe()
    }

    pub fn latest(&self) -> ProgressSnapshot {
        self.tracker.snapshot()
    }

    /// Cancel every entry still running or queued
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for every entry
    pub async fn wait(self) -> DirectoryReport {
        let mut report = DirectoryReport {
            total: self.total,
            failures: self.failures,
            ..DirectoryReport::default()
        };

        for entry in self.pending {
            let outcome = entry.report.await.map_err(|_| TransferError::SchedulerClosed);
            match outcome {
                Ok(job) => {
                    report.bytes_transferred += job.bytes_transferred;
                    match job.status {
                        JobStatus::Completed => report.completed += 1,
                        JobStatus::Skipped => report.skipped += 1,
                        JobStatus::Canceled => report.canceled += 1,
                        _ => report.failures.push(SubTransferFailure {
                            relative_name: entry.relative_name,
                            error: job.error.unwrap_or_else(|| {
                                TransferError::InvalidOptions(format!("ended as {}", job.status))
                            }),
                        }),
                    }
                }
                Err(e) => report.failures.push(SubTransferFailure {
                    relative_name: entry.relative_name,
                    error: e,
                }),
            }
        }

        info!(
            total = report.total,
            completed = report.completed,
            skipped = report.skipped,
            failed = report.failures.len(),
            "Directory transfer finished"
        );
        report
    }
}

impl std::fmt::Debug for DirectoryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryHandle")
            .field("total", &self.total)
            .field("progress", &self.tracker.snapshot())
            .finish()
    }
}
