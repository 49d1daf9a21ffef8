//! Per-job transfer state machine.
//!
//! A [`TransferController`] drives one job through its phases:
//!
//! ```text
//! Created ─► FetchingAttributes ─► NegotiatingDestination ─► Transferring ─► Committing ─► Completed
//!                  │                        │                     │               │
//!                  └────────────────────────┴──────────┬──────────┴───────────────┘
//!                                                      ▼
//!                                         Failed | Skipped | Canceled
//! ```
//!
//! ## Chunk execution
//!
//! Chunks run as spawned tasks, each holding one execution slot:
//!
//! ```text
//! slot ─► lease buffer ─► read source ─► write dest ─► release buffer ─► ChunkDone
//!                                                                           │
//!     controller: record chunk ─► persist journal ─► report delta ─► free slot
//! ```
//!
//! Only the controller task touches the job's checkpoint entry, so
//! completion recording is serialized while chunks finish in any order.
//! Cancellation is checked at phase boundaries and before each chunk is
//! issued; in-flight chunks always run to completion.

use std::sync::Arc;

use datamove_core::domain::{
    Attributes, EndpointKind, JobCheckpoint, JobId, JobStatus, OverwriteDecision, TransferJob,
    TransferMethod,
};
use datamove_core::ports::{IOverwritePrompt, IProgressSink, IStorageClient, JobOutcome};
use tokio::sync::OwnedSemaphorePermit;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffer_pool::BufferPools;
use crate::checkpoint::Checkpoint;
use crate::chunking::{plan_chunk_size, plan_chunks, ChunkPlan, ChunkSettings, ChunkWork};
use crate::handlers::{
    negotiate, select_handlers, DestHandler, NegotiationContext, OverwriteGate, SourceHandler,
};
use crate::journal::JournalWriter;
use crate::permissions::PermissionCache;
use crate::progress::ProgressTracker;
use crate::scheduler::ExecutionSlots;
use crate::{Result, TransferError};

// ============================================================================
// EngineContext
// ============================================================================

/// Shared collaborators every controller is built with
#[derive(Clone)]
pub struct EngineContext {
    pub client: Arc<dyn IStorageClient>,
    pub buffers: BufferPools,
    pub checkpoint: Checkpoint,
    pub journal: Option<JournalWriter>,
    pub progress_sink: Arc<dyn IProgressSink>,
    pub prompt: Arc<dyn IOverwritePrompt>,
    pub permissions: PermissionCache,
    pub slots: ExecutionSlots,
    pub chunk_settings: ChunkSettings,
}

// ============================================================================
// Phase / JobReport
// ============================================================================

/// Where a controller is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    FetchingAttributes,
    NegotiatingDestination,
    Transferring,
    Committing,
    Completed,
    Failed,
    Skipped,
    Canceled,
}

impl From<JobStatus> for Phase {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Completed => Phase::Completed,
            JobStatus::Skipped => Phase::Skipped,
            JobStatus::Canceled => Phase::Canceled,
            JobStatus::NotStarted => Phase::Created,
            JobStatus::Transferring => Phase::Transferring,
            JobStatus::Failed => Phase::Failed,
        }
    }
}

/// Final result of one job
#[derive(Debug)]
pub struct JobReport {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Bytes in place at the destination, including resumed progress
    pub bytes_transferred: u64,
    pub error: Option<TransferError>,
}

impl JobReport {
    /// `Ok` for completed and skipped jobs, the cause otherwise
    pub fn into_result(self) -> Result<JobReport> {
        match self.status {
            JobStatus::Completed | JobStatus::Skipped => Ok(self),
            JobStatus::Canceled => Err(self.error.unwrap_or(TransferError::Canceled)),
            _ => Err(self
                .error
                .unwrap_or_else(|| TransferError::InvalidOptions(format!("job ended as {}", self.status)))),
        }
    }
}

// ============================================================================
// TransferController
// ============================================================================

/// Result of one chunk task, carrying its slot back to the controller
struct ChunkDone {
    index: u64,
    bytes: u64,
    _slot: OwnedSemaphorePermit,
}

/// Read-only view of the endpoints shared by chunk tasks
struct ChunkIo {
    source: SourceHandler,
    dest: DestHandler,
    buffers: BufferPools,
    /// Set for service-side copies
    copy_source_uri: Option<String>,
}

pub struct TransferController {
    job: TransferJob,
    ctx: EngineContext,
    tracker: ProgressTracker,
    cancel: CancellationToken,
    phase: Phase,
    bytes_transferred: u64,
}

impl TransferController {
    pub fn new(
        job: TransferJob,
        ctx: EngineContext,
        tracker: ProgressTracker,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            job,
            ctx,
            tracker,
            cancel,
            phase: Phase::Created,
            bytes_transferred: 0,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job.id()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Drive the job to a terminal status
    ///
    /// The progress sink hears about the outcome exactly once.
    pub async fn run(mut self) -> JobReport {
        let result = self.execute().await;
        self.finish(result).await
    }

    /// Finish a job that never got a slot as canceled
    pub async fn cancel_unstarted(mut self) -> JobReport {
        self.finish(Err(TransferError::Canceled)).await
    }

    async fn execute(&mut self) -> Result<()> {
        let job_id = self.job.id();

        self.enter(Phase::FetchingAttributes)?;
        self.job.transition_to(JobStatus::Transferring)?;
        let (mut source, mut dest) = select_handlers(&self.job, Arc::clone(&self.ctx.client))?;

        let restored = self.ctx.checkpoint.snapshot(&job_id);
        if let Some(restored) = &restored {
            if restored.source_id() != source.location().id() || restored.dest_id() != dest.location().id() {
                return Err(TransferError::CheckpointCorrupted(format!(
                    "checkpoint of job {job_id} describes {} -> {}",
                    restored.source_id(),
                    restored.dest_id()
                )));
            }
        }
        let source_attributes = source.fetch_attributes(restored.as_ref()).await?.clone();
        let total_length = source_attributes.length;
        let resumed = restored.is_some();
        let cached = restored
            .as_ref()
            .map_or(OverwriteDecision::Undecided, JobCheckpoint::overwrite);

        if !resumed {
            let chunk_size = plan_chunk_size(
                total_length,
                &self.ctx.chunk_settings,
                dest.chunk_alignment(),
                self.job.options().chunk_size,
            )?;
            let checkpoint = JobCheckpoint::new(
                source.location().id(),
                dest.location().id(),
                total_length,
                chunk_size,
            )?
            .with_etag(source.location().etag().cloned());
            self.ctx.checkpoint.insert(job_id, checkpoint);
            self.persist_checkpoint().await;
        }
        let snapshot = self
            .ctx
            .checkpoint
            .snapshot(&job_id)
            .ok_or_else(|| TransferError::CheckpointCorrupted(format!("no checkpoint for job {job_id}")))?;

        if self.job.method() == TransferMethod::SyncCopy
            && snapshot.chunk_size() > self.ctx.buffers.max_block_size()
        {
            return Err(TransferError::CheckpointCorrupted(format!(
                "chunk size {} exceeds buffer block size {}",
                snapshot.chunk_size(),
                self.ctx.buffers.max_block_size()
            )));
        }

        self.bytes_transferred = snapshot.completed_bytes();
        self.tracker.add_bytes(self.bytes_transferred);
        info!(
            %job_id,
            source = %source.location(),
            dest = %dest.location(),
            total_length,
            chunk_size = snapshot.chunk_size(),
            resumed_at = snapshot.contiguous_completed_offset(),
            "Transfer starting"
        );

        self.enter(Phase::NegotiatingDestination)?;
        let decision = self
            .negotiate_destination(&source, &mut dest, &source_attributes, cached)
            .await?;
        if decision == OverwriteDecision::Keep {
            return Err(TransferError::OverwriteDeclined(dest.location().id()));
        }

        self.enter(Phase::Transferring)?;
        let ranges = if snapshot.is_complete() {
            None
        } else {
            let start = snapshot.contiguous_completed_offset();
            source.get_copy_ranges(start, total_length - start).await?
        };
        let plan = plan_chunks(&snapshot, ranges.as_deref(), dest.supports_sparse());
        let copy_source_uri = match self.job.method() {
            TransferMethod::ServiceSideSyncCopy if !plan.is_empty() => Some(source.copy_source_uri().await?),
            _ => None,
        };
        let sequential = dest.sequential_writes();
        let io = Arc::new(ChunkIo {
            source: source.clone(),
            dest: dest.clone(),
            buffers: self.ctx.buffers.clone(),
            copy_source_uri,
        });
        self.run_chunks(plan, io, sequential).await?;

        self.enter(Phase::Committing)?;
        let desired = self.desired_attributes(&source, &dest, &source_attributes).await?;
        dest.commit(total_length, &desired).await?;
        Ok(())
    }

    /// Check for cancellation, then move to `phase`
    fn enter(&mut self, phase: Phase) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(TransferError::Canceled);
        }
        debug!(job_id = %self.job.id(), ?phase, "Entering phase");
        self.phase = phase;
        Ok(())
    }

    async fn negotiate_destination(
        &mut self,
        source: &SourceHandler,
        dest: &mut DestHandler,
        source_attributes: &Attributes,
        restored: OverwriteDecision,
    ) -> Result<OverwriteDecision> {
        let gate = OverwriteGate::with_decision(restored);
        let ctx = NegotiationContext {
            source: source.location(),
            source_attributes,
            total_length: source_attributes.length,
            force_overwrite: self.job.options().force_overwrite,
            cached: self.job.overwrite(),
            prompt: self.ctx.prompt.as_ref(),
        };
        let decision = gate
            .resolve(|| async move { negotiate(dest, ctx).await.map(|outcome| outcome.decision) })
            .await?;

        if decision == OverwriteDecision::Overwrite && !restored.is_decided() {
            self.ctx.checkpoint.set_overwrite(&self.job.id(), decision)?;
            self.persist_checkpoint().await;
        }
        self.job.set_overwrite(decision);
        Ok(decision)
    }

    async fn run_chunks(&mut self, plan: Vec<ChunkPlan>, io: Arc<ChunkIo>, sequential: bool) -> Result<()> {
        let job_id = self.job.id();
        let max_in_flight = if sequential { 1 } else { usize::MAX };
        let mut pending = plan.into_iter().peekable();
        let mut in_flight: JoinSet<Result<ChunkDone>> = JoinSet::new();
        let mut first_error: Option<TransferError> = None;
        let mut canceled = false;

        loop {
            // No-data chunks on a sparse destination complete without I/O
            while first_error.is_none()
                && !canceled
                && pending.peek().is_some_and(|c| c.work == ChunkWork::Skip)
            {
                if let Some(chunk) = pending.next() {
                    tracing::trace!(%job_id, chunk = chunk.index, "Sparse chunk skipped");
                    if let Err(e) = self.complete_chunk(chunk.index, chunk.len).await {
                        first_error = Some(e);
                    }
                }
            }

            let can_issue = first_error.is_none()
                && !canceled
                && pending.peek().is_some()
                && in_flight.len() < max_in_flight;
            if !can_issue && in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                _ = self.cancel.cancelled(), if !canceled => {
                    info!(%job_id, in_flight = in_flight.len(), "Cancellation requested; draining chunks");
                    canceled = true;
                }

                Some(joined) = in_flight.join_next() => {
                    let outcome = joined.map_err(|e| {
                        TransferError::Storage(anyhow::anyhow!("chunk task failed: {e}").into())
                    });
                    match outcome.and_then(|r| r) {
                        Ok(done) => {
                            if let Err(e) = self.complete_chunk(done.index, done.bytes).await {
                                first_error.get_or_insert(e);
                            }
                        }
                        Err(e) => {
                            warn!(%job_id, error = %e, "Chunk failed");
                            first_error.get_or_insert(e);
                        }
                    }
                }

                slot = self.ctx.slots.acquire(), if can_issue => {
                    match (slot, pending.next()) {
                        (Ok(slot), Some(chunk)) => {
                            in_flight.spawn(run_chunk(Arc::clone(&io), chunk, slot));
                        }
                        (Err(e), _) => {
                            first_error.get_or_insert(e);
                        }
                        (Ok(_), None) => {}
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None if canceled => Err(TransferError::Canceled),
            None => Ok(()),
        }
    }

    /// Record a finished chunk, persist, then report its bytes
    async fn complete_chunk(&mut self, index: u64, bytes: u64) -> Result<()> {
        let job_id = self.job.id();
        let advanced = self.ctx.checkpoint.record_chunk_complete(&job_id, index)?;
        self.persist_checkpoint().await;

        self.bytes_transferred += bytes;
        self.tracker.add_bytes(bytes);
        self.ctx.progress_sink.on_bytes_transferred(&job_id, bytes);
        debug!(%job_id, chunk = index, bytes, advanced, "Chunk complete");
        Ok(())
    }

    /// Write the job's checkpoint through the journal, if one is attached
    ///
    /// A failed write leaves the previous record in place, which is still a
    /// valid (older) resume point, so the job carries on.
    async fn persist_checkpoint(&self) {
        let Some(journal) = &self.ctx.journal else {
            return;
        };
        let job_id = self.job.id();
        let record = match self.ctx.checkpoint.serialize_job(&job_id) {
            Ok(record) => record,
            Err(e) => {
                warn!(%job_id, error = %e, "Cannot encode checkpoint");
                return;
            }
        };
        if let Err(e) = journal.persist(job_id, record).await {
            warn!(%job_id, error = %e, "Journal write failed");
        }
    }

    async fn desired_attributes(
        &self,
        source: &SourceHandler,
        dest: &DestHandler,
        source_attributes: &Attributes,
    ) -> Result<Attributes> {
        let options = self.job.options();
        let mut desired = Attributes::with_length(source_attributes.length);
        desired.apply_settable_from(source_attributes);
        if let Some(content_type) = &options.content_type {
            desired.content_type = Some(content_type.clone());
        }
        if let Some(metadata) = &options.metadata {
            desired.metadata = metadata.clone();
        }

        let file_to_file = source.location().endpoint_kind() == EndpointKind::File
            && dest.location().endpoint_kind() == EndpointKind::File;
        if !(file_to_file && options.preserve_smb_attributes) {
            desired.smb = None;
        }
        desired.sddl = None;
        if file_to_file && options.preserve_smb_permissions {
            desired.sddl = match (&source_attributes.sddl, &source_attributes.permission_key) {
                (Some(sddl), _) => Some(sddl.clone()),
                (None, Some(key)) => {
                    let sddl = self
                        .ctx
                        .permissions
                        .get_or_fetch(key, || self.ctx.client.fetch_permission(source.location(), key))
                        .await?;
                    Some(sddl.to_string())
                }
                (None, None) => None,
            };
        }
        Ok(desired)
    }

    async fn finish(&mut self, result: Result<()>) -> JobReport {
        let job_id = self.job.id();
        let status = match &result {
            Ok(()) => JobStatus::Completed,
            Err(e) => e.job_status(),
        };
        if let Err(e) = self.job.transition_to(status) {
            debug!(%job_id, error = %e, "Status transition not recorded");
        }
        self.phase = Phase::from(status);

        if status != JobStatus::Canceled {
            self.ctx.checkpoint.remove(&job_id);
            if let Some(journal) = &self.ctx.journal {
                if let Err(e) = journal.remove(job_id).await {
                    warn!(%job_id, error = %e, "Journal cleanup failed");
                }
            }
        }
        self.tracker.record_outcome(status);

        let error = result.err();
        match (&error, status) {
            (None, _) => info!(%job_id, bytes = self.bytes_transferred, "Transfer completed"),
            (Some(e), JobStatus::Failed) => error!(%job_id, error = %e, "Transfer failed"),
            (Some(e), _) => info!(%job_id, %status, reason = %e, "Transfer stopped"),
        }

        self.ctx.progress_sink.on_job_finished(&JobOutcome {
            job_id,
            status,
            bytes_transferred: self.bytes_transferred,
            error: error.as_ref().map(ToString::to_string),
        });

        JobReport {
            job_id,
            status,
            bytes_transferred: self.bytes_transferred,
            error,
        }
    }
}

impl std::fmt::Debug for TransferController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferController")
            .field("job_id", &self.job.id())
            .field("phase", &self.phase)
            .finish()
    }
}

/// One chunk's I/O; the buffer is back in its pool before this returns
async fn run_chunk(io: Arc<ChunkIo>, chunk: ChunkPlan, slot: OwnedSemaphorePermit) -> Result<ChunkDone> {
    if let Some(uri) = &io.copy_source_uri {
        let condition = io.source.location().read_condition();
        io.dest
            .copy_from_uri(chunk.offset, chunk.len, uri, condition.as_ref())
            .await?;
    } else if chunk.work != ChunkWork::Skip {
        let len = usize::try_from(chunk.len).map_err(|_| TransferError::BufferAllocation { size: usize::MAX })?;
        let mut buffer = io.buffers.lease(chunk.len).await?;
        let data = &mut buffer[..len];
        match chunk.work {
            ChunkWork::ZeroFill => data.fill(0),
            _ => io.source.read_exact_at(chunk.offset, data).await?,
        }
        io.dest.write(chunk.offset, data).await?;
        buffer.release();
    }

    Ok(ChunkDone {
        index: chunk.index,
        bytes: chunk.len,
        _slot: slot,
    })
}
