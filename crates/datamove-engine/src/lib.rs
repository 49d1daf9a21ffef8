//! Datamove Engine - Parallel, resumable chunked transfers
//!
//! Provides:
//! - A bounded buffer pool shared by every in-flight chunk
//! - Per-job checkpoints with exact resume and a serialized journal writer
//! - A handler matrix normalizing blob, file-share, local and stream endpoints
//! - The per-job transfer controller and the slot scheduler that runs it
//! - The [`TransferManager`](manager::TransferManager) facade
//!
//! ## Modules
//!
//! - [`buffer_pool`] - Fixed-size block leasing with cooperative backpressure
//! - [`checkpoint`] - Shared multi-job checkpoint and its serialized form
//! - [`journal`] - Single-writer task in front of the journal sink
//! - [`handlers`] - Source/destination variants and overwrite negotiation
//! - [`controller`] - Per-job state machine
//! - [`scheduler`] - Execution slots and the FIFO job queue
//! - [`manager`] - Request facade and job handles

pub mod buffer_pool;
pub mod checkpoint;
pub mod chunking;
pub mod controller;
pub mod handlers;
pub mod journal;
pub mod local;
pub mod logging;
pub mod manager;
pub mod permissions;
pub mod policy;
pub mod progress;
pub mod scheduler;

use datamove_core::domain::{CheckpointError, DomainError, JobStatus};
use datamove_core::ports::StorageError;
use thiserror::Error;

pub use controller::JobReport;
pub use manager::{
    DirectoryHandle, DirectoryReport, JobHandle, SubTransferFailure, TransferManager,
    TransferManagerBuilder,
};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, TransferError>;

/// Errors that end a transfer job
#[derive(Debug, Error)]
pub enum TransferError {
    /// The source object does not exist
    #[error("Source not found: {0}")]
    SourceNotFound(String),

    /// The destination exists and could not be negotiated
    #[error("Destination conflict: {0}")]
    DestinationConflict(String),

    /// A caller-supplied or recorded precondition no longer holds
    #[error("Precondition mismatch: {0}")]
    PreconditionMismatch(String),

    /// The source changed after its ETag was pinned
    #[error("Source changed during transfer: {0}")]
    ETagChanged(String),

    /// The allocator refused a buffer
    #[error("Cannot allocate a {size}-byte buffer")]
    BufferAllocation { size: usize },

    /// A checkpoint describes an impossible state
    #[error("Checkpoint corrupted: {0}")]
    CheckpointCorrupted(String),

    /// Cooperative cancellation; the checkpoint remains valid
    #[error("Operation canceled")]
    Canceled,

    /// The overwrite prompt rejected the destination
    #[error("Overwrite declined: {0}")]
    OverwriteDeclined(String),

    /// Entries of a directory transfer failed; siblings still ran
    #[error("{failed} of {total} sub-transfers failed")]
    SubTransferFailed { failed: usize, total: usize },

    /// The endpoint combination or method is not supported
    #[error("Unsupported transfer: {0}")]
    Unsupported(String),

    /// Caller options that cannot be honored
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    /// A storage failure passed through unmodified
    #[error("Storage error: {0}")]
    Storage(#[source] StorageError),

    /// The journal sink failed
    #[error("Journal error: {0}")]
    Journal(#[source] anyhow::Error),

    /// The overwrite prompt failed
    #[error("Overwrite prompt failed: {0}")]
    Prompt(#[source] anyhow::Error),

    /// The scheduler stopped before the job ran
    #[error("Scheduler is shut down")]
    SchedulerClosed,

    /// A domain-level error propagated from datamove-core
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),
}

impl TransferError {
    /// Status a job ends in when it stops with this error
    pub fn job_status(&self) -> JobStatus {
        match self {
            TransferError::Canceled => JobStatus::Canceled,
            TransferError::OverwriteDeclined(_) => JobStatus::Skipped,
            _ => JobStatus::Failed,
        }
    }
}

impl From<StorageError> for TransferError {
    fn from(e: StorageError) -> Self {
        TransferError::Storage(e)
    }
}

impl From<CheckpointError> for TransferError {
    fn from(e: CheckpointError) -> Self {
        match e {
            CheckpointError::ETagMismatch { .. } => {
                TransferError::PreconditionMismatch(e.to_string())
            }
            other => TransferError::CheckpointCorrupted(other.to_string()),
        }
    }
}
