//! Transfer job entity and its status state machine

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::location::{EndpointKind, TransferLocation};
use super::newtypes::JobId;

// ============================================================================
// TransferMethod / TransferDirection
// ============================================================================

/// How bytes move between the endpoints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMethod {
    /// Bytes are read into leased buffers and written by this process
    #[default]
    SyncCopy,
    /// The destination service pulls each range from a source URI
    ServiceSideSyncCopy,
}

/// Direction derived from the endpoint kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    Upload,
    Download,
    Copy,
}

impl TransferDirection {
    /// Classify a source/destination pair
    pub fn classify(source: EndpointKind, dest: EndpointKind) -> Self {
        let local_like = |k: EndpointKind| {
            matches!(
                k,
                EndpointKind::Local | EndpointKind::Stream | EndpointKind::Uri
            )
        };
        match (local_like(source), local_like(dest)) {
            (true, false) => TransferDirection::Upload,
            (false, true) => TransferDirection::Download,
            _ => TransferDirection::Copy,
        }
    }
}

// ============================================================================
// OverwriteDecision
// ============================================================================

/// Tri-state overwrite flag, persisted in the checkpoint once decided
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverwriteDecision {
    #[default]
    Undecided,
    /// Destination may be (re)written
    Overwrite,
    /// Destination must be left alone; the job is skipped
    Keep,
}

impl OverwriteDecision {
    pub fn is_decided(&self) -> bool {
        !matches!(self, OverwriteDecision::Undecided)
    }
}

// ============================================================================
// JobStatus
// ============================================================================

/// Lifecycle status of a transfer job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    NotStarted,
    Transferring,
    Completed,
    Failed,
    /// Overwrite declined; a counted, non-error outcome
    Skipped,
    /// Stopped cooperatively; the checkpoint stays valid for resume
    Canceled,
}

impl JobStatus {
    /// Completed, Failed and Skipped end a job for good
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Skipped
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            JobStatus::NotStarted => "NotStarted",
            JobStatus::Transferring => "Transferring",
            JobStatus::Completed => "Completed",
            JobStatus::Failed => "Failed",
            JobStatus::Skipped => "Skipped",
            JobStatus::Canceled => "Canceled",
        }
    }

    /// Whether `self -> target` is a legal transition
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        match (self, target) {
            (JobStatus::NotStarted, JobStatus::Transferring) => true,
            (JobStatus::NotStarted, JobStatus::Failed) => true,
            (JobStatus::NotStarted, JobStatus::Canceled) => true,

            (JobStatus::Transferring, JobStatus::Completed) => true,
            (JobStatus::Transferring, JobStatus::Failed) => true,
            (JobStatus::Transferring, JobStatus::Skipped) => true,
            (JobStatus::Transferring, JobStatus::Canceled) => true,

            // resume
            (JobStatus::Canceled, JobStatus::Transferring) => true,
            (JobStatus::Canceled, JobStatus::Failed) => true,

            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::NotStarted => "not_started",
            JobStatus::Transferring => "transferring",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Skipped => "skipped",
            JobStatus::Canceled => "canceled",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// JobOptions
// ============================================================================

/// Per-job knobs supplied by the caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Skip overwrite negotiation and always (re)create the destination
    pub force_overwrite: bool,
    /// Fixed chunk size instead of the adaptive plan
    pub chunk_size: Option<u64>,
    /// Replace the source's custom metadata on the destination
    pub metadata: Option<BTreeMap<String, String>>,
    /// Replace the source's content type on the destination
    pub content_type: Option<String>,
    /// Carry SMB attributes and timestamps between file shares
    pub preserve_smb_attributes: bool,
    /// Carry the SDDL security descriptor between file shares
    pub preserve_smb_permissions: bool,
}

// ============================================================================
// TransferJob
// ============================================================================

/// One unit of work: a single object, or one entry of a directory transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferJob {
    id: JobId,
    source: TransferLocation,
    dest: TransferLocation,
    method: TransferMethod,
    overwrite: OverwriteDecision,
    status: JobStatus,
    options: JobOptions,
    created_at: DateTime<Utc>,
}

impl TransferJob {
    /// Create a job with a fresh id
    pub fn new(source: TransferLocation, dest: TransferLocation, method: TransferMethod) -> Self {
        Self::with_id(JobId::new(), source, dest, method)
    }

    /// Create a job with a known id, typically to resume it
    pub fn with_id(
        id: JobId,
        source: TransferLocation,
        dest: TransferLocation,
        method: TransferMethod,
    ) -> Self {
        Self {
            id,
            source,
            dest,
            method,
            overwrite: OverwriteDecision::Undecided,
            status: JobStatus::NotStarted,
            options: JobOptions::default(),
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn source(&self) -> &TransferLocation {
        &self.source
    }

    pub fn dest(&self) -> &TransferLocation {
        &self.dest
    }

    pub fn source_mut(&mut self) -> &mut TransferLocation {
        &mut self.source
    }

    pub fn dest_mut(&mut self) -> &mut TransferLocation {
        &mut self.dest
    }

    pub fn method(&self) -> TransferMethod {
        self.method
    }

    pub fn direction(&self) -> TransferDirection {
        TransferDirection::classify(self.source.endpoint_kind(), self.dest.endpoint_kind())
    }

    pub fn options(&self) -> &JobOptions {
        &self.options
    }

    pub fn overwrite(&self) -> OverwriteDecision {
        self.overwrite
    }

    pub fn set_overwrite(&mut self, decision: OverwriteDecision) {
        self.overwrite = decision;
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Move to `target`, rejecting illegal transitions
    pub fn transition_to(&mut self, target: JobStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(target) {
            return Err(DomainError::InvalidState {
                from: self.status.name().to_string(),
                to: target.name().to_string(),
            });
        }
        self.status = target;
        Ok(())
    }
}
