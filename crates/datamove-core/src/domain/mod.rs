//! Domain entities and business logic
//!
//! This module contains the core domain types for the transfer engine:
//! - Newtypes for job identifiers and ETags
//! - Endpoint descriptors and the attribute bag
//! - The transfer job and its status state machine
//! - Per-job checkpoints and their versioned persisted form
//! - Domain-specific error types

pub mod attributes;
pub mod checkpoint;
pub mod errors;
pub mod job;
pub mod location;
pub mod newtypes;

// Re-export commonly used types
pub use attributes::{Attributes, SmbProperties};
pub use checkpoint::{CheckpointRecord, JobCheckpoint, JobCheckpointRecord, CHECKPOINT_VERSION};
pub use errors::{CheckpointError, DomainError};
pub use job::{
    JobOptions, JobStatus, OverwriteDecision, TransferDirection, TransferJob, TransferMethod,
};
pub use location::{
    AccessCondition, BlobType, EndpointKind, LocationKind, RequestOptions, TransferLocation,
};
pub use newtypes::*;
