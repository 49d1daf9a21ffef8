//! Domain error types
//!
//! This module defines error types specific to domain operations,
//! including validation failures, invalid state transitions, and
//! checkpoint decoding failures.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid state transition attempt
    #[error("Invalid state transition from {from} to {to}")]
    InvalidState {
        /// The current state
        from: String,
        /// The attempted target state
        to: String,
    },

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// Invalid ETag value
    #[error("Invalid etag: {0}")]
    InvalidETag(String),

    /// Invalid location descriptor
    #[error("Invalid location: {0}")]
    InvalidLocation(String),

    /// Byte range outside the addressed object
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// ID parsing error
    #[error("Invalid ID format: {0}")]
    InvalidId(String),
}

/// Errors raised while recording, validating, or decoding checkpoints
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CheckpointError {
    /// The record was written by a format version this build does not know
    #[error("Unsupported checkpoint version {found} (expected {expected})")]
    UnsupportedVersion {
        /// Version found in the record
        found: u32,
        /// Version this build writes
        expected: u32,
    },

    /// The byte stream is not a checkpoint record
    #[error("Checkpoint decode failed: {0}")]
    Decode(String),

    /// The record decodes but describes an impossible state
    #[error("Checkpoint corrupted: {0}")]
    Corrupted(String),

    /// A chunk index beyond the last chunk of the job
    #[error("Chunk index {index} out of range (job has {count} chunks)")]
    ChunkOutOfRange {
        /// Offending index
        index: u64,
        /// Number of chunks in the job
        count: u64,
    },

    /// The live source no longer matches the recorded identity
    #[error("Source etag changed: recorded {recorded}, live {live}")]
    ETagMismatch {
        /// ETag captured when the checkpoint was created
        recorded: String,
        /// ETag observed now
        live: String,
    },
}
