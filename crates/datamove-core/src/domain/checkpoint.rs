//! Per-job transfer progress and its versioned persisted form
//!
//! Completed chunks are tracked as a contiguous prefix (`contiguous_chunks`)
//! plus a sparse ordered set of indices completed out of order beyond it.
//! Every time the prefix can grow, indices are moved out of the sparse set,
//! so the set only ever holds chunks that finished ahead of a gap.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::errors::CheckpointError;
use super::job::OverwriteDecision;
use super::newtypes::{ETag, JobId};

/// Format version written by this build
pub const CHECKPOINT_VERSION: u32 = 1;

// ============================================================================
// JobCheckpoint
// ============================================================================

/// Progress of one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobCheckpoint {
    source_id: String,
    dest_id: String,
    etag: Option<ETag>,
    total_length: u64,
    chunk_size: u64,
    contiguous_chunks: u64,
    completed: BTreeSet<u64>,
    overwrite: OverwriteDecision,
}

impl JobCheckpoint {
    /// Start tracking a job with no chunk completed
    pub fn new(
        source_id: impl Into<String>,
        dest_id: impl Into<String>,
        total_length: u64,
        chunk_size: u64,
    ) -> Result<Self, CheckpointError> {
        if chunk_size == 0 {
            return Err(CheckpointError::Corrupted(
                "chunk size must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            source_id: source_id.into(),
            dest_id: dest_id.into(),
            etag: None,
            total_length,
            chunk_size,
            contiguous_chunks: 0,
            completed: BTreeSet::new(),
            overwrite: OverwriteDecision::Undecided,
        })
    }

    #[must_use]
    pub fn with_etag(mut self, etag: Option<ETag>) -> Self {
        self.etag = etag;
        self
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn dest_id(&self) -> &str {
        &self.dest_id
    }

    pub fn etag(&self) -> Option<&ETag> {
        self.etag.as_ref()
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn overwrite(&self) -> OverwriteDecision {
        self.overwrite
    }

    pub fn set_overwrite(&mut self, decision: OverwriteDecision) {
        self.overwrite = decision;
    }

    /// Number of chunks covering `[0, total_length)`
    pub fn chunk_count(&self) -> u64 {
        self.total_length.div_ceil(self.chunk_size)
    }

    /// Byte offset and length of chunk `index`
    pub fn chunk_span(&self, index: u64) -> Option<(u64, u64)> {
        if index >= self.chunk_count() {
            return None;
        }
        let offset = index * self.chunk_size;
        let len = self.chunk_size.min(self.total_length - offset);
        Some((offset, len))
    }

    /// Mark chunk `index` durable
    ///
    /// Returns true when the contiguous prefix grew as a result.
    pub fn record_chunk_complete(&mut self, index: u64) -> Result<bool, CheckpointError> {
        let count = self.chunk_count();
        if index >= count {
            return Err(CheckpointError::ChunkOutOfRange { index, count });
        }
        if index < self.contiguous_chunks {
            return Ok(false);
        }
        self.completed.insert(index);
        let before = self.contiguous_chunks;
        self.compact();
        Ok(self.contiguous_chunks > before)
    }

    pub fn is_chunk_complete(&self, index: u64) -> bool {
        index < self.contiguous_chunks || self.completed.contains(&index)
    }

    /// Largest prefix length whose chunks are all durable; never exceeds the total
    pub fn contiguous_completed_offset(&self) -> u64 {
        self.contiguous_chunks
            .saturating_mul(self.chunk_size)
            .min(self.total_length)
    }

    /// Bytes covered by every completed chunk, contiguous or not
    pub fn completed_bytes(&self) -> u64 {
        let sparse: u64 = self
            .completed
            .iter()
            .filter_map(|&i| self.chunk_span(i).map(|(_, len)| len))
            .sum();
        self.contiguous_completed_offset() + sparse
    }

    /// Indices completed beyond the contiguous prefix
    pub fn sparse_completed(&self) -> impl Iterator<Item = u64> + '_ {
        self.completed.iter().copied()
    }

    /// Indices still to transfer, in ascending order
    pub fn pending_chunks(&self) -> impl Iterator<Item = u64> + '_ {
        (self.contiguous_chunks..self.chunk_count()).filter(|i| !self.completed.contains(i))
    }

    pub fn is_complete(&self) -> bool {
        self.contiguous_chunks >= self.chunk_count()
    }

    /// Check a restored checkpoint against freshly fetched source attributes
    pub fn validate_against_source(
        &self,
        live_length: u64,
        live_etag: Option<&ETag>,
    ) -> Result<(), CheckpointError> {
        if let Some(recorded) = &self.etag {
            if live_etag != Some(recorded) {
                return Err(CheckpointError::ETagMismatch {
                    recorded: recorded.to_string(),
                    live: live_etag.map_or_else(|| "<none>".to_string(), ToString::to_string),
                });
            }
        }
        if self.contiguous_completed_offset() > live_length {
            return Err(CheckpointError::Corrupted(format!(
                "recorded offset {} exceeds source length {}",
                self.contiguous_completed_offset(),
                live_length
            )));
        }
        if self.total_length != live_length {
            return Err(CheckpointError::Corrupted(format!(
                "recorded length {} differs from source length {}",
                self.total_length, live_length
            )));
        }
        Ok(())
    }

    /// Whether two checkpoints describe the same transfer
    pub fn same_identity(&self, other: &JobCheckpoint) -> bool {
        self.source_id == other.source_id
            && self.dest_id == other.dest_id
            && self.etag == other.etag
            && self.total_length == other.total_length
            && self.chunk_size == other.chunk_size
    }

    /// Fold another view of the same transfer into this one
    ///
    /// Returns false and leaves `self` untouched when identities differ.
    pub fn merge_from(&mut self, other: &JobCheckpoint) -> bool {
        if !self.same_identity(other) {
            return false;
        }
        self.contiguous_chunks = self.contiguous_chunks.max(other.contiguous_chunks);
        self.completed.extend(other.completed.iter().copied());
        self.compact();
        if !self.overwrite.is_decided() {
            self.overwrite = other.overwrite;
        }
        true
    }

    fn compact(&mut self) {
        let prefix = self.contiguous_chunks;
        self.completed.retain(|&i| i >= prefix);
        while self.completed.remove(&self.contiguous_chunks) {
            self.contiguous_chunks += 1;
        }
    }

    // ------------------------------------------------------------------------
    // Persisted form
    // ------------------------------------------------------------------------

    pub fn to_record(&self, job_id: JobId) -> JobCheckpointRecord {
        JobCheckpointRecord {
            job_id,
            source_id: self.source_id.clone(),
            dest_id: self.dest_id.clone(),
            etag: self.etag.as_ref().map(ToString::to_string),
            total_length: to_i64(self.total_length),
            chunk_size: to_i64(self.chunk_size),
            contiguous_completed_offset: to_i64(self.contiguous_completed_offset()),
            completed_chunks: self.completed.iter().map(|&i| to_i64(i)).collect(),
            overwrite: self.overwrite,
        }
    }

    /// Rebuild from a persisted record, refusing anything inconsistent
    pub fn from_record(record: &JobCheckpointRecord) -> Result<(JobId, Self), CheckpointError> {
        let job = record.job_id;
        let non_negative = |value: i64, what: &str| {
            u64::try_from(value).map_err(|_| {
                CheckpointError::Corrupted(format!("job {job}: negative {what} {value}"))
            })
        };

        let total_length = non_negative(record.total_length, "total length")?;
        let chunk_size = non_negative(record.chunk_size, "chunk size")?;
        let offset = non_negative(record.contiguous_completed_offset, "offset")?;

        if chunk_size == 0 {
            return Err(CheckpointError::Corrupted(format!(
                "job {job}: chunk size is 0"
            )));
        }
        if offset > total_length {
            return Err(CheckpointError::Corrupted(format!(
                "job {job}: offset {offset} exceeds total length {total_length}"
            )));
        }
        if offset % chunk_size != 0 && offset != total_length {
            return Err(CheckpointError::Corrupted(format!(
                "job {job}: offset {offset} is not on a {chunk_size}-byte chunk boundary"
            )));
        }

        let etag = record
            .etag
            .as_deref()
            .map(ETag::new)
            .transpose()
            .map_err(|e| CheckpointError::Corrupted(format!("job {job}: {e}")))?;

        let mut checkpoint = JobCheckpoint::new(
            record.source_id.clone(),
            record.dest_id.clone(),
            total_length,
            chunk_size,
        )?
        .with_etag(etag);
        checkpoint.overwrite = record.overwrite;
        checkpoint.contiguous_chunks = offset.div_ceil(chunk_size);

        let count = checkpoint.chunk_count();
        for &raw in &record.completed_chunks {
            let index = non_negative(raw, "chunk index")?;
            if index >= count {
                return Err(CheckpointError::ChunkOutOfRange { index, count });
            }
            checkpoint.completed.insert(index);
        }
        checkpoint.compact();

        Ok((job, checkpoint))
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

// ============================================================================
// Records
// ============================================================================

/// Persisted entry for one job
///
/// Offsets are signed so that a damaged record with a negative offset is
/// detected instead of wrapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCheckpointRecord {
    pub job_id: JobId,
    pub source_id: String,
    pub dest_id: String,
    pub etag: Option<String>,
    pub total_length: i64,
    pub chunk_size: i64,
    pub contiguous_completed_offset: i64,
    pub completed_chunks: Vec<i64>,
    pub overwrite: OverwriteDecision,
}

/// Versioned envelope around any number of job entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub version: u32,
    pub jobs: Vec<JobCheckpointRecord>,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

impl CheckpointRecord {
    pub fn new(jobs: Vec<JobCheckpointRecord>) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            jobs,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CheckpointError> {
        serde_json::to_vec(self).map_err(|e| CheckpointError::Decode(e.to_string()))
    }

    /// Decode bytes, checking the version before looking at anything else
    pub fn decode(bytes: &[u8]) -> Result<Self, CheckpointError> {
        let probe: VersionProbe =
            serde_json::from_slice(bytes).map_err(|e| CheckpointError::Decode(e.to_string()))?;
        if probe.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                found: probe.version,
                expected: CHECKPOINT_VERSION,
            });
        }
        serde_json::from_slice(bytes).map_err(|e| CheckpointError::Decode(e.to_string()))
    }
}
