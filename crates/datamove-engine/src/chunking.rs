//! Chunk sizing and per-chunk work planning.

use datamove_core::config::TransferConfig;
use datamove_core::domain::JobCheckpoint;
use datamove_core::ports::DataRange;

use crate::{Result, TransferError};

/// Bounds the adaptive planner works within
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSettings {
    pub min_chunk_size: u64,
    pub max_chunk_size: u64,
    pub target_chunk_count: u64,
}

impl ChunkSettings {
    pub fn from_config(config: &TransferConfig) -> Self {
        Self {
            min_chunk_size: config.min_chunk_size.min(config.block_size),
            max_chunk_size: config.block_size,
            target_chunk_count: config.target_chunk_count.max(1),
        }
    }
}

/// Pick the chunk size for a new job
///
/// Power of two near `total_length / target_chunk_count`, clamped to
/// `[min_chunk_size, max_chunk_size]`, then rounded up to `alignment`.
/// Large objects get large chunks to bound chunk count; small objects get
/// small chunks so progress shows up early. An explicit `requested` size
/// wins when it fits a buffer and honors the alignment.
pub fn plan_chunk_size(
    total_length: u64,
    settings: &ChunkSettings,
    alignment: u64,
    requested: Option<u64>,
) -> Result<u64> {
    let alignment = alignment.max(1);

    if let Some(size) = requested {
        if size == 0 || size > settings.max_chunk_size {
            return Err(TransferError::InvalidOptions(format!(
                "chunk size {size} must be in 1..={}",
                settings.max_chunk_size
            )));
        }
        if size % alignment != 0 {
            return Err(TransferError::InvalidOptions(format!(
                "chunk size {size} must be a multiple of {alignment}"
            )));
        }
        return Ok(size);
    }

    let ideal = total_length
        .div_ceil(settings.target_chunk_count)
        .max(1)
        .checked_next_power_of_two()
        .unwrap_or(settings.max_chunk_size);
    let clamped = ideal.clamp(settings.min_chunk_size.max(1), settings.max_chunk_size);
    let aligned = clamped.div_ceil(alignment) * alignment;

    Ok(if aligned > settings.max_chunk_size {
        (settings.max_chunk_size / alignment).max(1) * alignment
    } else {
        aligned
    })
}

/// What one chunk of a job needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkWork {
    /// Read from the source, write to the destination
    Copy,
    /// No data at the source; the destination needs explicit zeros
    ZeroFill,
    /// No data at the source and the destination is sparse; nothing to do
    Skip,
}

/// A chunk scheduled for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub index: u64,
    pub offset: u64,
    pub len: u64,
    pub work: ChunkWork,
}

/// Plan every pending chunk of `checkpoint`
///
/// A chunk counts as no-data only when it lies entirely inside a range the
/// source reported without data. Gaps in the reported ranges are treated
/// as data.
pub fn plan_chunks(
    checkpoint: &JobCheckpoint,
    ranges: Option<&[DataRange]>,
    dest_is_sparse: bool,
) -> Vec<ChunkPlan> {
    checkpoint
        .pending_chunks()
        .filter_map(|index| {
            let (offset, len) = checkpoint.chunk_span(index)?;
            let no_data = ranges.is_some_and(|ranges| within_empty_range(ranges, offset, len));
            let work = match (no_data, dest_is_sparse) {
                (false, _) => ChunkWork::Copy,
                (true, true) => ChunkWork::Skip,
                (true, false) => ChunkWork::ZeroFill,
            };
            Some(ChunkPlan {
                index,
                offset,
                len,
                work,
            })
        })
        .collect()
}

fn within_empty_range(ranges: &[DataRange], offset: u64, len: u64) -> bool {
    let last = offset + len - 1;
    ranges
        .iter()
        .any(|r| !r.has_data && r.start <= offset && last <= r.end)
}
