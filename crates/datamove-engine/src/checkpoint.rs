//! Shared multi-job checkpoint.
//!
//! Each job's [`JobCheckpoint`] sits behind its own mutex inside a
//! `DashMap`, so the owning controller mutates it without contending with
//! other jobs, and progress readers take consistent snapshots at any time.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use datamove_core::domain::{CheckpointRecord, JobCheckpoint, JobId, OverwriteDecision};

use crate::{Result, TransferError};

type Entry = Arc<Mutex<JobCheckpoint>>;

fn lock(entry: &Entry) -> MutexGuard<'_, JobCheckpoint> {
    entry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Progress of every job known to this process
#[derive(Clone, Default)]
pub struct Checkpoint {
    entries: Arc<DashMap<JobId, Entry>>,
}

impl Checkpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `job_id`, replacing any previous entry
    pub fn insert(&self, job_id: JobId, checkpoint: JobCheckpoint) {
        self.entries.insert(job_id, Arc::new(Mutex::new(checkpoint)));
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.entries.contains_key(job_id)
    }

    pub fn remove(&self, job_id: &JobId) -> Option<JobCheckpoint> {
        self.entries
            .remove(job_id)
            .map(|(_, entry)| lock(&entry).clone())
    }

    pub fn job_ids(&self) -> Vec<JobId> {
        self.entries.iter().map(|e| *e.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, job_id: &JobId) -> Result<Entry> {
        self.entries
            .get(job_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| TransferError::CheckpointCorrupted(format!("no checkpoint for job {job_id}")))
    }

    /// Run `f` against the job's entry under its lock
    pub fn with_job<T>(&self, job_id: &JobId, f: impl FnOnce(&mut JobCheckpoint) -> T) -> Result<T> {
        let entry = self.entry(job_id)?;
        let mut guard = lock(&entry);
        Ok(f(&mut guard))
    }

    /// Mark a chunk durable; true if the contiguous offset advanced
    pub fn record_chunk_complete(&self, job_id: &JobId, chunk_index: u64) -> Result<bool> {
        self.with_job(job_id, |cp| cp.record_chunk_complete(chunk_index))?
            .map_err(TransferError::from)
    }

    pub fn is_chunk_complete(&self, job_id: &JobId, chunk_index: u64) -> bool {
        self.with_job(job_id, |cp| cp.is_chunk_complete(chunk_index))
            .unwrap_or(false)
    }

    /// Safe resume point for `job_id`, or `None` if the job is unknown
    pub fn contiguous_completed_offset(&self, job_id: &JobId) -> Option<u64> {
        self.with_job(job_id, |cp| cp.contiguous_completed_offset()).ok()
    }

    pub fn set_overwrite(&self, job_id: &JobId, decision: OverwriteDecision) -> Result<()> {
        self.with_job(job_id, |cp| cp.set_overwrite(decision))
    }

    /// Consistent copy of one job's entry
    pub fn snapshot(&self, job_id: &JobId) -> Option<JobCheckpoint> {
        self.with_job(job_id, |cp| cp.clone()).ok()
    }

    /// Encode every entry
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut jobs: Vec<_> = self
            .entries
            .iter()
            .map(|e| lock(e.value()).to_record(*e.key()))
            .collect();
        jobs.sort_by_key(|r| r.job_id);
        Ok(CheckpointRecord::new(jobs).encode()?)
    }

    /// Encode a single job's entry, as written to the journal
    pub fn serialize_job(&self, job_id: &JobId) -> Result<Vec<u8>> {
        let record = self.with_job(job_id, |cp| cp.to_record(*job_id))?;
        Ok(CheckpointRecord::new(vec![record]).encode()?)
    }

    /// Decode a checkpoint, failing on unknown versions or corrupt entries
    pub fn restore(bytes: &[u8]) -> Result<Self> {
        let record = CheckpointRecord::decode(bytes)?;
        let checkpoint = Self::new();
        for job in &record.jobs {
            let (job_id, entry) = JobCheckpoint::from_record(job)?;
            checkpoint.insert(job_id, entry);
        }
        Ok(checkpoint)
    }

    /// Fold `other` into this checkpoint
    ///
    /// Unknown jobs are adopted. For known jobs describing the same transfer
    /// the progress is unioned; if the identities differ the live entry is
    /// kept. Returns the number of jobs adopted or merged.
    pub fn merge(&self, other: &Checkpoint) -> usize {
        let mut merged = 0;
        for item in other.entries.iter() {
            let incoming = lock(item.value()).clone();
            match self.entries.get(item.key()).map(|e| Arc::clone(e.value())) {
                Some(live) => {
                    if lock(&live).merge_from(&incoming) {
                        merged += 1;
                    } else {
                        tracing::warn!(
                            job_id = %item.key(),
                            "Ignoring restored checkpoint for a different transfer"
                        );
                    }
                }
                None => {
                    self.insert(*item.key(), incoming);
                    merged += 1;
                }
            }
        }
        merged
    }
}

impl std::fmt::Debug for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checkpoint")
            .field("jobs", &self.entries.len())
            .finish()
    }
}
