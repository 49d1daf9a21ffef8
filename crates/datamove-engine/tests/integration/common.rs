//! Shared helpers for engine integration tests
//!
//! [`MockStorage`] keeps objects in memory, keyed by location id, and logs
//! every call so tests can assert exactly which byte ranges were touched.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use datamove_core::config::{Config, ConfigBuilder};
use datamove_core::domain::{AccessCondition, Attributes, ETag, JobId, TransferLocation};
use datamove_core::ports::{
    DataRange, IProgressSink, IStorageClient, JobOutcome, ListEntry, StorageError,
};
use datamove_engine::{TransferManager, TransferManagerBuilder};
use tokio_util::sync::CancellationToken;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;

/// One recorded storage call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Fetch { id: String },
    Read { id: String, offset: u64, len: u64 },
    Write { id: String, offset: u64, len: u64 },
    Create { id: String, len: u64 },
    SetMetadata { id: String },
    ListRanges { id: String },
    CopyRange { id: String, offset: u64, len: u64 },
    Permission { key: String },
}

#[derive(Debug, Clone)]
struct MockObject {
    data: Vec<u8>,
    attributes: Attributes,
}

#[derive(Default)]
pub struct MockStorage {
    objects: Mutex<HashMap<String, MockObject>>,
    ranges: Mutex<HashMap<String, Vec<DataRange>>>,
    listings: Mutex<HashMap<String, Vec<ListEntry>>>,
    calls: Mutex<Vec<Call>>,
    etag_counter: AtomicUsize,
    writes_in_flight: AtomicUsize,
    max_writes_in_flight: AtomicUsize,
    write_delay: Mutex<Option<Duration>>,
}

impl MockStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn next_etag(&self) -> ETag {
        let n = self.etag_counter.fetch_add(1, Ordering::SeqCst);
        ETag::new(format!("\"0x{n:04x}\"")).unwrap()
    }

    /// Store an object with deterministic content
    pub fn put(&self, location: &TransferLocation, length: u64) -> Vec<u8> {
        let data: Vec<u8> = (0..length).map(|i| (i % 251) as u8).collect();
        self.put_bytes(location, data.clone(), Attributes::default());
        data
    }

    pub fn put_bytes(&self, location: &TransferLocation, data: Vec<u8>, mut attributes: Attributes) {
        attributes.length = data.len() as u64;
        attributes.etag = Some(self.next_etag());
        self.objects
            .lock()
            .unwrap()
            .insert(location.id(), MockObject { data, attributes });
    }

    pub fn set_ranges(&self, location: &TransferLocation, ranges: Vec<DataRange>) {
        self.ranges.lock().unwrap().insert(location.id(), ranges);
    }

    pub fn set_listing(&self, location: &TransferLocation, entries: Vec<ListEntry>) {
        self.listings.lock().unwrap().insert(location.id(), entries);
    }

    /// Simulate another writer modifying the object
    pub fn touch(&self, location: &TransferLocation) {
        let etag = self.next_etag();
        if let Some(object) = self.objects.lock().unwrap().get_mut(&location.id()) {
            object.attributes.etag = Some(etag);
        }
    }

    pub fn data(&self, location: &TransferLocation) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&location.id())
            .map(|o| o.data.clone())
    }

    pub fn attributes(&self, location: &TransferLocation) -> Option<Attributes> {
        self.objects
            .lock()
            .unwrap()
            .get(&location.id())
            .map(|o| o.attributes.clone())
    }

    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock().unwrap() = Some(delay);
    }

    pub fn max_writes_in_flight(&self) -> usize {
        self.max_writes_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn reads(&self) -> Vec<(u64, u64)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Read { offset, len, .. } => Some((offset, len)),
                _ => None,
            })
            .collect()
    }

    pub fn writes(&self) -> Vec<(u64, u64)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Write { offset, len, .. } => Some((offset, len)),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn check(object: Option<&MockObject>, id: &str, condition: Option<&AccessCondition>) -> Result<(), StorageError> {
        let current = object.and_then(|o| o.attributes.etag.as_ref());
        let holds = match condition {
            None => true,
            Some(AccessCondition::IfMatch(expected)) => match current {
                Some(actual) => actual == expected,
                None => return Err(StorageError::NotFound(id.to_string())),
            },
            Some(AccessCondition::IfNoneMatch(unwanted)) => current != Some(unwanted),
            Some(AccessCondition::IfNotExists) => object.is_none(),
        };
        if holds {
            Ok(())
        } else {
            Err(StorageError::PreconditionFailed(id.to_string()))
        }
    }
}

#[async_trait]
impl IStorageClient for MockStorage {
    async fn fetch_attributes(
        &self,
        location: &TransferLocation,
        condition: Option<&AccessCondition>,
    ) -> Result<Attributes, StorageError> {
        let id = location.id();
        self.record(Call::Fetch { id: id.clone() });
        let objects = self.objects.lock().unwrap();
        let object = objects
            .get(&id)
            .ok_or_else(|| StorageError::NotFound(id.clone()))?;
        Self::check(Some(object), &id, condition)?;
        Ok(object.attributes.clone())
    }

    async fn read_range(
        &self,
        location: &TransferLocation,
        offset: u64,
        buf: &mut [u8],
        condition: Option<&AccessCondition>,
    ) -> Result<usize, StorageError> {
        let id = location.id();
        self.record(Call::Read {
            id: id.clone(),
            offset,
            len: buf.len() as u64,
        });
        let objects = self.objects.lock().unwrap();
        let object = objects
            .get(&id)
            .ok_or_else(|| StorageError::NotFound(id.clone()))?;
        Self::check(Some(object), &id, condition)?;

        let start = (offset as usize).min(object.data.len());
        let end = (start + buf.len()).min(object.data.len());
        buf[..end - start].copy_from_slice(&object.data[start..end]);
        Ok(end - start)
    }

    async fn write_range(
        &self,
        location: &TransferLocation,
        offset: u64,
        data: &[u8],
    ) -> Result<(), StorageError> {
        let id = location.id();
        self.record(Call::Write {
            id: id.clone(),
            offset,
            len: data.len() as u64,
        });

        let now = self.writes_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_writes_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = *self.write_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.writes_in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut objects = self.objects.lock().unwrap();
        let object = objects
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(id.clone()))?;
        let start = offset as usize;
        let end = start + data.len();
        if object.data.len() < end {
            object.data.resize(end, 0);
        }
        object.data[start..end].copy_from_slice(data);
        Ok(())
    }

    async fn create_destination(
        &self,
        location: &TransferLocation,
        length: u64,
        condition: Option<&AccessCondition>,
    ) -> Result<(), StorageError> {
        let id = location.id();
        self.record(Call::Create {
            id: id.clone(),
            len: length,
        });
        let etag = self.next_etag();
        let mut objects = self.objects.lock().unwrap();
        if condition == Some(&AccessCondition::IfNotExists) && objects.contains_key(&id) {
            return Err(StorageError::AlreadyExists(id));
        }
        Self::check(objects.get(&id), &id, condition.filter(|c| **c != AccessCondition::IfNotExists))?;
        objects.insert(
            id,
            MockObject {
                data: vec![0; length as usize],
                attributes: Attributes {
                    etag: Some(etag),
                    ..Attributes::with_length(length)
                },
            },
        );
        Ok(())
    }

    async fn set_metadata(
        &self,
        location: &TransferLocation,
        attributes: &Attributes,
    ) -> Result<(), StorageError> {
        let id = location.id();
        self.record(Call::SetMetadata { id: id.clone() });
        let mut objects = self.objects.lock().unwrap();
        let object = objects
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(id.clone()))?;
        object.attributes.apply_settable_from(attributes);
        Ok(())
    }

    async fn list_data_ranges(
        &self,
        location: &TransferLocation,
        _offset: u64,
        _length: u64,
    ) -> Result<Vec<DataRange>, StorageError> {
        let id = location.id();
        self.record(Call::ListRanges { id: id.clone() });
        Ok(self
            .ranges
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn copy_source_uri(&self, location: &TransferLocation) -> Result<String, StorageError> {
        Ok(format!("mock://{}", location.id()))
    }

    async fn copy_range_from_uri(
        &self,
        dest: &TransferLocation,
        offset: u64,
        length: u64,
        source_uri: &str,
        source_condition: Option<&AccessCondition>,
    ) -> Result<(), StorageError> {
        let id = dest.id();
        self.record(Call::CopyRange {
            id: id.clone(),
            offset,
            len: length,
        });
        let source_id = source_uri.trim_start_matches("mock://");
        let mut objects = self.objects.lock().unwrap();
        let source = objects
            .get(source_id)
            .ok_or_else(|| StorageError::NotFound(source_id.to_string()))?;
        Self::check(Some(source), source_id, source_condition)?;
        let start = offset as usize;
        let end = (start + length as usize).min(source.data.len());
        let chunk = source.data[start..end].to_vec();

        let target = objects
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(id.clone()))?;
        target.data[start..end].copy_from_slice(&chunk);
        Ok(())
    }

    async fn fetch_permission(
        &self,
        _location: &TransferLocation,
        permission_key: &str,
    ) -> Result<String, StorageError> {
        self.record(Call::Permission {
            key: permission_key.to_string(),
        });
        Ok(format!("O:BAG:BAD:(A;;FA;;;{permission_key})"))
    }

    async fn list_entries(&self, location: &TransferLocation) -> Result<Vec<ListEntry>, StorageError> {
        self.listings
            .lock()
            .unwrap()
            .get(&location.id())
            .cloned()
            .ok_or_else(|| StorageError::NotFound(location.id()))
    }
}

// ============================================================================
// Progress sinks
// ============================================================================

/// Records every delta and outcome
#[derive(Default)]
pub struct RecordingSink {
    pub deltas: Mutex<Vec<u64>>,
    pub outcomes: Mutex<Vec<JobOutcome>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn outcomes_for(&self, job_id: &JobId) -> usize {
        self.outcomes
            .lock()
            .unwrap()
            .iter()
            .filter(|o| o.job_id == *job_id)
            .count()
    }
}

impl IProgressSink for RecordingSink {
    fn on_bytes_transferred(&self, _job_id: &JobId, bytes: u64) {
        self.deltas.lock().unwrap().push(bytes);
    }

    fn on_job_finished(&self, outcome: &JobOutcome) {
        self.outcomes.lock().unwrap().push(outcome.clone());
    }
}

/// Cancels `token` once `after` chunks have been reported
pub struct CancelAfterSink {
    after: usize,
    seen: AtomicUsize,
    token: CancellationToken,
}

impl CancelAfterSink {
    pub fn new(after: usize, token: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            after,
            seen: AtomicUsize::new(0),
            token,
        })
    }
}

impl IProgressSink for CancelAfterSink {
    fn on_bytes_transferred(&self, _job_id: &JobId, _bytes: u64) {
        if self.seen.fetch_add(1, Ordering::SeqCst) + 1 == self.after {
            self.token.cancel();
        }
    }

    fn on_job_finished(&self, _outcome: &JobOutcome) {}
}

// ============================================================================
// Manager setup
// ============================================================================

/// Small pools so tests stay light; `parallelism` execution slots
pub fn test_config(parallelism: usize) -> Config {
    ConfigBuilder::new()
        .parallelism(parallelism)
        .max_concurrent_jobs(4)
        .block_size(MIB)
        .small_block_size(64 * KIB)
        .memory_budget(8 * MIB)
        .small_memory_budget(MIB)
        .min_chunk_size(4 * KIB)
        .target_chunk_count(8)
        .build()
}

pub fn builder(storage: &Arc<MockStorage>, parallelism: usize) -> TransferManagerBuilder {
    TransferManager::builder(storage.clone()).config(test_config(parallelism))
}

pub fn metadata(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
