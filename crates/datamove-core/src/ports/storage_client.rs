//! Storage client port (driven/secondary port)
//!
//! The concrete storage operations (blob, file share, local disk, streams)
//! live behind this trait. The engine calls it and trusts it to classify
//! failures into the typed [`StorageError`] variants.
//!
//! ## Design Notes
//!
//! - Unlike the other ports this one returns a typed error: the engine must
//!   tell not-found, precondition and conflict failures apart to drive the
//!   overwrite negotiation and the ETag consistency checks.
//! - Retry of transient failures and request timeouts belong to the
//!   implementation, never to the engine.
//! - Capabilities only some kinds have (range listing, service-side copy,
//!   permission lookup, enumeration) have default bodies returning
//!   [`StorageError::Unsupported`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{AccessCondition, Attributes, TransferLocation};

/// Typed failures raised by a storage client
#[derive(Debug, Error)]
pub enum StorageError {
    /// The addressed object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The supplied access condition did not hold
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// A create-if-not-exists found an existing object
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The endpoint kind does not offer this capability
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Anything else, passed through unmodified
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

/// One allocation segment of a range-addressable object
///
/// `end` is inclusive, matching how page and file ranges are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRange {
    pub start: u64,
    pub end: u64,
    pub has_data: bool,
}

impl DataRange {
    pub fn new(start: u64, end: u64, has_data: bool) -> Self {
        Self {
            start,
            end,
            has_data,
        }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start) + 1
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

/// An object found while enumerating a directory-like location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntry {
    /// Name relative to the enumerated location, `/`-separated
    pub relative_name: String,
    pub length: u64,
}

/// Capability interface over every storage kind
#[async_trait]
pub trait IStorageClient: Send + Sync {
    /// Fetch attributes, failing with `NotFound` or `PreconditionFailed`
    async fn fetch_attributes(
        &self,
        location: &TransferLocation,
        condition: Option<&AccessCondition>,
    ) -> Result<Attributes, StorageError>;

    /// Read up to `buf.len()` bytes at `offset`, returning the count read
    async fn read_range(
        &self,
        location: &TransferLocation,
        offset: u64,
        buf: &mut [u8],
        condition: Option<&AccessCondition>,
    ) -> Result<usize, StorageError>;

    /// Write `data` at `offset` of an existing destination
    async fn write_range(
        &self,
        location: &TransferLocation,
        offset: u64,
        data: &[u8],
    ) -> Result<(), StorageError>;

    /// Create (or truncate) a destination of `length` bytes
    ///
    /// With `Some(AccessCondition::IfNotExists)` an existing object must
    /// yield `AlreadyExists`.
    async fn create_destination(
        &self,
        location: &TransferLocation,
        length: u64,
        condition: Option<&AccessCondition>,
    ) -> Result<(), StorageError>;

    /// Replace the settable properties of a destination
    async fn set_metadata(
        &self,
        location: &TransferLocation,
        attributes: &Attributes,
    ) -> Result<(), StorageError>;

    /// Make written data visible, e.g. commit a staged block list
    async fn finalize(&self, _location: &TransferLocation, _length: u64) -> Result<(), StorageError> {
        Ok(())
    }

    /// Allocation map of `[offset, offset + length)` on a range-addressable object
    async fn list_data_ranges(
        &self,
        location: &TransferLocation,
        _offset: u64,
        _length: u64,
    ) -> Result<Vec<DataRange>, StorageError> {
        Err(StorageError::Unsupported(format!(
            "range listing on {}",
            location.endpoint_kind()
        )))
    }

    /// URI the destination service can read the source from
    async fn copy_source_uri(&self, location: &TransferLocation) -> Result<String, StorageError> {
        Err(StorageError::Unsupported(format!(
            "copy source uri for {}",
            location.endpoint_kind()
        )))
    }

    /// Have the destination service pull `[offset, offset + length)` from `source_uri`
    ///
    /// `source_condition` is the pinned If-Match of the source; a changed
    /// source must fail with `PreconditionFailed`.
    async fn copy_range_from_uri(
        &self,
        dest: &TransferLocation,
        _offset: u64,
        _length: u64,
        _source_uri: &str,
        _source_condition: Option<&AccessCondition>,
    ) -> Result<(), StorageError> {
        Err(StorageError::Unsupported(format!(
            "service-side copy into {}",
            dest.endpoint_kind()
        )))
    }

    /// Resolve a permission key to its SDDL descriptor
    async fn fetch_permission(
        &self,
        location: &TransferLocation,
        _permission_key: &str,
    ) -> Result<String, StorageError> {
        Err(StorageError::Unsupported(format!(
            "permission lookup on {}",
            location.endpoint_kind()
        )))
    }

    /// Enumerate objects underneath a directory-like location
    async fn list_entries(&self, location: &TransferLocation) -> Result<Vec<ListEntry>, StorageError> {
        Err(StorageError::Unsupported(format!(
            "enumeration of {}",
            location.endpoint_kind()
        )))
    }
}
