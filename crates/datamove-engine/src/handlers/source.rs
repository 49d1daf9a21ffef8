//! Source handler variants

use std::sync::Arc;

use datamove_core::domain::{Attributes, JobCheckpoint, LocationKind, TransferLocation};
use datamove_core::ports::{DataRange, IStorageClient, StorageError};

use crate::{Result, TransferError};

/// Closed set of source behaviors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceVariant {
    /// Local file, caller stream or bare URI
    Plain,
    /// Block or append blob
    Blob,
    /// Page blob; lists allocated ranges
    PageBlob,
    /// File share entry; lists allocated ranges
    File,
}

impl SourceVariant {
    pub fn lists_ranges(&self) -> bool {
        matches!(self, SourceVariant::PageBlob | SourceVariant::File)
    }
}

/// Reads one job's source, pinning its ETag on first contact
#[derive(Clone)]
pub struct SourceHandler {
    variant: SourceVariant,
    location: TransferLocation,
    client: Arc<dyn IStorageClient>,
    attributes: Option<Attributes>,
}

impl SourceHandler {
    pub fn new(
        variant: SourceVariant,
        location: TransferLocation,
        client: Arc<dyn IStorageClient>,
    ) -> Self {
        Self {
            variant,
            location,
            client,
            attributes: None,
        }
    }

    pub fn variant(&self) -> SourceVariant {
        self.variant
    }

    pub fn location(&self) -> &TransferLocation {
        &self.location
    }

    /// Attributes from the first fetch, if it happened
    pub fn attributes(&self) -> Option<&Attributes> {
        self.attributes.as_ref()
    }

    /// Fetch and pin source attributes; later calls are no-ops
    ///
    /// A restored `checkpoint` is validated against the live length and
    /// ETag. Any disagreement is fatal.
    pub async fn fetch_attributes(&mut self, checkpoint: Option<&JobCheckpoint>) -> Result<&Attributes> {
        if self.attributes.is_none() {
            let condition = self.location.access_condition().cloned();
            let attributes = self
                .client
                .fetch_attributes(&self.location, condition.as_ref())
                .await
                .map_err(|e| match e {
                    StorageError::NotFound(_) => TransferError::SourceNotFound(self.location.id()),
                    StorageError::PreconditionFailed(msg) => TransferError::PreconditionMismatch(msg),
                    other => TransferError::Storage(other),
                })?;

            self.location.pin_etag(attributes.etag.clone());
            if condition.is_some() {
                self.location.mark_condition_checked();
            }
            tracing::debug!(
                source = %self.location,
                length = attributes.length,
                etag = ?attributes.etag,
                "Source attributes pinned"
            );

            if let Some(checkpoint) = checkpoint {
                checkpoint.validate_against_source(attributes.length, attributes.etag.as_ref())?;
            }
            self.attributes = Some(attributes);
        }

        self.attributes
            .as_ref()
            .ok_or_else(|| TransferError::SourceNotFound(self.location.id()))
    }

    /// Fill `buf` from `offset`, reading under the pinned ETag
    pub async fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let condition = self.location.read_condition();
        let mut filled = 0;
        while filled < buf.len() {
            let n = self
                .client
                .read_range(
                    &self.location,
                    offset + filled as u64,
                    &mut buf[filled..],
                    condition.as_ref(),
                )
                .await
                .map_err(|e| self.map_read_error(e))?;
            if n == 0 {
                return Err(TransferError::ETagChanged(format!(
                    "{} ended at {} while reading {} bytes at {}",
                    self.location.id(),
                    offset + filled as u64,
                    buf.len(),
                    offset
                )));
            }
            filled += n;
        }
        Ok(())
    }

    /// Allocation map of `[offset, offset + length)`
    ///
    /// `None` for variants that cannot list ranges; every chunk is then data.
    pub async fn get_copy_ranges(&self, offset: u64, length: u64) -> Result<Option<Vec<DataRange>>> {
        if !self.variant.lists_ranges() || length == 0 {
            return Ok(None);
        }
        let mut ranges = self
            .client
            .list_data_ranges(&self.location, offset, length)
            .await
            .map_err(|e| self.map_read_error(e))?;
        ranges.sort_by_key(|r| r.start);
        tracing::trace!(source = %self.location, ranges = ranges.len(), "Copy ranges listed");
        Ok(Some(ranges))
    }

    /// URI a destination service can pull this source from
    pub async fn copy_source_uri(&self) -> Result<String> {
        if let LocationKind::Uri { uri } = self.location.kind() {
            return Ok(uri.clone());
        }
        self.client
            .copy_source_uri(&self.location)
            .await
            .map_err(TransferError::Storage)
    }

    fn map_read_error(&self, e: StorageError) -> TransferError {
        match e {
            StorageError::PreconditionFailed(msg) => TransferError::ETagChanged(msg),
            StorageError::NotFound(_) => TransferError::SourceNotFound(self.location.id()),
            other => TransferError::Storage(other),
        }
    }
}

impl std::fmt::Debug for SourceHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceHandler")
            .field("variant", &self.variant)
            .field("location", &self.location)
            .field("fetched", &self.attributes.is_some())
            .finish()
    }
}
