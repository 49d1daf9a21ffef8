//! Destination handler variants

use std::sync::Arc;

use datamove_core::config::BLOCK_ALIGNMENT;
use datamove_core::domain::{AccessCondition, Attributes, TransferLocation};
use datamove_core::ports::{IStorageClient, StorageError};

use crate::Result;

/// Closed set of destination behaviors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestVariant {
    Local,
    BlockBlob,
    AppendBlob,
    PageBlob,
    File,
}

impl DestVariant {
    /// Unwritten ranges already read as zeros, so no-data chunks need no I/O
    pub fn supports_sparse(&self) -> bool {
        matches!(
            self,
            DestVariant::Local | DestVariant::PageBlob | DestVariant::File
        )
    }

    /// Writes must land in offset order, one at a time
    pub fn sequential_writes(&self) -> bool {
        matches!(self, DestVariant::AppendBlob)
    }

    /// Chunk boundaries must be multiples of this
    pub fn chunk_alignment(&self) -> u64 {
        match self {
            DestVariant::PageBlob => BLOCK_ALIGNMENT,
            _ => 1,
        }
    }
}

/// Writes one job's destination and tracks what it last saw there
#[derive(Clone)]
pub struct DestHandler {
    variant: DestVariant,
    location: TransferLocation,
    client: Arc<dyn IStorageClient>,
    /// Last known destination attributes, compared at commit
    known: Option<Attributes>,
}

impl DestHandler {
    pub fn new(variant: DestVariant, location: TransferLocation, client: Arc<dyn IStorageClient>) -> Self {
        Self {
            variant,
            location,
            client,
            known: None,
        }
    }

    pub fn variant(&self) -> DestVariant {
        self.variant
    }

    pub fn location(&self) -> &TransferLocation {
        &self.location
    }

    pub fn supports_sparse(&self) -> bool {
        self.variant.supports_sparse()
    }

    pub fn sequential_writes(&self) -> bool {
        self.variant.sequential_writes()
    }

    pub fn chunk_alignment(&self) -> u64 {
        self.variant.chunk_alignment()
    }

    pub fn known_attributes(&self) -> Option<&Attributes> {
        self.known.as_ref()
    }

    pub(crate) fn mark_condition_checked(&mut self) {
        self.location.mark_condition_checked();
    }

    /// Fetch attributes of an existing destination
    ///
    /// Raw storage errors are returned so negotiation can classify them.
    pub async fn fetch_attributes(
        &mut self,
        condition: Option<&AccessCondition>,
    ) -> std::result::Result<Attributes, StorageError> {
        let attributes = self.client.fetch_attributes(&self.location, condition).await?;
        self.known = Some(attributes.clone());
        Ok(attributes)
    }

    /// Create or truncate the destination
    pub async fn create(
        &mut self,
        length: u64,
        condition: Option<&AccessCondition>,
    ) -> std::result::Result<(), StorageError> {
        self.client
            .create_destination(&self.location, length, condition)
            .await?;
        tracing::debug!(dest = %self.location, length, ?condition, "Destination created");
        self.known = Some(Attributes::with_length(length));
        Ok(())
    }

    pub async fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.client.write_range(&self.location, offset, data).await?;
        Ok(())
    }

    /// Service-side copy of one range
    pub async fn copy_from_uri(
        &self,
        offset: u64,
        length: u64,
        source_uri: &str,
        source_condition: Option<&AccessCondition>,
    ) -> Result<()> {
        self.client
            .copy_range_from_uri(&self.location, offset, length, source_uri, source_condition)
            .await
            .map_err(|e| match e {
                StorageError::PreconditionFailed(msg) => crate::TransferError::ETagChanged(msg),
                other => crate::TransferError::Storage(other),
            })
    }

    /// Finalize the destination and push settable properties
    ///
    /// Metadata is only sent when it differs from what is known to be on
    /// the destination, so a retried commit makes no metadata call.
    pub async fn commit(&mut self, length: u64, desired: &Attributes) -> Result<()> {
        self.client.finalize(&self.location, length).await?;

        let unchanged = self
            .known
            .as_ref()
            .is_some_and(|known| known.settable_eq(desired));
        if unchanged {
            tracing::debug!(dest = %self.location, "Destination metadata unchanged");
        } else {
            self.client.set_metadata(&self.location, desired).await?;
        }

        let mut known = self.known.take().unwrap_or_default();
        known.apply_settable_from(desired);
        known.length = length;
        self.known = Some(known);
        Ok(())
    }
}

impl std::fmt::Debug for DestHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestHandler")
            .field("variant", &self.variant)
            .field("location", &self.location)
            .finish()
    }
}
