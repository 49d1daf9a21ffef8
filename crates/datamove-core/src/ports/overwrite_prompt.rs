//! Overwrite decision port (driven/secondary port)
//!
//! Asked when a destination already exists and the job was not forced.
//! Implementations may prompt a user or apply a policy.

use async_trait::async_trait;

use crate::domain::{Attributes, TransferLocation};

/// What the prompt gets to look at
#[derive(Debug, Clone, Copy)]
pub struct OverwriteQuery<'a> {
    pub source: &'a TransferLocation,
    pub dest: &'a TransferLocation,
    pub source_attributes: &'a Attributes,
    /// Attributes of the existing destination, when they could be fetched
    pub dest_attributes: Option<&'a Attributes>,
}

#[async_trait]
pub trait IOverwritePrompt: Send + Sync {
    /// Return true to overwrite the destination
    async fn should_overwrite(&self, query: OverwriteQuery<'_>) -> anyhow::Result<bool>;
}
