//! Ready-made overwrite decision policies.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use datamove_core::ports::{IOverwritePrompt, OverwriteQuery};

/// Fixed answer to every overwrite question
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwritePolicy {
    /// Always replace the destination
    Always,
    /// Never replace; every existing destination is skipped
    Never,
    /// Replace only when the source was modified after the destination
    IfSourceNewer,
}

#[async_trait]
impl IOverwritePrompt for OverwritePolicy {
    async fn should_overwrite(&self, query: OverwriteQuery<'_>) -> anyhow::Result<bool> {
        let decision = match self {
            OverwritePolicy::Always => true,
            OverwritePolicy::Never => false,
            OverwritePolicy::IfSourceNewer => {
                let source = query.source_attributes.last_modified;
                let dest = query.dest_attributes.and_then(|a| a.last_modified);
                match (source, dest) {
                    (Some(s), Some(d)) => s > d,
                    // unknown destination age: nothing to protect
                    (_, None) => true,
                    (None, Some(_)) => false,
                }
            }
        };
        tracing::debug!(dest = %query.dest, policy = ?self, decision, "Overwrite policy applied");
        Ok(decision)
    }
}

pub type PromptFuture = Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send>>;

/// Adapts an async closure into an overwrite prompt
///
/// The closure receives owned copies of the query so it can be moved into
/// a UI task.
pub struct FnPrompt<F> {
    f: F,
}

/// Owned form of [`OverwriteQuery`] handed to [`FnPrompt`] closures
#[derive(Debug, Clone)]
pub struct OwnedOverwriteQuery {
    pub source: datamove_core::domain::TransferLocation,
    pub dest: datamove_core::domain::TransferLocation,
    pub source_attributes: datamove_core::domain::Attributes,
    pub dest_attributes: Option<datamove_core::domain::Attributes>,
}

impl<F> FnPrompt<F>
where
    F: Fn(OwnedOverwriteQuery) -> PromptFuture + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> fmt::Debug for FnPrompt<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnPrompt")
    }
}

#[async_trait]
impl<F> IOverwritePrompt for FnPrompt<F>
where
    F: Fn(OwnedOverwriteQuery) -> PromptFuture + Send + Sync,
{
    async fn should_overwrite(&self, query: OverwriteQuery<'_>) -> anyhow::Result<bool> {
        let owned = OwnedOverwriteQuery {
            source: query.source.clone(),
            dest: query.dest.clone(),
            source_attributes: query.source_attributes.clone(),
            dest_attributes: query.dest_attributes.cloned(),
        };
        (self.f)(owned).await
    }
}
