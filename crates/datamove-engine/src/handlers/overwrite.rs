//! Overwrite negotiation
//!
//! Decides whether a job may write its destination, creating it on the way.
//!
//! ```text
//!   force ───────────────────────────────────────► create ─► Overwrite
//!   cached Overwrite ─────────────────────────────► create ─► Overwrite
//!   cached Keep ──────────────────────────────────────────► Keep
//!   condition, unchecked ─► fetch(cond) ─┬─ found ─► prompt ─┬─ yes ─► Overwrite
//!                                        │                   └─ no ──► Keep
//!                                        ├─ not found ─► prompt ─┬─ yes ─► create(IfNotExists) ─► Overwrite
//!                                        │                       └─ no ──► Keep
//!                                        └─ precondition failed ─► prompt ─┬─ yes ─► create ─► Overwrite
//!                                                                          └─ no ──► Keep
//!   no condition ─► create(IfNotExists) ─┬─ ok ─► Overwrite
//!                                        └─ exists ─► prompt ─┬─ yes ─► create ─► Overwrite
//!                                                             └─ no ──► Keep
//! ```
//!
//! Errors other than not-found, precondition-failed and already-exists
//! propagate unmodified. A destination that appears between a not-found
//! fetch and the create is a [`TransferError::DestinationConflict`].
//! [`OverwriteGate`] makes sure only the first caller per job negotiates.

use std::future::Future;

use datamove_core::domain::{AccessCondition, Attributes, OverwriteDecision, TransferLocation};
use datamove_core::ports::{IOverwritePrompt, OverwriteQuery, StorageError};
use tokio::sync::OnceCell;

use super::dest::DestHandler;
use crate::{Result, TransferError};

/// Inputs to one negotiation
#[derive(Clone, Copy)]
pub struct NegotiationContext<'a> {
    pub source: &'a TransferLocation,
    pub source_attributes: &'a Attributes,
    pub total_length: u64,
    pub force_overwrite: bool,
    /// Decision carried by the job from an earlier run
    pub cached: OverwriteDecision,
    pub prompt: &'a dyn IOverwritePrompt,
}

/// Result of a negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiationOutcome {
    pub decision: OverwriteDecision,
    /// Whether the destination was (re)created
    pub created: bool,
    /// Whether the prompt was asked
    pub prompted: bool,
}

impl NegotiationOutcome {
    fn overwrite(created: bool, prompted: bool) -> Self {
        Self {
            decision: OverwriteDecision::Overwrite,
            created,
            prompted,
        }
    }

    fn keep() -> Self {
        Self {
            decision: OverwriteDecision::Keep,
            created: false,
            prompted: true,
        }
    }
}

/// Run the negotiation against `dest`
pub async fn negotiate(dest: &mut DestHandler, ctx: NegotiationContext<'_>) -> Result<NegotiationOutcome> {
    if ctx.force_overwrite {
        dest.create(ctx.total_length, None).await?;
        return Ok(NegotiationOutcome::overwrite(true, false));
    }

    match ctx.cached {
        OverwriteDecision::Overwrite => {
            dest.create(ctx.total_length, None).await?;
            return Ok(NegotiationOutcome::overwrite(true, false));
        }
        OverwriteDecision::Keep => return Ok(NegotiationOutcome::keep()),
        OverwriteDecision::Undecided => {}
    }

    let condition = dest.location().access_condition().cloned();
    match condition {
        Some(condition) if !dest.location().is_condition_checked() => {
            negotiate_conditional(dest, ctx, &condition).await
        }
        _ => negotiate_optimistic(dest, ctx).await,
    }
}

async fn negotiate_conditional(
    dest: &mut DestHandler,
    ctx: NegotiationContext<'_>,
    condition: &AccessCondition,
) -> Result<NegotiationOutcome> {
    match dest.fetch_attributes(Some(condition)).await {
        Ok(existing) => {
            dest.mark_condition_checked();
            if !ask(ctx, dest.location(), Some(&existing)).await? {
                return Ok(NegotiationOutcome::keep());
            }
            // Sparse and append destinations would keep stale bytes
            let reusable = existing.length == ctx.total_length
                && !dest.supports_sparse()
                && !dest.sequential_writes();
            if reusable {
                tracing::debug!(dest = %dest.location(), "Existing destination reused");
                return Ok(NegotiationOutcome::overwrite(false, true));
            }
            dest.create(ctx.total_length, Some(condition)).await?;
            Ok(NegotiationOutcome::overwrite(true, true))
        }
        Err(StorageError::NotFound(_)) => {
            dest.mark_condition_checked();
            if !ask(ctx, dest.location(), None).await? {
                return Ok(NegotiationOutcome::keep());
            }
            match dest
                .create(ctx.total_length, Some(&AccessCondition::IfNotExists))
                .await
            {
                Ok(()) => Ok(NegotiationOutcome::overwrite(true, true)),
                Err(StorageError::AlreadyExists(id)) => Err(TransferError::DestinationConflict(id)),
                Err(other) => Err(TransferError::Storage(other)),
            }
        }
        Err(StorageError::PreconditionFailed(msg)) => {
            tracing::debug!(dest = %dest.location(), reason = %msg, "Destination condition did not hold");
            dest.mark_condition_checked();
            if !ask(ctx, dest.location(), None).await? {
                return Ok(NegotiationOutcome::keep());
            }
            dest.create(ctx.total_length, None).await?;
            Ok(NegotiationOutcome::overwrite(true, true))
        }
        Err(other) => Err(TransferError::Storage(other)),
    }
}

async fn negotiate_optimistic(dest: &mut DestHandler, ctx: NegotiationContext<'_>) -> Result<NegotiationOutcome> {
    match dest
        .create(ctx.total_length, Some(&AccessCondition::IfNotExists))
        .await
    {
        Ok(()) => Ok(NegotiationOutcome::overwrite(true, false)),
        Err(StorageError::AlreadyExists(_)) => {
            let existing = match dest.fetch_attributes(None).await {
                Ok(attributes) => Some(attributes),
                // Deleted since the conflict; the prompt still decides
                Err(StorageError::NotFound(_)) => None,
                Err(other) => return Err(TransferError::Storage(other)),
            };
            if !ask(ctx, dest.location(), existing.as_ref()).await? {
                return Ok(NegotiationOutcome::keep());
            }
            // Unconditional: a writer racing in after the prompt is overwritten
            dest.create(ctx.total_length, None).await?;
            Ok(NegotiationOutcome::overwrite(true, true))
        }
        Err(other) => Err(TransferError::Storage(other)),
    }
}

async fn ask(
    ctx: NegotiationContext<'_>,
    dest: &TransferLocation,
    existing: Option<&Attributes>,
) -> Result<bool> {
    let accept = ctx
        .prompt
        .should_overwrite(OverwriteQuery {
            source: ctx.source,
            dest,
            source_attributes: ctx.source_attributes,
            dest_attributes: existing,
        })
        .await
        .map_err(TransferError::Prompt)?;
    tracing::info!(%dest, accept, "Overwrite decision");
    Ok(accept)
}

// ============================================================================
// OverwriteGate
// ============================================================================

/// Once-per-job decision slot
///
/// The first caller of [`OverwriteGate::resolve`] runs the negotiation;
/// concurrent callers wait for its result. A failed negotiation leaves the
/// gate empty so the next caller retries.
#[derive(Debug, Default)]
pub struct OverwriteGate {
    decision: OnceCell<OverwriteDecision>,
}

impl OverwriteGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate already holding a decision restored from a checkpoint
    pub fn with_decision(decision: OverwriteDecision) -> Self {
        if decision.is_decided() {
            Self {
                decision: OnceCell::new_with(Some(decision)),
            }
        } else {
            Self::new()
        }
    }

    pub fn decision(&self) -> Option<OverwriteDecision> {
        self.decision.get().copied()
    }

    pub async fn resolve<F, Fut>(&self, negotiate: F) -> Result<OverwriteDecision>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<OverwriteDecision>>,
    {
        self.decision.get_or_try_init(negotiate).await.copied()
    }
}
