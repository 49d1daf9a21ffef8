//! Source and destination handlers
//!
//! Every endpoint kind is normalized into one of a small closed set of
//! tagged variants, selected once per job by [`select_handlers`]. Shared
//! logic lives outside the variants: overwrite negotiation is a single
//! function in [`overwrite`] parameterized over the destination handler.
//!
//! ```text
//!                 (source kind, dest kind, method)
//!                               │
//!                               ▼
//!                      ┌─────────────────┐
//!                      │ select_handlers │
//!                      └─────────────────┘
//!                 ┌─────────────┴─────────────┐
//!                 ▼                           ▼
//!   SourceHandler {Plain, Blob,      DestHandler {Local, BlockBlob,
//!                  PageBlob, File}                AppendBlob, PageBlob, File}
//! ```

pub mod dest;
pub mod overwrite;
pub mod source;

use std::sync::Arc;

use datamove_core::domain::{EndpointKind, TransferJob, TransferMethod};
use datamove_core::ports::IStorageClient;

pub use dest::{DestHandler, DestVariant};
pub use overwrite::{negotiate, NegotiationContext, NegotiationOutcome, OverwriteGate};
pub use source::{SourceHandler, SourceVariant};

use crate::{Result, TransferError};

/// Pick the handler pair for `job`, rejecting unsupported combinations
pub fn select_handlers(
    job: &TransferJob,
    client: Arc<dyn IStorageClient>,
) -> Result<(SourceHandler, DestHandler)> {
    let source_kind = job.source().endpoint_kind();
    let dest_kind = job.dest().endpoint_kind();

    let dest_variant = match dest_kind {
        EndpointKind::Local => DestVariant::Local,
        EndpointKind::BlockBlob => DestVariant::BlockBlob,
        EndpointKind::AppendBlob => DestVariant::AppendBlob,
        EndpointKind::PageBlob => DestVariant::PageBlob,
        EndpointKind::File => DestVariant::File,
        EndpointKind::Stream | EndpointKind::Uri => {
            return Err(TransferError::Unsupported(format!(
                "{dest_kind} cannot be a destination"
            )));
        }
    };

    let source_variant = match source_kind {
        EndpointKind::Local | EndpointKind::Stream | EndpointKind::Uri => SourceVariant::Plain,
        EndpointKind::BlockBlob | EndpointKind::AppendBlob => SourceVariant::Blob,
        EndpointKind::PageBlob => SourceVariant::PageBlob,
        EndpointKind::File => SourceVariant::File,
    };

    if job.method() == TransferMethod::ServiceSideSyncCopy {
        if matches!(source_kind, EndpointKind::Local | EndpointKind::Stream) {
            return Err(TransferError::Unsupported(format!(
                "service-side copy cannot read from {source_kind}"
            )));
        }
        if dest_kind == EndpointKind::Local {
            return Err(TransferError::Unsupported(
                "service-side copy cannot write to local".to_string(),
            ));
        }
    }

    tracing::debug!(
        job_id = %job.id(),
        source = ?source_variant,
        dest = ?dest_variant,
        method = ?job.method(),
        "Handlers selected"
    );

    Ok((
        SourceHandler::new(source_variant, job.source().clone(), Arc::clone(&client)),
        DestHandler::new(dest_variant, job.dest().clone(), client),
    ))
}
