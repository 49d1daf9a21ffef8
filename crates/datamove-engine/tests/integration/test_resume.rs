//! Cancellation, checkpoint restore and exact resume

use datamove_core::domain::{
    BlobType, JobOptions, JobStatus, OverwriteDecision, TransferJob, TransferLocation,
    TransferMethod,
};
use datamove_engine::TransferError;
use tokio_util::sync::CancellationToken;

use crate::common::{self, Call, CancelAfterSink, MIB};

fn ten_mib_job() -> (TransferLocation, TransferLocation, JobOptions) {
    let source = TransferLocation::blob("src", "big.bin", BlobType::Block);
    let dest = TransferLocation::blob("dst", "big.bin", BlobType::Block);
    let options = JobOptions {
        chunk_size: Some(MIB),
        ..JobOptions::default()
    };
    (source, dest, options)
}

#[tokio::test]
async fn test_cancel_after_three_chunks_then_resume_issues_seven() {
    let storage = common::MockStorage::new();
    let (source, dest, options) = ten_mib_job();
    let content = storage.put(&source, 10 * MIB);

    // First run: cancel once three chunks are confirmed
    let token = CancellationToken::new();
    let first = common::builder(&storage, 1)
        .progress_sink(CancelAfterSink::new(3, token.clone()))
        .build()
        .unwrap();
    let job = TransferJob::new(source.clone(), dest.clone(), TransferMethod::SyncCopy)
        .with_options(options.clone());
    let job_id = job.id();

    let report = first
        .submit_with_cancel(job, token)
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(report.status, JobStatus::Canceled);
    assert!(matches!(report.error, Some(TransferError::Canceled)));
    assert_eq!(report.bytes_transferred, 3 * MIB);
    assert_eq!(storage.reads().len(), 3);
    assert_eq!(storage.writes().len(), 3);

    let saved = first.checkpoint().snapshot(&job_id).unwrap();
    assert_eq!(saved.contiguous_completed_offset(), 3 * MIB);
    assert_eq!(saved.overwrite(), OverwriteDecision::Overwrite);
    let bytes = first.checkpoint_bytes().unwrap();
    first.shutdown();

    // Second run: fresh manager, restored checkpoint, same job id
    storage.clear_calls();
    let second = common::builder(&storage, 1).build().unwrap();
    assert_eq!(second.restore_checkpoint(&bytes).unwrap(), 1);

    let job = TransferJob::with_id(job_id, source.clone(), dest.clone(), TransferMethod::SyncCopy)
        .with_options(options);
    let report = second.submit(job).unwrap().wait().await.unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.bytes_transferred, 10 * MIB);

    let reads = storage.reads();
    assert_eq!(reads.len(), 7);
    assert!(reads.iter().all(|&(offset, _)| offset >= 3 * MIB));
    let writes = storage.writes();
    assert_eq!(writes.len(), 7);
    assert!(writes.iter().all(|&(offset, _)| offset >= 3 * MIB));

    // The decision was persisted, so the destination is not recreated
    assert_eq!(storage.count(|c| matches!(c, Call::Create { .. })), 0);
    assert_eq!(storage.data(&dest).unwrap(), content);
    assert!(second.checkpoint().snapshot(&job_id).is_none());
}

#[tokio::test]
async fn test_changed_source_fails_resume_without_chunk_io() {
    let storage = common::MockStorage::new();
    let (source, dest, options) = ten_mib_job();
    storage.put(&source, 10 * MIB);

    let token = CancellationToken::new();
    let first = common::builder(&storage, 1)
        .progress_sink(CancelAfterSink::new(2, token.clone()))
        .build()
        .unwrap();
    let job = TransferJob::new(source.clone(), dest.clone(), TransferMethod::SyncCopy)
        .with_options(options.clone());
    let job_id = job.id();
    let report = first.submit_with_cancel(job, token).unwrap().wait().await.unwrap();
    assert_eq!(report.status, JobStatus::Canceled);
    let bytes = first.checkpoint_bytes().unwrap();

    storage.touch(&source);
    storage.clear_calls();

    let second = common::builder(&storage, 1).build().unwrap();
    second.restore_checkpoint(&bytes).unwrap();
    let job = TransferJob::with_id(job_id, source, dest, TransferMethod::SyncCopy).with_options(options);
    let report = second.submit(job).unwrap().wait().await.unwrap();

    assert_eq!(report.status, JobStatus::Failed);
    assert!(matches!(report.error, Some(TransferError::PreconditionMismatch(_))));
    assert!(storage.reads().is_empty());
    assert!(storage.writes().is_empty());
    assert_eq!(storage.count(|c| matches!(c, Call::Create { .. })), 0);
}

#[tokio::test]
async fn test_contiguous_offset_never_decreases() {
    let storage = common::MockStorage::new();
    let (source, dest, options) = ten_mib_job();
    storage.put(&source, 10 * MIB);

    let manager = common::builder(&storage, 4).build().unwrap();
    let job = TransferJob::new(source, dest, TransferMethod::SyncCopy).with_options(options);
    let handle = manager.submit(job).unwrap();

    let mut last = 0;
    let mut progress = handle.progress();
    while progress.changed().await.is_ok() {
        if let Some(cp) = handle.checkpoint_snapshot() {
            let offset = cp.contiguous_completed_offset();
            assert!(offset >= last);
            assert!(offset <= cp.total_length());
            last = offset;
        }
        if progress.borrow().files_completed == 1 {
            break;
        }
    }
    let report = handle.wait().await.unwrap();
    assert_eq!(report.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_corrupt_checkpoint_is_refused() {
    let storage = common::MockStorage::new();
    let manager = common::builder(&storage, 1).build().unwrap();

    let err = manager.restore_checkpoint(br#"{"version":99,"jobs":[]}"#).unwrap_err();
    assert!(matches!(err, TransferError::CheckpointCorrupted(_)));
}
