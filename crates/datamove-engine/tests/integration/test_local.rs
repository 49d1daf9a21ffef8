//! End-to-end transfers through the local filesystem adapter

use std::sync::Arc;

use datamove_core::domain::{JobOptions, JobStatus, TransferLocation, TransferMethod};
use datamove_engine::local::LocalStorageClient;
use datamove_engine::policy::OverwritePolicy;
use datamove_engine::{TransferError, TransferManager};
use tempfile::tempdir;

use crate::common::{self, KIB};

fn manager(prompt: OverwritePolicy) -> TransferManager {
    TransferManager::builder(Arc::new(LocalStorageClient::new()))
        .config(common::test_config(4))
        .overwrite_prompt(Arc::new(prompt))
        .build()
        .unwrap()
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

#[tokio::test]
async fn test_local_copy_round_trip() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("in.bin");
    let dest = dir.path().join("out/copy.bin");
    let content = pattern(100 * KIB as usize + 17);
    std::fs::write(&source, &content).unwrap();

    let report = manager(OverwritePolicy::Never)
        .copy(
            TransferLocation::local(&source),
            TransferLocation::local(&dest),
            TransferMethod::SyncCopy,
            JobOptions {
                chunk_size: Some(16 * KIB),
                ..JobOptions::default()
            },
        )
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.bytes_transferred, content.len() as u64);
    assert_eq!(std::fs::read(&dest).unwrap(), content);
}

#[tokio::test]
async fn test_local_download_conflict_respects_policy() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("in.txt");
    let dest = dir.path().join("out.txt");
    std::fs::write(&source, b"fresh content").unwrap();
    std::fs::write(&dest, b"old").unwrap();

    let report = manager(OverwritePolicy::Never)
        .download(TransferLocation::local(&source), &dest, JobOptions::default())
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(report.status, JobStatus::Skipped);
    assert!(matches!(report.error, Some(TransferError::OverwriteDeclined(_))));
    assert_eq!(std::fs::read(&dest).unwrap(), b"old");

    let report = manager(OverwritePolicy::Always)
        .download(TransferLocation::local(&source), &dest, JobOptions::default())
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(std::fs::read(&dest).unwrap(), b"fresh content");
}

#[tokio::test]
async fn test_local_directory_copy() {
    let src = tempdir().unwrap();
    let dst = tempdir().unwrap();
    std::fs::create_dir_all(src.path().join("nested")).unwrap();
    std::fs::write(src.path().join("top.txt"), b"top").unwrap();
    std::fs::write(src.path().join("nested/deep.txt"), pattern(9000)).unwrap();

    let report = manager(OverwritePolicy::Never)
        .copy_directory(
            TransferLocation::local(src.path()),
            TransferLocation::local(dst.path().join("mirror")),
            TransferMethod::SyncCopy,
            JobOptions::default(),
        )
        .await
        .unwrap()
        .wait()
        .await
        .into_result()
        .unwrap();

    assert_eq!(report.completed, 2);
    assert_eq!(std::fs::read(dst.path().join("mirror/top.txt")).unwrap(), b"top");
    assert_eq!(
        std::fs::read(dst.path().join("mirror/nested/deep.txt")).unwrap(),
        pattern(9000)
    );
}

#[tokio::test]
async fn test_completed_job_drops_checkpoint() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("in.bin");
    let dest = dir.path().join("out.bin");
    std::fs::write(&source, pattern(8 * KIB as usize)).unwrap();

    let first = manager(OverwritePolicy::Never);
    let job = datamove_core::domain::TransferJob::new(
        TransferLocation::local(&source),
        TransferLocation::local(&dest),
        TransferMethod::SyncCopy,
    );
    let job_id = job.id();
    let report = first.submit(job).unwrap().wait().await.unwrap();
    assert_eq!(report.status, JobStatus::Completed);
    assert!(!first.checkpoint().contains(&job_id));
}
