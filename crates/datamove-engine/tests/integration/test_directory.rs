//! Directory transfers: one job per listed entry

use datamove_core::domain::{BlobType, JobOptions, TransferLocation, TransferMethod};
use datamove_core::ports::ListEntry;
use datamove_engine::TransferError;

use crate::common::{self, KIB};

fn entry(name: &str, length: u64) -> ListEntry {
    ListEntry {
        relative_name: name.to_string(),
        length,
    }
}

#[tokio::test]
async fn test_failed_entry_does_not_stop_siblings() {
    let storage = common::MockStorage::new();
    let source = TransferLocation::blob("media", "photos", BlobType::Block);
    let dest = TransferLocation::blob("backup", "photos", BlobType::Block);
    let a = storage.put(&source.child("a.jpg").unwrap(), 12 * KIB);
    let b = storage.put(&source.child("2024/b.jpg").unwrap(), 20 * KIB);
    storage.set_listing(
        &source,
        vec![entry("2024/b.jpg", 20 * KIB), entry("a.jpg", 12 * KIB), entry("gone.jpg", KIB)],
    );

    let manager = common::builder(&storage, 4).build().unwrap();
    let handle = manager
        .copy_directory(source, dest.clone(), TransferMethod::SyncCopy, JobOptions::default())
        .await
        .unwrap();
    assert_eq!(handle.total(), 3);
    assert_eq!(handle.job_ids().len(), 3);

    let progress = handle.progress();
    let report = handle.wait().await;
    assert_eq!(report.completed, 2);
    assert_eq!(report.bytes_transferred, 32 * KIB);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].relative_name, "gone.jpg");
    assert!(matches!(report.failures[0].error, TransferError::SourceNotFound(_)));

    let snapshot = *progress.borrow();
    assert_eq!(snapshot.files_completed, 2);
    assert_eq!(snapshot.files_failed, 1);
    assert_eq!(snapshot.bytes_transferred, 32 * KIB);

    assert_eq!(storage.data(&dest.child("a.jpg").unwrap()).unwrap(), a);
    assert_eq!(storage.data(&dest.child("2024/b.jpg").unwrap()).unwrap(), b);

    let err = report.into_result().unwrap_err();
    assert!(matches!(err, TransferError::SubTransferFailed { failed: 1, total: 3 }));
}

#[tokio::test]
async fn test_unaddressable_entry_counted_as_failure() {
    let storage = common::MockStorage::new();
    let source = TransferLocation::blob("media", "docs", BlobType::Block);
    storage.put(&source.child("ok.txt").unwrap(), KIB);
    storage.set_listing(&source, vec![entry("ok.txt", KIB), entry("../escape.txt", KIB)]);

    let manager = common::builder(&storage, 2).build().unwrap();
    let handle = manager
        .copy_directory(
            source,
            TransferLocation::blob("backup", "docs", BlobType::Block),
            TransferMethod::SyncCopy,
            JobOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(handle.job_ids().len(), 1);

    let report = handle.wait().await;
    assert_eq!(report.completed, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].relative_name, "../escape.txt");
}

#[tokio::test]
async fn test_missing_directory_is_source_not_found() {
    let storage = common::MockStorage::new();
    let manager = common::builder(&storage, 2).build().unwrap();

    let err = manager
        .copy_directory(
            TransferLocation::blob("media", "nowhere", BlobType::Block),
            TransferLocation::blob("backup", "nowhere", BlobType::Block),
            TransferMethod::SyncCopy,
            JobOptions::default(),
        )
        .await
        .err()
        .unwrap();
    assert!(matches!(err, TransferError::SourceNotFound(_)));
}

#[tokio::test]
async fn test_empty_directory_completes_immediately() {
    let storage = common::MockStorage::new();
    let source = TransferLocation::blob("media", "empty", BlobType::Block);
    storage.set_listing(&source, Vec::new());
    let manager = common::builder(&storage, 2).build().unwrap();

    let report = manager
        .copy_directory(
            source,
            TransferLocation::blob("backup", "empty", BlobType::Block),
            TransferMethod::SyncCopy,
            JobOptions::default(),
        )
        .await
        .unwrap()
        .wait()
        .await;
    assert_eq!(report.total, 0);
    assert!(report.into_result().is_ok());
}

#[tokio::test]
async fn test_entries_after_shutdown_are_reported_failed() {
    let storage = common::MockStorage::new();
    let source = TransferLocation::blob("media", "late", BlobType::Block);
    storage.put(&source.child("a.txt").unwrap(), KIB);
    storage.put(&source.child("b.txt").unwrap(), KIB);
    storage.set_listing(&source, vec![entry("a.txt", KIB), entry("b.txt", KIB)]);

    let manager = common::builder(&storage, 2).build().unwrap();
    manager.shutdown();

    let handle = manager
        .copy_directory(
            source,
            TransferLocation::blob("backup", "late", BlobType::Block),
            TransferMethod::SyncCopy,
            JobOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(handle.total(), 2);
    assert!(handle.job_ids().is_empty());
    assert_eq!(handle.latest().files_failed, 2);

    let report = handle.wait().await;
    assert_eq!(report.completed, 0);
    assert_eq!(report.failures.len(), 2);
    assert_eq!(report.failures[0].relative_name, "a.txt");
    assert!(report
        .failures
        .iter()
        .all(|f| matches!(f.error, TransferError::SchedulerClosed)));
    assert!(storage.writes().is_empty());
}
