//! Destination overwrite negotiation

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use datamove_core::domain::{
    AccessCondition, Attributes, BlobType, ETag, JobOptions, JobStatus, TransferLocation, TransferMethod,
};
use datamove_core::ports::IOverwritePrompt;
use datamove_engine::policy::{FnPrompt, OverwritePolicy, PromptFuture};
use datamove_engine::TransferError;

use crate::common::{self, Call, KIB};

fn pair() -> (TransferLocation, TransferLocation) {
    (
        TransferLocation::blob("src", "report.csv", BlobType::Block),
        TransferLocation::blob("dst", "report.csv", BlobType::Block),
    )
}

/// Prompt that counts invocations and answers `answer`
fn counting_prompt(answer: bool) -> (Arc<AtomicUsize>, Arc<dyn IOverwritePrompt>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let prompt: Arc<dyn IOverwritePrompt> = Arc::new(FnPrompt::new(move |_query| -> PromptFuture {
        counter.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { Ok(answer) })
    }));
    (calls, prompt)
}

#[tokio::test]
async fn test_existing_destination_is_skipped_by_default() {
    let storage = common::MockStorage::new();
    let (source, dest) = pair();
    storage.put(&source, 64 * KIB);
    storage.put_bytes(&dest, b"keep me".to_vec(), Attributes::default());

    let manager = common::builder(&storage, 4).build().unwrap();
    let report = manager
        .copy(source, dest.clone(), TransferMethod::SyncCopy, JobOptions::default())
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(report.status, JobStatus::Skipped);
    assert!(matches!(report.error, Some(TransferError::OverwriteDeclined(_))));
    assert_eq!(report.bytes_transferred, 0);
    assert!(storage.writes().is_empty());
    assert_eq!(storage.data(&dest).unwrap(), b"keep me");
}

#[tokio::test]
async fn test_prompt_asked_once_per_job() {
    let storage = common::MockStorage::new();
    let (source, dest) = pair();
    let content = storage.put(&source, 64 * KIB);
    storage.put(&dest, 10);
    let (calls, prompt) = counting_prompt(true);

    let manager = common::builder(&storage, 4)
        .overwrite_prompt(prompt)
        .build()
        .unwrap();
    let options = JobOptions {
        chunk_size: Some(8 * KIB),
        ..JobOptions::default()
    };
    let report = manager
        .copy(source, dest.clone(), TransferMethod::SyncCopy, options)
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(storage.writes().len(), 8);
    assert_eq!(storage.data(&dest).unwrap(), content);
}

#[tokio::test]
async fn test_accepted_overwrite_replaces_racing_writer() {
    let storage = common::MockStorage::new();
    let (source, dest) = pair();
    let content = storage.put(&source, 16 * KIB);
    storage.put(&dest, 100);

    let racer = storage.clone();
    let racing_dest = dest.clone();
    let prompt = FnPrompt::new(move |_query| -> PromptFuture {
        // someone else recreates the destination while the user decides
        racer.put_bytes(&racing_dest, vec![7; 300], Attributes::default());
        Box::pin(async { Ok(true) })
    });

    let manager = common::builder(&storage, 2)
        .overwrite_prompt(Arc::new(prompt))
        .build()
        .unwrap();
    let report = manager
        .copy(source, dest.clone(), TransferMethod::SyncCopy, JobOptions::default())
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(storage.data(&dest).unwrap(), content);
}

#[tokio::test]
async fn test_force_overwrite_never_prompts() {
    let storage = common::MockStorage::new();
    let (source, dest) = pair();
    let content = storage.put(&source, 4 * KIB);
    storage.put(&dest, 10);
    let (calls, prompt) = counting_prompt(false);

    let manager = common::builder(&storage, 2)
        .overwrite_prompt(prompt)
        .build()
        .unwrap();
    let options = JobOptions {
        force_overwrite: true,
        ..JobOptions::default()
    };
    let report = manager
        .copy(source, dest.clone(), TransferMethod::SyncCopy, options)
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let dest_id = dest.id();
    assert_eq!(
        storage.count(|c| matches!(c, Call::Fetch { id } if *id == dest_id)),
        0
    );
    assert_eq!(storage.data(&dest).unwrap(), content);
}

#[tokio::test]
async fn test_dest_condition_mismatch_goes_to_prompt() {
    for accept in [true, false] {
        let storage = common::MockStorage::new();
        let (source, dest) = pair();
        let content = storage.put(&source, 4 * KIB);
        storage.put(&dest, 10);
        let stale = storage.attributes(&dest).unwrap().etag.unwrap();
        storage.touch(&dest);
        let (calls, prompt) = counting_prompt(accept);

        let manager = common::builder(&storage, 2)
            .overwrite_prompt(prompt)
            .build()
            .unwrap();
        let report = manager
            .copy(
                source,
                dest.clone().with_access_condition(AccessCondition::IfMatch(stale)),
                TransferMethod::SyncCopy,
                JobOptions::default(),
            )
            .unwrap()
            .wait()
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        if accept {
            assert_eq!(report.status, JobStatus::Completed);
            assert_eq!(storage.data(&dest).unwrap(), content);
        } else {
            assert_eq!(report.status, JobStatus::Skipped);
            assert!(matches!(report.error, Some(TransferError::OverwriteDeclined(_))));
            assert!(storage.writes().is_empty());
            assert_eq!(storage.data(&dest).unwrap().len(), 10);
        }
    }
}

#[tokio::test]
async fn test_matching_condition_reuses_same_length_destination() {
    let storage = common::MockStorage::new();
    let (source, dest) = pair();
    let content = storage.put(&source, 4 * KIB);
    storage.put(&dest, 4 * KIB);
    let etag = storage.attributes(&dest).unwrap().etag.unwrap();
    let (calls, prompt) = counting_prompt(true);

    let manager = common::builder(&storage, 2)
        .overwrite_prompt(prompt)
        .build()
        .unwrap();
    let report = manager
        .copy(
            source,
            dest.clone().with_access_condition(AccessCondition::IfMatch(etag)),
            TransferMethod::SyncCopy,
            JobOptions::default(),
        )
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(storage.count(|c| matches!(c, Call::Create { .. })), 0);
    assert_eq!(storage.data(&dest).unwrap(), content);
}

#[tokio::test]
async fn test_missing_conditional_destination_goes_to_prompt() {
    for accept in [true, false] {
        let storage = common::MockStorage::new();
        let (source, dest) = pair();
        let content = storage.put(&source, 4 * KIB);
        let (calls, prompt) = counting_prompt(accept);

        let manager = common::builder(&storage, 2)
            .overwrite_prompt(prompt)
            .build()
            .unwrap();
        let report = manager
            .copy(
                source,
                dest.clone()
                    .with_access_condition(AccessCondition::IfMatch(ETag::new("\"0xbeef\"").unwrap())),
                TransferMethod::SyncCopy,
                JobOptions::default(),
            )
            .unwrap()
            .wait()
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        if accept {
            assert_eq!(report.status, JobStatus::Completed);
            assert_eq!(storage.data(&dest).unwrap(), content);
        } else {
            assert_eq!(report.status, JobStatus::Skipped);
            assert!(storage.data(&dest).is_none());
        }
    }
}

#[tokio::test]
async fn test_source_newer_policy_keeps_fresher_destination() {
    let storage = common::MockStorage::new();
    let (source, dest) = pair();
    let now = chrono::Utc::now();
    storage.put_bytes(
        &source,
        vec![1; 100],
        Attributes {
            last_modified: Some(now - chrono::Duration::hours(1)),
            ..Attributes::default()
        },
    );
    storage.put_bytes(
        &dest,
        vec![2; 50],
        Attributes {
            last_modified: Some(now),
            ..Attributes::default()
        },
    );

    let manager = common::builder(&storage, 2)
        .overwrite_prompt(Arc::new(OverwritePolicy::IfSourceNewer))
        .build()
        .unwrap();
    let report = manager
        .copy(source, dest.clone(), TransferMethod::SyncCopy, JobOptions::default())
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(report.status, JobStatus::Skipped);
    assert_eq!(storage.data(&dest).unwrap(), vec![2; 50]);
}
