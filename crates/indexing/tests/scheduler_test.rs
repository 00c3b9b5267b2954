mod common;

use ats_indexing::{
    fingerprint_bytes, state_key, BatchJob, BatchScheduler, ChangeKind, FileOutcome, PendingFile,
};
use common::*;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn pending(root: &Path, name: &str, content: &str) -> PendingFile {
    write_file(root, name, content);
    let path = root.join(name);
    PendingFile {
        key: state_key(&path),
        path,
        kind: ChangeKind::New,
        observed: fingerprint_bytes(content.as_bytes()),
        size: content.len() as u64,
        modified_at: None,
    }
}

#[tokio::test]
async fn test_outcomes_follow_submission_order() {
    let dir = resume_dir(&[]);
    let members = vec![
        pending(dir.path(), "slow.txt", "slow"),
        pending(dir.path(), "medium.txt", "medium"),
        pending(dir.path(), "fast.txt", "fast"),
    ];

    let ingestor = Arc::new(
        MockIngestor::new()
            .with_delay_for("slow.txt", Duration::from_millis(80))
            .with_delay_for("medium.txt", Duration::from_millis(40)),
    );
    let scheduler = BatchScheduler::new(ingestor, CancellationToken::new());

    let results = scheduler
        .run_batch(BatchJob {
            members,
            concurrency: 3,
            force_reingest: false,
        })
        .await;

    let names: Vec<_> = results
        .iter()
        .map(|(file, _)| file.path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["slow.txt", "medium.txt", "fast.txt"]);
    assert!(results.iter().all(|(_, outcome)| outcome.is_success()));
}

#[tokio::test]
async fn test_failure_and_panic_do_not_affect_siblings() {
    let dir = resume_dir(&[]);
    let members = vec![
        pending(dir.path(), "ok_1.txt", "one"),
        pending(dir.path(), "broken.txt", "two"),
        pending(dir.path(), "explodes.txt", "three"),
        pending(dir.path(), "ok_2.txt", "four"),
    ];

    let ingestor = Arc::new(
        MockIngestor::new()
            .failing_on("broken.txt")
            .panicking_on("explodes.txt"),
    );
    let scheduler = BatchScheduler::new(ingestor.clone(), CancellationToken::new());

    let results = scheduler
        .run_batch(BatchJob {
            members,
            concurrency: 2,
            force_reingest: false,
        })
        .await;

    assert!(results[0].1.is_success());
    assert!(matches!(&results[1].1, FileOutcome::Failed { error } if error.contains("extraction failed")));
    assert!(matches!(&results[2].1, FileOutcome::Failed { error } if error.contains("panicked")));
    assert!(results[3].1.is_success());
    assert_eq!(ingestor.call_count(), 4);
}

#[tokio::test]
async fn test_fingerprint_is_taken_from_ingested_bytes() {
    let dir = resume_dir(&[]);
    let mut file = pending(dir.path(), "cv.txt", "first draft");
    // Content changed between detection and dispatch
    write_file(dir.path(), "cv.txt", "final version");
    file.observed = fingerprint_bytes(b"first draft");

    let scheduler = BatchScheduler::new(Arc::new(MockIngestor::new()), CancellationToken::new());
    let results = scheduler
        .run_batch(BatchJob {
            members: vec![file],
            concurrency: 1,
            force_reingest: false,
        })
        .await;

    match &results[0].1 {
        FileOutcome::Succeeded { fingerprint, size, .. } => {
            assert_eq!(fingerprint, &fingerprint_bytes(b"final version"));
            assert_eq!(*size, "final version".len() as u64);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_file_fails_without_calling_the_service() {
    let dir = resume_dir(&[]);
    let file = pending(dir.path(), "gone.txt", "soon removed");
    std::fs::remove_file(&file.path).unwrap();

    let ingestor = Arc::new(MockIngestor::new());
    let scheduler = BatchScheduler::new(ingestor.clone(), CancellationToken::new());
    let results = scheduler
        .run_batch(BatchJob {
            members: vec![file],
            concurrency: 1,
            force_reingest: false,
        })
        .await;

    assert!(matches!(&results[0].1, FileOutcome::Failed { error } if error.contains("failed to read file")));
    assert_eq!(ingestor.call_count(), 0);
}

#[tokio::test]
async fn test_cancelled_token_skips_the_batch() {
    let dir = resume_dir(&[]);
    let members = vec![
        pending(dir.path(), "a.txt", "a"),
        pending(dir.path(), "b.txt", "b"),
    ];

    let cancel = CancellationToken::new();
    cancel.cancel();
    let ingestor = Arc::new(MockIngestor::new());
    let scheduler = BatchScheduler::new(ingestor.clone(), cancel);

    let results = scheduler
        .run_batch(BatchJob {
            members,
            concurrency: 2,
            force_reingest: false,
        })
        .await;

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|(_, outcome)| matches!(outcome, FileOutcome::Cancelled)));
    assert_eq!(ingestor.call_count(), 0);
}
