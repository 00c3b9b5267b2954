mod common;

use ats_common::IngestError;
use ats_indexing::DirectoryScanner;
use common::*;
use std::path::PathBuf;

fn names(files: &[PathBuf], root: &std::path::Path) -> Vec<String> {
    files
        .iter()
        .map(|f| f.strip_prefix(root).unwrap().to_string_lossy().into_owned())
        .collect()
}

#[tokio::test]
async fn test_scan_lists_supported_files_sorted() {
    let dir = resume_dir(&[
        ("zoe.pdf", "%PDF"),
        ("adam.DOCX", "docx"),
        ("notes.text", "plain"),
        ("photo.png", "png"),
        ("archive/2023/old.txt", "old"),
        (".hidden.txt", "secret"),
        (".cache/cached.pdf", "cached"),
    ]);

    let listing = DirectoryScanner::new(EXTENSIONS).scan(dir.path()).await.unwrap();
    let root = dir.path().canonicalize().unwrap();

    assert_eq!(listing.root, root);
    assert_eq!(
        names(&listing.files, &root),
        vec!["adam.DOCX", "archive/2023/old.txt", "notes.text", "zoe.pdf"]
    );
    assert!(listing.skipped.is_empty());
}

#[tokio::test]
async fn test_non_recursive_scan_stays_at_top_level() {
    let dir = resume_dir(&[("top.txt", "top"), ("nested/deep.txt", "deep")]);

    let listing = DirectoryScanner::new(EXTENSIONS)
        .recursive(false)
        .scan(dir.path())
        .await
        .unwrap();

    assert_eq!(names(&listing.files, &listing.root), vec!["top.txt"]);
}

#[tokio::test]
async fn test_hidden_files_can_be_included() {
    let dir = resume_dir(&[(".draft.txt", "draft"), ("final.txt", "final")]);

    let listing = DirectoryScanner::new(EXTENSIONS)
        .include_hidden(true)
        .scan(dir.path())
        .await
        .unwrap();

    assert_eq!(names(&listing.files, &listing.root), vec![".draft.txt", "final.txt"]);
}

#[tokio::test]
async fn test_oversized_files_are_skipped_with_reason() {
    let big = "x".repeat(2048);
    let dir = resume_dir(&[("small.txt", "tiny"), ("big.pdf", big.as_str())]);

    let listing = DirectoryScanner::new(EXTENSIONS)
        .max_file_size(Some(1024))
        .scan(dir.path())
        .await
        .unwrap();

    assert_eq!(names(&listing.files, &listing.root), vec!["small.txt"]);
    assert_eq!(listing.skipped.len(), 1);
    assert!(listing.skipped[0].0.ends_with("big.pdf"));
    assert!(listing.skipped[0].1.contains("2048 bytes"));
}

#[tokio::test]
async fn test_missing_directory_is_rejected() {
    let dir = resume_dir(&[]);
    let missing = dir.path().join("does-not-exist");

    let err = DirectoryScanner::new(EXTENSIONS).scan(&missing).await.unwrap_err();
    assert!(matches!(err, IngestError::InvalidDirectory { .. }));
}

#[tokio::test]
async fn test_file_as_root_is_rejected() {
    let dir = resume_dir(&[("cv.pdf", "%PDF")]);

    let err = DirectoryScanner::new(EXTENSIONS)
        .scan(&dir.path().join("cv.pdf"))
        .await
        .unwrap_err();
    assert!(err.is_config_error());
}
