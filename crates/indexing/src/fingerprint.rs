//! Content fingerprints for resume files.
//!
//! SHA-256 over the raw bytes. Modification times are collected for
//! diagnostics only and never decide whether a file changed.

use ats_common::Fingerprint;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};

const READ_BLOCK: usize = 64 * 1024;

/// Fingerprint and size of a file as observed during the scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFingerprint {
    pub fingerprint: Fingerprint,
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Full file content together with its fingerprint
#[derive(Debug, Clone)]
pub struct FileContent {
    pub bytes: Vec<u8>,
    pub fingerprint: Fingerprint,
    pub modified_at: Option<DateTime<Utc>>,
}

impl FileContent {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

pub fn fingerprint_bytes(bytes: &[u8]) -> Fingerprint {
    Fingerprint::from_digest(Sha256::digest(bytes).into())
}

/// Stream a file through the hasher without holding it in memory
pub async fn fingerprint_file(path: &Path) -> std::io::Result<FileFingerprint> {
    let path: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || fingerprint_file_blocking(&path))
        .await
        .map_err(std::io::Error::other)?
}

fn fingerprint_file_blocking(path: &Path) -> std::io::Result<FileFingerprint> {
    let mut file = std::fs::File::open(path)?;
    let modified_at = file.metadata()?.modified().ok().map(DateTime::<Utc>::from);

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BLOCK];
    let mut size = 0u64;
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        size += read as u64;
    }

    Ok(FileFingerprint {
        fingerprint: Fingerprint::from_digest(hasher.finalize().into()),
        size,
        modified_at,
    })
}

/// Read a file in full and fingerprint exactly the bytes that were read
pub async fn read_with_fingerprint(path: &Path) -> std::io::Result<FileContent> {
    let bytes = tokio::fs::read(path).await?;
    let modified_at = tokio::fs::metadata(path)
        .await
        .ok()
        .and_then(|meta| meta.modified().ok())
        .map(DateTime::<Utc>::from);
    let fingerprint = fingerprint_bytes(&bytes);

    Ok(FileContent {
        bytes,
        fingerprint,
        modified_at,
    })
}
