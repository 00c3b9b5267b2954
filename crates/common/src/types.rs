use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::error::{IngestError, Result};

/// Current layout version of the persisted ingestion state
pub const STATE_VERSION: u32 = 1;

/// SHA-256 content digest, lower-case hex
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    pub const HEX_LEN: usize = 64;

    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let well_formed = value.len() == Self::HEX_LEN
            && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));

        if !well_formed {
            return Err(IngestError::Config(format!(
                "invalid fingerprint '{}': expected {} lower-case hex characters",
                value,
                Self::HEX_LEN
            )));
        }
        Ok(Self(value))
    }

    /// Wrap a raw SHA-256 digest
    pub fn from_digest(digest: [u8; 32]) -> Self {
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = IngestError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionStatus {
    Pending,
    Succeeded,
    Failed,
}

impl fmt::Display for IngestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Metadata handed back by the ingestion service for a document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
}

/// One tracked source file.
///
/// `fingerprint` is the digest of the content at the last successful
/// ingestion and is `None` until the file has been ingested once. Failed or
/// interrupted attempts only touch `status`, `error` and `last_attempt_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub fingerprint: Option<Fingerprint>,
    pub size: u64,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_ingested_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub status: IngestionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
}

impl FileRecord {
    /// Record for a file that was just ingested successfully
    pub fn succeeded(
        path: impl Into<String>,
        fingerprint: Fingerprint,
        size: u64,
        modified_at: Option<DateTime<Utc>>,
        metadata: IngestMetadata,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            path: path.into(),
            fingerprint: Some(fingerprint),
            size,
            modified_at,
            last_ingested_at: Some(at),
            last_attempt_at: Some(at),
            status: IngestionStatus::Succeeded,
            error: None,
            candidate_name: metadata.candidate_name,
            document_id: metadata.document_id,
        }
    }

    /// First-seen record for a file whose outcome is not known yet
    pub fn pending(path: impl Into<String>, size: u64, modified_at: Option<DateTime<Utc>>) -> Self {
        Self {
            path: path.into(),
            fingerprint: None,
            size,
            modified_at,
            last_ingested_at: None,
            last_attempt_at: None,
            status: IngestionStatus::Pending,
            error: None,
            candidate_name: None,
            document_id: None,
        }
    }

    /// Copy of this record with a failed attempt noted. Fingerprint, size and
    /// ingestion metadata keep describing the last successful ingestion.
    pub fn with_failure(&self, error: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            status: IngestionStatus::Failed,
            error: Some(error.into()),
            last_attempt_at: Some(at),
            ..self.clone()
        }
    }

    /// Copy of this record noting an attempt that failed before the service
    /// was contacted. Status is left as it was.
    pub fn with_attempt_error(&self, error: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            error: Some(error.into()),
            last_attempt_at: Some(at),
            ..self.clone()
        }
    }

    /// True when `fingerprint` matches the content of the last successful ingestion
    pub fn is_current(&self, fingerprint: &Fingerprint) -> bool {
        self.status == IngestionStatus::Succeeded && self.fingerprint.as_ref() == Some(fingerprint)
    }

    pub fn has_succeeded_before(&self) -> bool {
        self.fingerprint.is_some()
    }
}

/// A single change to apply on top of the persisted state
#[derive(Debug, Clone, PartialEq)]
pub enum RecordUpdate {
    Upsert(FileRecord),
    Remove(String),
}

impl RecordUpdate {
    pub fn path(&self) -> &str {
        match self {
            Self::Upsert(record) => &record.path,
            Self::Remove(path) => path,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Complete persisted record of all tracked files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub version: u32,
    #[serde(default)]
    pub files: BTreeMap<String, FileRecord>,
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            files: BTreeMap::new(),
        }
    }
}

impl StateSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&FileRecord> {
        self.files.get(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn apply(&mut self, update: RecordUpdate) {
        match update {
            RecordUpdate::Upsert(record) => {
                self.files.insert(record.path.clone(), record);
            }
            RecordUpdate::Remove(path) => {
                self.files.remove(&path);
            }
        }
    }

    pub fn apply_all(&mut self, updates: impl IntoIterator<Item = RecordUpdate>) {
        for update in updates {
            self.apply(update);
        }
    }

    /// Records whose path lies under `root` (component-wise prefix)
    pub fn records_under<'a>(&'a self, root: &'a Path) -> impl Iterator<Item = &'a FileRecord> + 'a {
        self.files
            .values()
            .filter(move |record| Path::new(&record.path).starts_with(root))
    }

    pub fn status_counts(&self) -> StatusCounts {
        self.files
            .values()
            .fold(StatusCounts::default(), |mut counts, record| {
                match record.status {
                    IngestionStatus::Pending => counts.pending += 1,
                    IngestionStatus::Succeeded => counts.succeeded += 1,
                    IngestionStatus::Failed => counts.failed += 1,
                }
                counts
            })
    }
}

/// What to do with records whose file vanished from the source directory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletionPolicy {
    /// Report the stale record and leave it in place
    #[default]
    Keep,
    /// Ask the ingestion service to forget the document, then drop the record
    Purge,
}

impl fmt::Display for DeletionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keep => write!(f, "keep"),
            Self::Purge => write!(f, "purge"),
        }
    }
}
