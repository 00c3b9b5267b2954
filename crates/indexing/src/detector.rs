//! Classifies observed files against the persisted state.
//!
//! Only the content fingerprint decides whether a file changed. Size and
//! modification time are carried along for the record but never compared.

use ats_common::{FileRecord, Fingerprint, StateSnapshot};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Never ingested successfully
    New,
    /// Content differs from the last successful ingestion
    Modified,
    /// Content matches the last success, but a later attempt did not succeed
    Retry,
    /// Content matches the last successful ingestion
    Unchanged,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Modified => write!(f, "modified"),
            Self::Retry => write!(f, "retry"),
            Self::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// A file seen in the current listing, already fingerprinted
#[derive(Debug, Clone)]
pub struct Observation {
    pub key: String,
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
}

/// A file selected for ingestion in this run
#[derive(Debug, Clone)]
pub struct PendingFile {
    pub key: String,
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub observed: Fingerprint,
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    /// In listing order
    pub pending: Vec<PendingFile>,
    pub unchanged: Vec<String>,
    /// Tracked paths under the root that are no longer present
    pub deleted: Vec<String>,
}

impl ChangeSet {
    pub fn count(&self, kind: ChangeKind) -> usize {
        self.pending.iter().filter(|p| p.kind == kind).count()
    }

    pub fn is_noop(&self) -> bool {
        self.pending.is_empty() && self.deleted.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeDetector {
    force_reingest: bool,
}

impl ChangeDetector {
    pub fn new(force_reingest: bool) -> Self {
        Self { force_reingest }
    }

    pub fn classify(&self, fingerprint: &Fingerprint, record: Option<&FileRecord>) -> ChangeKind {
        match record {
            None => ChangeKind::New,
            Some(record) if !record.has_succeeded_before() => ChangeKind::New,
            Some(record) if record.fingerprint.as_ref() != Some(fingerprint) => ChangeKind::Modified,
            Some(record) if !record.is_current(fingerprint) => ChangeKind::Retry,
            Some(_) => ChangeKind::Unchanged,
        }
    }

    /// Split the listing into pending and unchanged files and flag tracked
    /// paths under `root` that were not listed at all.
    ///
    /// `unreadable` holds keys of files that were listed but could not be
    /// fingerprinted; they are neither pending nor deleted.
    pub fn detect(
        &self,
        snapshot: &StateSnapshot,
        root: &Path,
        observations: Vec<Observation>,
        unreadable: &[String],
    ) -> ChangeSet {
        let mut seen: HashSet<String> = unreadable.iter().cloned().collect();
        let mut changes = ChangeSet::default();

        for observation in observations {
            seen.insert(observation.key.clone());
            let kind = self.classify(&observation.fingerprint, snapshot.get(&observation.key));

            if kind == ChangeKind::Unchanged && !self.force_reingest {
                changes.unchanged.push(observation.key);
                continue;
            }

            changes.pending.push(PendingFile {
                key: observation.key,
                path: observation.path,
                kind,
                observed: observation.fingerprint,
                size: observation.size,
                modified_at: observation.modified_at,
            });
        }

        changes.deleted = snapshot
            .records_under(root)
            .filter(|record| !seen.contains(&record.path))
            .map(|record| record.path.clone())
            .collect();

        changes
    }
}
