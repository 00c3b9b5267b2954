use ats_common::{
    DeletionPolicy, FileRecord, IngestError, RecordUpdate, Result, RunOptions, StateSnapshot,
};
use ats_storage::{RunLock, StateStore};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn, Span};

use crate::detector::{ChangeDetector, ChangeKind, ChangeSet, Observation};
use crate::fingerprint::fingerprint_file;
use crate::ingestor::Ingestor;
use crate::scanner::{state_key, DirectoryScanner, ScanListing};
use crate::scheduler::{BatchJob, BatchScheduler, FileOutcome, ProgressFn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    pub path: String,
    pub error: String,
}

/// Aggregate result of one `run()`
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub directory: PathBuf,
    /// Supported files found in the directory
    pub total_files: usize,
    pub new: usize,
    pub modified: usize,
    pub retried: usize,
    /// Unchanged files ingested again because of `force_reingest`
    pub reingested: usize,
    /// Unchanged files that were skipped
    pub unchanged: usize,
    pub failed: usize,
    pub purged: usize,
    pub deleted: Vec<String>,
    /// In submission order
    pub failures: Vec<FailureReport>,
    pub batches: usize,
    pub elapsed_secs: f64,
    pub cancelled: bool,
}

impl RunReport {
    pub fn ingested(&self) -> usize {
        self.new + self.modified + self.retried + self.reingested
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0 && !self.cancelled
    }

    fn record_failure(&mut self, path: &str, error: impl Into<String>) {
        self.failed += 1;
        self.failures.push(FailureReport {
            path: path.to_string(),
            error: error.into(),
        });
    }
}

/// Drives change detection, batched ingestion and checkpointing for one
/// source directory. The state store is passed in; there is no ambient state.
pub struct IngestionCoordinator {
    store: Arc<dyn StateStore>,
    ingestor: Arc<dyn Ingestor>,
    scanner: DirectoryScanner,
    cancel: CancellationToken,
    progress: Option<ProgressFn>,
    lock_for: Option<PathBuf>,
}

impl IngestionCoordinator {
    pub fn new(
        store: Arc<dyn StateStore>,
        ingestor: Arc<dyn Ingestor>,
        scanner: DirectoryScanner,
    ) -> Self {
        Self {
            store,
            ingestor,
            scanner,
            cancel: CancellationToken::new(),
            progress: None,
            lock_for: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Hold `RunLock` for `state_path` for the whole of every `run()`
    pub fn with_run_lock(mut self, state_path: impl Into<PathBuf>) -> Self {
        self.lock_for = Some(state_path.into());
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Classify the directory against the persisted state without ingesting
    /// or writing anything.
    pub async fn plan(&self, options: &RunOptions) -> Result<ChangeSet> {
        let snapshot = self.store.load().await?;
        let scan = self.observe(options.directory(), options.batch_size()).await?;
        let unreadable: Vec<String> = scan.failures.iter().map(|(key, _)| key.clone()).collect();

        let mut changes = ChangeDetector::new(options.force_reingest()).detect(
            &snapshot,
            &scan.listing.root,
            scan.observations,
            &unreadable,
        );
        retain_missing_files(&mut changes.deleted).await;
        Ok(changes)
    }

    #[instrument(
        name = "ingestion_run",
        skip_all,
        fields(run_id = tracing::field::Empty, directory = %options.directory().display())
    )]
    pub async fn run(&self, options: &RunOptions) -> Result<RunReport> {
        let started = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        Span::current().record("run_id", run_id.as_str());

        let _lock = match &self.lock_for {
            Some(state_path) => Some(RunLock::acquire(state_path)?),
            None => None,
        };

        let mut report = RunReport {
            run_id,
            directory: options.directory().to_path_buf(),
            ..Default::default()
        };

        let mut snapshot = self.store.load().await?;
        info!(
            records = snapshot.len(),
            state = %self.store.location(),
            force = options.force_reingest(),
            batch_size = options.batch_size(),
            "Loaded ingestion state"
        );

        let scan = self.observe(options.directory(), options.batch_size()).await?;
        report.total_files = scan.listing.files.len() + scan.listing.skipped.len();

        let unreadable: Vec<String> = scan.failures.iter().map(|(key, _)| key.clone()).collect();
        let mut changes = ChangeDetector::new(options.force_reingest()).detect(
            &snapshot,
            &scan.listing.root,
            scan.observations,
            &unreadable,
        );
        retain_missing_files(&mut changes.deleted).await;
        report.unchanged = changes.unchanged.len();

        info!(
            files = report.total_files,
            pending = changes.pending.len(),
            new = changes.count(ChangeKind::New),
            modified = changes.count(ChangeKind::Modified),
            unchanged = changes.unchanged.len(),
            deleted = changes.deleted.len(),
            unreadable = scan.failures.len(),
            "Change detection complete"
        );

        if !scan.failures.is_empty() {
            let now = Utc::now();
            let updates: Vec<RecordUpdate> = scan
                .failures
                .iter()
                .map(|(key, error)| {
                    warn!(path = %key, error = %error, "Skipping file that could not be fingerprinted");
                    report.record_failure(key, error.clone());
                    RecordUpdate::Upsert(scan_failure_record(snapshot.get(key), key, error, now))
                })
                .collect();
            snapshot = self.store.merge(updates).await?;
        }

        self.ingest_pending(&changes, options, &mut snapshot, &mut report)
            .await?;

        if !changes.deleted.is_empty() {
            self.apply_deletion_policy(&changes.deleted, options.deletion_policy(), &mut report)
                .await?;
        }

        report.elapsed_secs = started.elapsed().as_secs_f64();
        info!(
            new = report.new,
            modified = report.modified,
            retried = report.retried,
            reingested = report.reingested,
            unchanged = report.unchanged,
            failed = report.failed,
            deleted = report.deleted.len(),
            purged = report.purged,
            batches = report.batches,
            cancelled = report.cancelled,
            elapsed_secs = report.elapsed_secs,
            "Ingestion run finished"
        );
        Ok(report)
    }

    /// Dispatch pending files batch by batch, checkpointing after each batch.
    /// A failed checkpoint aborts the run.
    async fn ingest_pending(
        &self,
        changes: &ChangeSet,
        options: &RunOptions,
        snapshot: &mut StateSnapshot,
        report: &mut RunReport,
    ) -> Result<()> {
        let mut scheduler = BatchScheduler::new(self.ingestor.clone(), self.cancel.clone());
        if let Some(progress) = &self.progress {
            scheduler = scheduler.with_progress(progress.clone());
        }

        let total_batches = changes.pending.len().div_ceil(options.batch_size());

        for (index, chunk) in changes.pending.chunks(options.batch_size()).enumerate() {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                warn!(
                    completed_batches = report.batches,
                    remaining_batches = total_batches - index,
                    "Run cancelled, remaining files stay pending"
                );
                break;
            }

            let job = BatchJob {
                members: chunk.to_vec(),
                concurrency: options.batch_size(),
                force_reingest: options.force_reingest(),
            };
            let outcomes = scheduler.run_batch(job).await;

            let now = Utc::now();
            let mut updates = Vec::with_capacity(outcomes.len());
            for (file, outcome) in outcomes {
                match outcome {
                    FileOutcome::Succeeded {
                        fingerprint,
                        size,
                        modified_at,
                        metadata,
                        duration,
                    } => {
                        match file.kind {
                            ChangeKind::New => report.new += 1,
                            ChangeKind::Modified => report.modified += 1,
                            ChangeKind::Retry => report.retried += 1,
                            ChangeKind::Unchanged => report.reingested += 1,
                        }
                        info!(
                            path = %file.key,
                            kind = %file.kind,
                            candidate = metadata.candidate_name.as_deref().unwrap_or("unknown"),
                            duration_ms = duration.as_millis() as u64,
                            "Ingested"
                        );
                        updates.push(RecordUpdate::Upsert(FileRecord::succeeded(
                            file.key.as_str(),
                            fingerprint,
                            size,
                            modified_at,
                            metadata,
                            now,
                        )));
                    }
                    FileOutcome::Failed { error } => {
                        warn!(path = %file.key, kind = %file.kind, error = %error, "Ingestion failed, file stays pending");
                        report.record_failure(&file.key, error.clone());
                        updates.push(RecordUpdate::Upsert(failed_record(
                            snapshot.get(&file.key),
                            &file.key,
                            file.size,
                            file.modified_at,
                            &error,
                            now,
                        )));
                    }
                    FileOutcome::Cancelled => {
                        report.cancelled = true;
                        if snapshot.get(&file.key).is_none() {
                            updates.push(RecordUpdate::Upsert(FileRecord::pending(
                                file.key.as_str(),
                                file.size,
                                file.modified_at,
                            )));
                        }
                    }
                }
            }

            report.batches += 1;
            if !updates.is_empty() {
                *snapshot = self.store.merge(updates).await.map_err(|e| {
                    warn!(batch = index + 1, error = %e, "Checkpoint failed, aborting run");
                    e
                })?;
            }
            info!(batch = index + 1, of = total_batches, records = snapshot.len(), "Checkpoint written");
        }

        Ok(())
    }

    async fn apply_deletion_policy(
        &self,
        deleted: &[String],
        policy: DeletionPolicy,
        report: &mut RunReport,
    ) -> Result<()> {
        report.deleted = deleted.to_vec();

        if policy == DeletionPolicy::Keep || report.cancelled {
            warn!(
                count = deleted.len(),
                policy = %policy,
                "Tracked files are missing from the source directory, keeping their records"
            );
            return Ok(());
        }

        let mut updates = Vec::new();
        for path in deleted {
            match self.ingestor.forget(path).await {
                Ok(()) => {
                    info!(path = %path, "Purged deleted file");
                    report.purged += 1;
                    updates.push(RecordUpdate::Remove(path.clone()));
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "Failed to purge deleted file, keeping its record");
                    report.record_failure(path, format!("failed to purge: {:#}", e));
                }
            }
        }

        if !updates.is_empty() {
            self.store.merge(updates).await?;
        }
        Ok(())
    }

    /// List the directory and fingerprint every supported file. Files that
    /// cannot be read are returned as failures, not errors.
    async fn observe(&self, directory: &Path, parallelism: usize) -> Result<DirectoryScan> {
        let listing = self.scanner.scan(directory).await?;

        let fingerprints: Vec<_> = stream::iter(listing.files.iter().cloned())
            .map(|path| async move {
                let result = fingerprint_file(&path).await;
                (path, result)
            })
            .buffered(parallelism.max(1))
            .collect()
            .await;

        let mut observations = Vec::with_capacity(fingerprints.len());
        let mut failures: Vec<(String, String)> = listing
            .skipped
            .iter()
            .map(|(path, reason)| (state_key(path), reason.clone()))
            .collect();

        for (path, result) in fingerprints {
            let key = state_key(&path);
            match result {
                Ok(observed) => observations.push(Observation {
                    key,
                    path,
                    fingerprint: observed.fingerprint,
                    size: observed.size,
                    modified_at: observed.modified_at,
                }),
                Err(e) => failures.push((key, format!("failed to fingerprint file: {}", e))),
            }
        }

        Ok(DirectoryScan {
            listing,
            observations,
            failures,
        })
    }
}

struct DirectoryScan {
    listing: ScanListing,
    observations: Vec<Observation>,
    failures: Vec<(String, String)>,
}

/// Files that could not be fingerprinted never reached the service, so a
/// record with a past success keeps its status and only notes the error.
fn scan_failure_record(
    existing: Option<&FileRecord>,
    key: &str,
    error: &str,
    at: DateTime<Utc>,
) -> FileRecord {
    match existing {
        Some(record) if record.has_succeeded_before() => record.with_attempt_error(error, at),
        _ => failed_record(existing, key, 0, None, error, at),
    }
}

/// Drop candidates that still exist on disk. A tracked file can fall out of
/// the listing because the scanner's filters changed, which is not a deletion.
async fn retain_missing_files(candidates: &mut Vec<String>) {
    let mut missing = Vec::with_capacity(candidates.len());
    for path in candidates.drain(..) {
        match tokio::fs::try_exists(&path).await {
            Ok(false) => missing.push(path),
            Ok(true) => debug!(path = %path, "Tracked file is outside the current scan, not deleted"),
            Err(e) => warn!(path = %path, error = %e, "Cannot tell whether tracked file exists, keeping it"),
        }
    }
    *candidates = missing;
}

fn failed_record(
    existing: Option<&FileRecord>,
    key: &str,
    size: u64,
    modified_at: Option<DateTime<Utc>>,
    error: &str,
    at: DateTime<Utc>,
) -> FileRecord {
    match existing {
        Some(record) => record.with_failure(error, at),
        None => FileRecord::pending(key, size, modified_at).with_failure(error, at),
    }
}

impl From<&RunReport> for std::process::ExitCode {
    fn from(report: &RunReport) -> Self {
        if report.is_success() {
            std::process::ExitCode::SUCCESS
        } else {
            std::process::ExitCode::from(1)
        }
    }
}

/// Exit code for a run that could not complete
pub fn exit_code_for_error(err: &IngestError) -> std::process::ExitCode {
    if err.is_state_error() || err.is_config_error() {
        std::process::ExitCode::from(2)
    } else {
        std::process::ExitCode::from(1)
    }
}
