//! Bounded-concurrency dispatch of one batch to the ingestion service.
//!
//! Every file runs in its own task behind a semaphore, so a failing or
//! panicking ingestion never takes its siblings down. Outcomes come back in
//! submission order whatever order the tasks finish in. Nothing here touches
//! the persisted state.

use ats_common::{Fingerprint, IngestMetadata};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::detector::PendingFile;
use crate::fingerprint::read_with_fingerprint;
use crate::ingestor::{IngestRequest, Ingestor};

/// Called once per file as soon as its outcome is known
pub type ProgressFn = Arc<dyn Fn(&Path, &FileOutcome) + Send + Sync>;

/// Files dispatched together, never persisted
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub members: Vec<PendingFile>,
    pub concurrency: usize,
    pub force_reingest: bool,
}

#[derive(Debug, Clone)]
pub enum FileOutcome {
    Succeeded {
        /// Digest of the exact bytes that were ingested
        fingerprint: Fingerprint,
        size: u64,
        modified_at: Option<DateTime<Utc>>,
        metadata: IngestMetadata,
        duration: Duration,
    },
    Failed {
        error: String,
    },
    /// The run was cancelled before the outcome was known
    Cancelled,
}

impl FileOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

pub struct BatchScheduler {
    ingestor: Arc<dyn Ingestor>,
    cancel: CancellationToken,
    progress: Option<ProgressFn>,
}

impl BatchScheduler {
    pub fn new(ingestor: Arc<dyn Ingestor>, cancel: CancellationToken) -> Self {
        Self {
            ingestor,
            cancel,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Run every member of `job` with at most `job.concurrency` ingestion
    /// calls in flight and return `(file, outcome)` in submission order.
    #[instrument(skip(self, job), fields(files = job.members.len(), concurrency = job.concurrency))]
    pub async fn run_batch(&self, job: BatchJob) -> Vec<(PendingFile, FileOutcome)> {
        let semaphore = Arc::new(Semaphore::new(job.concurrency.max(1)));
        let mut handles = Vec::with_capacity(job.members.len());

        for member in job.members {
            let semaphore = semaphore.clone();
            let ingestor = self.ingestor.clone();
            let cancel = self.cancel.clone();
            let progress = self.progress.clone();
            let path = member.path.clone();
            let force = job.force_reingest;

            let handle = tokio::spawn(async move {
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => FileOutcome::Cancelled,
                    outcome = async {
                        let Ok(_permit) = semaphore.acquire_owned().await else {
                            return FileOutcome::Cancelled;
                        };
                        ingest_one(ingestor.as_ref(), &path, force).await
                    } => outcome,
                };

                if let Some(progress) = &progress {
                    progress(path.as_path(), &outcome);
                }
                outcome
            });
            handles.push((member, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (member, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_panic() => {
                    warn!(path = %member.path.display(), "Ingestion task panicked");
                    FileOutcome::Failed {
                        error: "ingestion task panicked".to_string(),
                    }
                }
                Err(_) => FileOutcome::Cancelled,
            };
            results.push((member, outcome));
        }
        results
    }
}

async fn ingest_one(ingestor: &dyn Ingestor, path: &Path, force: bool) -> FileOutcome {
    let started = Instant::now();

    let content = match read_with_fingerprint(path).await {
        Ok(content) => content,
        Err(e) => {
            return FileOutcome::Failed {
                error: format!("failed to read file: {}", e),
            }
        }
    };
    let fingerprint = content.fingerprint.clone();
    let size = content.size();
    let modified_at = content.modified_at;

    debug!(path = %path.display(), fingerprint = fingerprint.short(), size, "Submitting to ingestion service");

    let request = IngestRequest {
        path: path.to_path_buf(),
        content: content.bytes,
        force,
    };

    match ingestor.ingest(request).await {
        Ok(metadata) => FileOutcome::Succeeded {
            fingerprint,
            size,
            modified_at,
            metadata,
            duration: started.elapsed(),
        },
        Err(e) => FileOutcome::Failed {
            error: format!("{:#}", e),
        },
    }
}
