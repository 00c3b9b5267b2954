#![allow(dead_code)]

use ats_common::{IngestError, IngestMetadata, RecordUpdate, Result, StateSnapshot};
use ats_indexing::{state_key, DirectoryScanner, IngestRequest, IngestionCoordinator, Ingestor};
use ats_storage::{JsonStateStore, StateStore};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub const EXTENSIONS: &[&str] = &["pdf", "docx", "txt", "text"];

/// Create a directory of resumes, one file per `(name, content)` pair
pub fn resume_dir(files: &[(&str, &str)]) -> TempDir {
    let temp = TempDir::new().unwrap();
    for (name, content) in files {
        write_file(temp.path(), name, content);
    }
    temp
}

pub fn write_file(root: &Path, name: &str, content: &str) {
    let path = root.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

/// Key the coordinator tracks `name` under
pub fn key_for(root: &Path, name: &str) -> String {
    state_key(&root.canonicalize().unwrap().join(name))
}

pub fn coordinator(store: Arc<dyn StateStore>, ingestor: Arc<MockIngestor>) -> IngestionCoordinator {
    IngestionCoordinator::new(store, ingestor, DirectoryScanner::new(EXTENSIONS))
}

pub fn json_store(dir: &TempDir) -> Arc<JsonStateStore> {
    Arc::new(JsonStateStore::new(dir.path().join("ingestion_state.json")))
}

/// Ingestion service double that records every call
#[derive(Default)]
pub struct MockIngestor {
    calls: Mutex<Vec<String>>,
    forgotten: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    panicking: HashSet<String>,
    delays: HashMap<String, Duration>,
    default_delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    cancel_on_call: Option<(usize, CancellationToken)>,
}

impl MockIngestor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(self, file_name: &str) -> Self {
        self.failing.lock().unwrap().insert(file_name.to_string());
        self
    }

    pub fn panicking_on(mut self, file_name: &str) -> Self {
        self.panicking.insert(file_name.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    pub fn with_delay_for(mut self, file_name: &str, delay: Duration) -> Self {
        self.delays.insert(file_name.to_string(), delay);
        self
    }

    /// Cancel `token` when the `n`th ingestion call starts
    pub fn cancelling_after(mut self, n: usize, token: CancellationToken) -> Self {
        self.cancel_on_call = Some((n, token));
        self
    }

    pub fn heal(&self, file_name: &str) {
        self.failing.lock().unwrap().remove(file_name);
    }

    /// File names in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, file_name: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|name| name.as_str() == file_name)
            .count()
    }

    pub fn forgotten(&self) -> Vec<String> {
        self.forgotten.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Ingestor for MockIngestor {
    async fn ingest(&self, request: IngestRequest) -> anyhow::Result<IngestMetadata> {
        let name = request.file_name();
        let call_number = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(name.clone());
            calls.len()
        };
        if let Some((n, token)) = &self.cancel_on_call {
            if call_number >= *n {
                token.cancel();
            }
        }

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let delay = self.delays.get(&name).copied().unwrap_or(self.default_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.panicking.contains(&name) {
            panic!("ingestor blew up on {}", name);
        }
        if self.failing.lock().unwrap().contains(&name) {
            anyhow::bail!("extraction failed for {}", name);
        }

        let candidate = name.split('.').next().unwrap_or_default().to_string();
        Ok(IngestMetadata {
            candidate_name: Some(candidate),
            document_id: Some(format!("doc-{}", call_number)),
        })
    }

    async fn forget(&self, path: &str) -> anyhow::Result<()> {
        self.forgotten.lock().unwrap().push(path.to_string());
        Ok(())
    }
}

/// Store that lets a fixed number of merges through, then fails like a
/// full disk would
pub struct FlakyStore {
    inner: Arc<dyn StateStore>,
    merges_left: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn StateStore>, successful_merges: usize) -> Self {
        Self {
            inner,
            merges_left: AtomicUsize::new(successful_merges),
        }
    }
}

#[async_trait]
impl StateStore for FlakyStore {
    async fn load(&self) -> Result<StateSnapshot> {
        self.inner.load().await
    }

    async fn save(&self, snapshot: &StateSnapshot) -> Result<()> {
        self.inner.save(snapshot).await
    }

    async fn merge(&self, updates: Vec<RecordUpdate>) -> Result<StateSnapshot> {
        let allowed = self
            .merges_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if !allowed {
            return Err(IngestError::StateIo {
                path: PathBuf::from(self.inner.location()),
                source: std::io::Error::other("no space left on device"),
            });
        }
        self.inner.merge(updates).await
    }

    fn location(&self) -> String {
        self.inner.location()
    }
}
