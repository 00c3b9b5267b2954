//! Persistence for the ingestion state.
//!
//! The on-disk form is a pretty-printed JSON document keyed by canonical file
//! path. Writes go to a temporary file in the same directory which is then
//! renamed over the previous state, so readers only ever observe a complete
//! document. `merge` always re-reads the persisted document before applying
//! updates, which keeps records written by earlier batches (or an earlier
//! process) that this process never saw in memory.

use ats_common::{IngestError, RecordUpdate, Result, StateSnapshot, STATE_VERSION};
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the persisted snapshot. A store with nothing persisted yields an
    /// empty snapshot; an unreadable one is a `CorruptState` error.
    async fn load(&self) -> Result<StateSnapshot>;

    /// Replace the persisted snapshot in one step.
    async fn save(&self, snapshot: &StateSnapshot) -> Result<()>;

    /// Re-load the persisted snapshot, apply `updates` on top of it, persist
    /// the result and return it.
    async fn merge(&self, updates: Vec<RecordUpdate>) -> Result<StateSnapshot>;

    /// Human-readable location, for log lines
    fn location(&self) -> String;
}

/// JSON file backed state store
pub struct JsonStateStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load_unlocked(&self) -> Result<StateSnapshot> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => decode_snapshot(&self.path, &bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No persisted state, starting empty");
                Ok(StateSnapshot::new())
            }
            Err(e) => Err(IngestError::StateIo {
                path: self.path.clone(),
                source: e,
            }),
        }
    }

    async fn save_unlocked(&self, snapshot: &StateSnapshot) -> Result<()> {
        let bytes = encode_snapshot(snapshot)?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await?
            .map_err(|e| IngestError::StateIo {
                path: self.path.clone(),
                source: e,
            })?;

        debug!(path = %self.path.display(), records = snapshot.len(), "State saved");
        Ok(())
    }
}

#[async_trait]
impl StateStore for JsonStateStore {
    async fn load(&self) -> Result<StateSnapshot> {
        self.load_unlocked().await
    }

    async fn save(&self, snapshot: &StateSnapshot) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.save_unlocked(snapshot).await
    }

    #[instrument(skip(self, updates), fields(updates = updates.len()))]
    async fn merge(&self, updates: Vec<RecordUpdate>) -> Result<StateSnapshot> {
        let _guard = self.write_lock.lock().await;

        let mut snapshot = self.load_unlocked().await?;
        snapshot.apply_all(updates);
        self.save_unlocked(&snapshot).await?;
        Ok(snapshot)
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-process state store, used for dry runs and tests
#[derive(Default)]
pub struct MemoryStateStore {
    snapshot: Mutex<StateSnapshot>,
    writes: AtomicUsize,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: StateSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of completed `save`/`merge` calls
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<StateSnapshot> {
        Ok(self.snapshot.lock().await.clone())
    }

    async fn save(&self, snapshot: &StateSnapshot) -> Result<()> {
        *self.snapshot.lock().await = snapshot.clone();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn merge(&self, updates: Vec<RecordUpdate>) -> Result<StateSnapshot> {
        let mut snapshot = self.snapshot.lock().await;
        snapshot.apply_all(updates);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(snapshot.clone())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

fn decode_snapshot(path: &Path, bytes: &[u8]) -> Result<StateSnapshot> {
    let corrupt = |reason: String| IngestError::CorruptState {
        path: path.to_path_buf(),
        reason,
    };

    let snapshot: StateSnapshot =
        serde_json::from_slice(bytes).map_err(|e| corrupt(e.to_string()))?;

    if snapshot.version != STATE_VERSION {
        return Err(corrupt(format!(
            "unsupported state version {} (expected {})",
            snapshot.version, STATE_VERSION
        )));
    }

    if let Some((key, record)) = snapshot.files.iter().find(|(key, record)| **key != record.path) {
        return Err(corrupt(format!(
            "entry '{}' carries mismatched path '{}'",
            key, record.path
        )));
    }

    Ok(snapshot)
}

fn encode_snapshot(snapshot: &StateSnapshot) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(snapshot)?;
    bytes.push(b'\n');
    Ok(bytes)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());

    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{}.", file_name))
        .suffix(".tmp")
        .tempfile_in(&parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
