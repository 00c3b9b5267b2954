//! Lock file held for the duration of an ingestion run.
//!
//! Two runs over the same state file would interleave their checkpoints, so a
//! run takes `<state file>.lock` with an exclusive create before it loads any
//! state. A lock left behind by a crashed process is never broken
//! automatically; the operator removes it.

use ats_common::{IngestError, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn lock_path_for(state_path: &Path) -> PathBuf {
        let mut name = state_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "ingestion_state".into());
        name.push(".lock");
        state_path.with_file_name(name)
    }

    /// Take the lock that guards `state_path`
    pub fn acquire(state_path: &Path) -> Result<Self> {
        Self::acquire_with(state_path, |file| {
            writeln!(
                file,
                "pid={} acquired_at={}",
                std::process::id(),
                chrono::Utc::now().to_rfc3339()
            )
        })
    }

    fn acquire_with(
        state_path: &Path,
        record_holder: impl FnOnce(&mut File) -> std::io::Result<()>,
    ) -> Result<Self> {
        let path = Self::lock_path_for(state_path);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(IngestError::StateLocked { path });
            }
            Err(e) => return Err(IngestError::StateIo { path, source: e }),
        };

        // From here on the file is ours; dropping `lock` removes it.
        let lock = Self { path };
        record_holder(&mut file).map_err(|e| IngestError::StateIo {
            path: lock.path.clone(),
            source: e,
        })?;

        debug!(path = %lock.path.display(), "Run lock acquired");
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Run lock released"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove run lock"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_file_is_removed_when_holder_cannot_be_recorded() {
        let temp = TempDir::new().unwrap();
        let state = temp.path().join("state.json");

        let result = RunLock::acquire_with(&state, |_| Err(std::io::Error::other("disk full")));
        assert!(matches!(result, Err(IngestError::StateIo { .. })));
        assert!(!RunLock::lock_path_for(&state).exists());

        let lock = RunLock::acquire(&state).unwrap();
        assert!(std::fs::read_to_string(lock.path()).unwrap().starts_with("pid="));
    }
}
