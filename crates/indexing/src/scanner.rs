use ats_common::{IngestError, IngestionConfig, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Files found under a source directory
#[derive(Debug, Clone, Default)]
pub struct ScanListing {
    /// Canonical form of the scanned directory
    pub root: PathBuf,
    /// Supported files, sorted
    pub files: Vec<PathBuf>,
    /// Supported files that exist but were left out, with the reason
    pub skipped: Vec<(PathBuf, String)>,
}

/// Enumerates resume files with a supported extension
#[derive(Debug, Clone)]
pub struct DirectoryScanner {
    extensions: Vec<String>,
    recursive: bool,
    include_hidden: bool,
    max_file_size: Option<u64>,
}

impl DirectoryScanner {
    pub fn new(extensions: &[&str]) -> Self {
        Self {
            extensions: extensions.iter().map(|e| e.to_ascii_lowercase()).collect(),
            recursive: true,
            include_hidden: false,
            max_file_size: None,
        }
    }

    pub fn from_config(config: &IngestionConfig) -> Self {
        Self {
            extensions: config
                .extensions
                .iter()
                .map(|e| e.to_ascii_lowercase())
                .collect(),
            recursive: config.recursive,
            include_hidden: config.include_hidden,
            max_file_size: config.max_file_size,
        }
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn include_hidden(mut self, include_hidden: bool) -> Self {
        self.include_hidden = include_hidden;
        self
    }

    pub fn max_file_size(mut self, max_file_size: Option<u64>) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    pub fn is_supported(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.contains(&ext.to_ascii_lowercase()))
            .unwrap_or(false)
    }

    /// Walk `root` on the blocking pool
    pub async fn scan(&self, root: &Path) -> Result<ScanListing> {
        let scanner = self.clone();
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || scanner.scan_blocking(&root)).await?
    }

    pub fn scan_blocking(&self, root: &Path) -> Result<ScanListing> {
        if !root.is_dir() {
            return Err(IngestError::InvalidDirectory {
                path: root.to_path_buf(),
            });
        }
        let root = root.canonicalize()?;

        let mut walker = WalkDir::new(&root).follow_links(false);
        if !self.recursive {
            walker = walker.max_depth(1);
        }

        let include_hidden = self.include_hidden;
        let mut listing = ScanListing {
            root: root.clone(),
            ..Default::default()
        };

        let entries = walker
            .into_iter()
            .filter_entry(|entry| include_hidden || entry.depth() == 0 || !is_hidden(entry));

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable directory entry");
                    continue;
                }
            };

            if !entry.file_type().is_file() || !self.is_supported(entry.path()) {
                continue;
            }

            if let Some(limit) = self.max_file_size {
                match entry.metadata() {
                    Ok(meta) if meta.len() > limit => {
                        listing.skipped.push((
                            entry.path().to_path_buf(),
                            format!("file is {} bytes, above the {} byte limit", meta.len(), limit),
                        ));
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        listing
                            .skipped
                            .push((entry.path().to_path_buf(), format!("cannot stat file: {}", e)));
                        continue;
                    }
                }
            }

            listing.files.push(entry.into_path());
        }

        listing.files.sort();
        listing.skipped.sort();
        debug!(
            root = %listing.root.display(),
            files = listing.files.len(),
            skipped = listing.skipped.len(),
            "Directory scanned"
        );
        Ok(listing)
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

/// Key under which a file is tracked in the state
pub fn state_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
