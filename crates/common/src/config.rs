use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{IngestError, Result};
use crate::types::DeletionPolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub force_reingest: bool,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_true")]
    pub recursive: bool,
    #[serde(default)]
    pub include_hidden: bool,
    pub max_file_size: Option<u64>,
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
    #[serde(default = "default_true")]
    pub use_lock: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Console,
    Json,
}

fn default_source_dir() -> PathBuf {
    PathBuf::from("data/resumes")
}

fn default_batch_size() -> usize {
    5
}

fn default_extensions() -> Vec<String> {
    ["pdf", "docx", "txt", "text"]
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

fn default_true() -> bool {
    true
}

fn default_state_path() -> PathBuf {
    PathBuf::from("data/ingestion_state.json")
}

fn default_service_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            source_dir: default_source_dir(),
            batch_size: default_batch_size(),
            force_reingest: false,
            extensions: default_extensions(),
            recursive: true,
            include_hidden: false,
            max_file_size: None,
            deletion_policy: DeletionPolicy::Keep,
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
            use_lock: true,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_service_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Console,
        }
    }
}

impl AppConfig {
    /// Load and validate a TOML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            IngestError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)
            .map_err(|e| IngestError::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_batch_size(self.ingestion.batch_size)?;

        if self.ingestion.extensions.is_empty() {
            return Err(IngestError::Config(
                "ingestion.extensions must list at least one file extension".to_string(),
            ));
        }
        if let Some(bad) = self
            .ingestion
            .extensions
            .iter()
            .find(|ext| ext.is_empty() || ext.starts_with('.'))
        {
            return Err(IngestError::Config(format!(
                "ingestion.extensions entry '{}' must be a bare extension like \"pdf\"",
                bad
            )));
        }
        if self.ingestion.max_file_size == Some(0) {
            return Err(IngestError::Config(
                "ingestion.max_file_size must be greater than 0".to_string(),
            ));
        }
        if self.state.path.as_os_str().is_empty() {
            return Err(IngestError::Config("state.path must not be empty".to_string()));
        }
        if !(self.service.base_url.starts_with("http://") || self.service.base_url.starts_with("https://")) {
            return Err(IngestError::Config(format!(
                "service.base_url '{}' must be an http(s) URL",
                self.service.base_url
            )));
        }
        if self.service.timeout_secs == 0 {
            return Err(IngestError::Config(
                "service.timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn validate_batch_size(batch_size: usize) -> Result<()> {
    if batch_size == 0 {
        return Err(IngestError::Config(
            "batch_size must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Validated parameters for a single ingestion run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    directory: PathBuf,
    force_reingest: bool,
    batch_size: usize,
    deletion_policy: DeletionPolicy,
}

impl RunOptions {
    /// Checks the directory and batch size up front so a bad invocation
    /// fails before any state is loaded or written.
    pub fn new(directory: impl Into<PathBuf>, force_reingest: bool, batch_size: usize) -> Result<Self> {
        let directory = directory.into();
        validate_batch_size(batch_size)?;

        if !directory.is_dir() {
            return Err(IngestError::InvalidDirectory { path: directory });
        }

        Ok(Self {
            directory,
            force_reingest,
            batch_size,
            deletion_policy: DeletionPolicy::Keep,
        })
    }

    pub fn from_config(config: &IngestionConfig) -> Result<Self> {
        Ok(Self::new(config.source_dir.clone(), config.force_reingest, config.batch_size)?
            .with_deletion_policy(config.deletion_policy))
    }

    pub fn with_deletion_policy(mut self, policy: DeletionPolicy) -> Self {
        self.deletion_policy = policy;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn force_reingest(&self) -> bool {
        self.force_reingest
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn deletion_policy(&self) -> DeletionPolicy {
        self.deletion_policy
    }
}
