use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid source directory: {}", path.display())]
    InvalidDirectory { path: PathBuf },

    #[error(
        "Ingestion state at {} is corrupt ({reason}). Refusing to overwrite it: inspect the file or restore it from a backup before running again",
        path.display()
    )]
    CorruptState { path: PathBuf, reason: String },

    #[error("State store I/O error at {}: {source}", path.display())]
    StateIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "Another ingestion run holds the lock at {}. If no run is active, remove the lock file manually",
        path.display()
    )]
    StateLocked { path: PathBuf },

    #[error("Ingestion error: {0}")]
    Ingestion(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl IngestError {
    /// Errors that abort a run before or while touching persisted state.
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            Self::CorruptState { .. } | Self::StateIo { .. } | Self::StateLocked { .. }
        )
    }

    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config(_) | Self::InvalidDirectory { .. })
    }
}

/// Convert anyhow errors coming back from collaborators
impl From<anyhow::Error> for IngestError {
    fn from(err: anyhow::Error) -> Self {
        IngestError::Ingestion(format!("{:#}", err))
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
