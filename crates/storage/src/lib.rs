pub mod lock;
pub mod state_store;

pub use lock::RunLock;
pub use state_store::{JsonStateStore, MemoryStateStore, StateStore};

use ats_common::StateConfig;

/// Open the configured state store
pub fn open_state_store(config: &StateConfig) -> JsonStateStore {
    tracing::info!("Using ingestion state at {}", config.path.display());
    JsonStateStore::new(&config.path)
}
