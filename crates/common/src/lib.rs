//! Shared types, configuration and error handling for the resume ingestion tracker

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::*;
pub use error::{IngestError, Result};
pub use logging::init_logging;
pub use types::*;
