pub mod coordinator;
pub mod detector;
pub mod fingerprint;
pub mod ingestor;
pub mod scanner;
pub mod scheduler;

pub use coordinator::{exit_code_for_error, FailureReport, IngestionCoordinator, RunReport};
pub use detector::{ChangeDetector, ChangeKind, ChangeSet, Observation, PendingFile};
pub use fingerprint::{fingerprint_bytes, fingerprint_file, read_with_fingerprint, FileContent, FileFingerprint};
pub use ingestor::{HttpIngestor, IngestRequest, Ingestor};
pub use scanner::{state_key, DirectoryScanner, ScanListing};
pub use scheduler::{BatchJob, BatchScheduler, FileOutcome, ProgressFn};
