//! Manifest error types.

use backup_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Document written by an incompatible major version
    #[error("Incompatible manifest schema {found} (supported: {supported})")]
    IncompatibleSchema { found: String, supported: String },

    #[error("Invalid schema version: {0}")]
    InvalidVersion(String),

    /// Finalize called before every dispatched job finished
    #[error("Run incomplete, jobs without outcome: {}", .0.join(", "))]
    Incomplete(Vec<String>),

    #[error("Job was not dispatched in this run: {0}")]
    UnknownJob(String),

    #[error("Job already recorded: {0}")]
    AlreadyRecorded(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
