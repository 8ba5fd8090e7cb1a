//! Engine error types.
//!
//! Job failures never surface here: they become `JobOutcome::Failure`.
//! These errors stop a run before any job is dispatched.

use backup_connectors::ConnectorError;
use backup_manifest::ManifestError;
use backup_storage::StorageError;
use backup_types::BackupError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),
}

impl From<BackupError> for EngineError {
    fn from(err: BackupError) -> Self {
        EngineError::Configuration(err.to_string())
    }
}

impl EngineError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, EngineError::Configuration(_))
    }
}
