//! Error types for connector operations.

use backup_storage::StorageError;
use thiserror::Error;

/// Errors a connector reports to the job engine.
///
/// The variant decides retry behavior: only `Retryable` is retried.
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// Options or credentials are invalid for this connector.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Transient failure (network blip, rate limit).
    #[error("Retryable error: {0}")]
    Retryable(String),

    /// Failure that will not go away by trying again.
    #[error("Fatal error: {0}")]
    Fatal(String),

    /// Writing an artifact failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Local I/O failure while reading source data.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No connector registered for the type.
    #[error("Unknown connector type: {0}")]
    UnknownType(String),
}

impl ConnectorError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ConnectorError::Retryable(_))
    }
}
