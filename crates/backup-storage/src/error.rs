//! Storage layer error types.

use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// Filesystem or transport failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Relative path escapes the job namespace or is malformed
    #[error("Invalid artifact path: {0}")]
    InvalidPath(String),

    /// Storage `type` not known to the registry
    #[error("Unsupported storage type '{kind}' for storage '{name}'")]
    UnsupportedType { name: String, kind: String },

    /// Storage name not registered
    #[error("Storage not found: {0}")]
    NotFound(String),

    /// Another invocation holds the job's lock
    #[error("Job '{0}' is locked by another run")]
    Locked(String),
}
