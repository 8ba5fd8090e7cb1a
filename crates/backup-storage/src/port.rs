//! Storage port definition.

use std::fmt;

use async_trait::async_trait;
use backup_types::DATE_FORMAT;
use chrono::NaiveDate;
use tokio::io::AsyncRead;

use crate::error::StorageError;

/// One dated directory under a job's namespace.
///
/// `date` is `None` when the directory name is not a canonical
/// `YYYY-MM-DD` date; such groups are never deleted by retention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatedGroup {
    pub name: String,
    pub date: Option<NaiveDate>,
}

impl DatedGroup {
    /// Build a group from a directory name, parsing the date strictly.
    pub fn from_name(name: impl Into<String>) -> Self {
        let name = name.into();
        let date = NaiveDate::parse_from_str(&name, DATE_FORMAT)
            .ok()
            .filter(|d| d.format(DATE_FORMAT).to_string() == name);
        Self { name, date }
    }

    pub fn for_date(date: NaiveDate) -> Self {
        Self {
            name: date.format(DATE_FORMAT).to_string(),
            date: Some(date),
        }
    }
}

/// Result of a completed artifact write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenDescriptor {
    /// Path relative to the job's dated directory
    pub path: String,
    pub bytes: u64,
    /// `sha256:<hex>` of the written content
    pub checksum: String,
}

/// Held for the duration of a job run; releases the lock on drop.
pub struct RunLock {
    _guard: Option<Box<dyn Send + Sync>>,
}

impl RunLock {
    pub fn new(guard: impl Send + Sync + 'static) -> Self {
        Self {
            _guard: Some(Box::new(guard)),
        }
    }

    /// A lock for adapters that provide no mutual exclusion.
    pub fn noop() -> Self {
        Self { _guard: None }
    }
}

impl fmt::Debug for RunLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunLock")
            .field("held", &self._guard.is_some())
            .finish()
    }
}

/// Interface every storage adapter implements.
///
/// Writes are streamed: adapters must not buffer a whole artifact in memory.
#[async_trait]
pub trait StoragePort: Send + Sync {
    /// Adapter type identifier (e.g., "filesystem").
    fn kind(&self) -> &str;

    /// Stream `reader` into `<job>/<date>/<relative_path>`.
    ///
    /// An existing artifact at the same path is replaced.
    async fn write(
        &self,
        job: &str,
        date: NaiveDate,
        relative_path: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<WrittenDescriptor, StorageError>;

    /// Dated groups for a job, sorted by name. Unknown jobs yield an empty list.
    async fn list(&self, job: &str) -> Result<Vec<DatedGroup>, StorageError>;

    /// Delete one dated group. Deleting a missing group succeeds.
    async fn delete(&self, job: &str, date: NaiveDate) -> Result<(), StorageError>;

    /// Take the job's exclusive run lock without waiting.
    ///
    /// Returns `StorageError::Locked` if another run holds it.
    async fn acquire_lock(&self, _job: &str) -> Result<RunLock, StorageError> {
        Ok(RunLock::noop())
    }
}

/// Check that a relative artifact path stays inside the dated directory.
pub fn validate_relative_path(path: &str) -> Result<(), StorageError> {
    if path.is_empty() || path.starts_with('/') || path.starts_with('\\') {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    for component in path.split(['/', '\\']) {
        if component.is_empty() || component == "." || component == ".." {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
    }
    Ok(())
}
