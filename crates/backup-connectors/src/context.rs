//! Per-job execution state handed to connectors.

use std::path::Path;
use std::sync::{Arc, Mutex};

use backup_storage::{StoragePort, WrittenDescriptor};
use backup_types::{ArtifactDescriptor, JobSpec};
use chrono::{DateTime, NaiveDate, Utc};
use secrecy::SecretString;
use tempfile::TempDir;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use ulid::Ulid;

use crate::error::ConnectorError;

/// Writes artifacts into the job's dated directory.
///
/// Every successful write is remembered so a failed job can still report
/// what reached storage.
#[derive(Clone)]
pub struct ArtifactSink {
    storage: Arc<dyn StoragePort>,
    job: String,
    date: NaiveDate,
    written: Arc<Mutex<Vec<ArtifactDescriptor>>>,
}

impl ArtifactSink {
    pub fn new(storage: Arc<dyn StoragePort>, job: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            storage,
            job: job.into(),
            date,
            written: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Stream `reader` to `relative_path` and describe the result.
    pub async fn write(
        &self,
        name: impl Into<String>,
        relative_path: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<ArtifactDescriptor, ConnectorError> {
        let WrittenDescriptor {
            path,
            bytes,
            checksum,
        } = self
            .storage
            .write(&self.job, self.date, relative_path, reader)
            .await?;

        let descriptor = ArtifactDescriptor {
            name: name.into(),
            bytes,
            checksum,
            path,
        };
        debug!(job = %self.job, path = %descriptor.path, bytes, "Artifact written");
        self.remember(descriptor.clone());
        Ok(descriptor)
    }

    fn remember(&self, descriptor: ArtifactDescriptor) {
        let mut written = match self.written.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // A retried attempt overwrites the same path
        match written.iter_mut().find(|d| d.path == descriptor.path) {
            Some(existing) => *existing = descriptor,
            None => written.push(descriptor),
        }
    }

    /// Artifacts written so far, in write order.
    pub fn written(&self) -> Vec<ArtifactDescriptor> {
        match self.written.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl std::fmt::Debug for ArtifactSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactSink")
            .field("storage", &self.storage.kind())
            .field("job", &self.job)
            .field("date", &self.date)
            .finish()
    }
}

/// State for one job in one run. Owned by the job engine.
///
/// The workspace directory is removed when the context is dropped.
#[derive(Debug)]
pub struct RunContext {
    pub spec: Arc<JobSpec>,
    pub run_id: Ulid,
    pub started_at: DateTime<Utc>,
    /// Shared by every job of the run
    pub run_date: NaiveDate,
    pub credentials: Option<SecretString>,
    pub cancel: CancellationToken,
    pub sink: ArtifactSink,
    workspace: TempDir,
}

impl RunContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        spec: Arc<JobSpec>,
        run_id: Ulid,
        started_at: DateTime<Utc>,
        run_date: NaiveDate,
        workspace: TempDir,
        credentials: Option<SecretString>,
        cancel: CancellationToken,
        sink: ArtifactSink,
    ) -> Self {
        Self {
            spec,
            run_id,
            started_at,
            run_date,
            credentials,
            cancel,
            sink,
            workspace,
        }
    }

    pub fn job_name(&self) -> &str {
        &self.spec.name
    }

    /// Scratch directory private to this job.
    pub fn workspace(&self) -> &Path {
        self.workspace.path()
    }

    /// Look up a string option.
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.spec.options.get(key).and_then(|v| v.as_str())
    }
}
