//! Accumulates job results while a run is in progress.

use backup_types::JobRun;
use chrono::{DateTime, Utc};
use tracing::debug;
use ulid::Ulid;

use crate::error::ManifestError;
use crate::record::{JobEntry, ManifestRecord, ManifestTotals, SCHEMA_VERSION};

/// Collects one [`JobRun`] per dispatched job.
///
/// Jobs may finish in any order; the finalized record lists them in
/// dispatch order.
#[derive(Debug)]
pub struct RunRecorder {
    run_id: Ulid,
    started_at: DateTime<Utc>,
    slots: Vec<(String, Option<JobRun>)>,
}

impl RunRecorder {
    pub fn new(run_id: Ulid, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            slots: Vec::new(),
        }
    }

    pub fn run_id(&self) -> Ulid {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Reserve a slot for a job and return its dispatch index.
    pub fn dispatch(&mut self, job_name: impl Into<String>) -> usize {
        let job_name = job_name.into();
        debug!(run_id = %self.run_id, job = %job_name, index = self.slots.len(), "Job dispatched");
        self.slots.push((job_name, None));
        self.slots.len() - 1
    }

    /// Record the terminal result of a dispatched job.
    pub fn record_job(&mut self, run: JobRun) -> Result<(), ManifestError> {
        let known = self.slots.iter().any(|(name, _)| *name == run.job_name);
        let slot = self
            .slots
            .iter_mut()
            .find(|(name, recorded)| *name == run.job_name && recorded.is_none());

        match slot {
            Some((_, recorded)) => {
                *recorded = Some(run);
                Ok(())
            }
            None if known => {
                Err(ManifestError::AlreadyRecorded(run.job_name))
            }
            None => Err(ManifestError::UnknownJob(run.job_name)),
        }
    }

    /// Names of dispatched jobs still without an outcome.
    pub fn pending(&self) -> Vec<&str> {
        self.slots
            .iter()
            .filter(|(_, recorded)| recorded.is_none())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Produce the immutable record for this run.
    ///
    /// # Errors
    ///
    /// Returns `ManifestError::Incomplete` if any dispatched job has no
    /// recorded outcome.
    pub fn finalize(self, finished_at: DateTime<Utc>) -> Result<ManifestRecord, ManifestError> {
        let pending: Vec<String> = self.pending().into_iter().map(String::from).collect();
        if !pending.is_empty() {
            return Err(ManifestError::Incomplete(pending));
        }

        let jobs: Vec<JobEntry> = self
            .slots
            .into_iter()
            .filter_map(|(_, run)| run)
            .map(JobEntry::from)
            .collect();

        let succeeded = jobs
            .iter()
            .filter(|j| j.status == crate::JobStatus::Success)
            .count();
        let totals = ManifestTotals {
            jobs: jobs.len(),
            succeeded,
            failed: jobs.len() - succeeded,
            artifacts: jobs.iter().map(|j| j.artifact_count).sum(),
            bytes: jobs.iter().map(|j| j.bytes).sum(),
        };

        Ok(ManifestRecord {
            schema_version: SCHEMA_VERSION.to_string(),
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at,
            duration_ms: (finished_at - self.started_at).num_milliseconds().max(0) as u64,
            totals,
            jobs,
        })
    }
}
