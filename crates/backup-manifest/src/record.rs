//! The serialized manifest document.

use std::collections::BTreeMap;

use backup_types::{ArtifactDescriptor, ErrorKind, JobOutcome, JobRun, RetentionSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::ManifestError;

/// Schema version written by this build.
pub const SCHEMA_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

/// One job within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEntry {
    pub name: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub attempts: u32,
    pub artifact_count: usize,
    pub bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactDescriptor>,
    #[serde(default)]
    pub item_counts: BTreeMap<String, u64>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention: Option<RetentionSummary>,
}

impl From<JobRun> for JobEntry {
    fn from(run: JobRun) -> Self {
        let duration_ms = run.duration_ms();
        let (status, error, artifacts) = match run.outcome {
            JobOutcome::Success { artifacts } => (JobStatus::Success, None, Some(artifacts)),
            JobOutcome::Failure {
                kind,
                message,
                partial,
            } => (JobStatus::Failed, Some(JobError { kind, message }), partial),
        };
        let artifacts = artifacts.unwrap_or_default();

        Self {
            name: run.job_name,
            status,
            started_at: run.started_at,
            finished_at: run.finished_at,
            duration_ms,
            attempts: run.attempts,
            artifact_count: artifacts.artifacts.len(),
            bytes: artifacts.total_bytes(),
            error,
            artifacts: artifacts.artifacts,
            item_counts: artifacts.item_counts,
            warnings: artifacts.warnings,
            retention: run.retention,
        }
    }
}

/// Aggregate counts for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestTotals {
    pub jobs: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub artifacts: usize,
    pub bytes: u64,
}

/// Versioned record of one run. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRecord {
    pub schema_version: String,
    pub run_id: Ulid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Wall clock of the whole run, not the sum of job durations
    pub duration_ms: u64,
    pub totals: ManifestTotals,
    /// Jobs in dispatch order
    pub jobs: Vec<JobEntry>,
}

impl ManifestRecord {
    pub fn is_success(&self) -> bool {
        self.totals.failed == 0
    }

    pub fn job(&self, name: &str) -> Option<&JobEntry> {
        self.jobs.iter().find(|j| j.name == name)
    }

    pub fn to_json_pretty(&self) -> Result<String, ManifestError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a manifest, checking schema compatibility first.
    ///
    /// # Errors
    ///
    /// Returns `ManifestError::IncompatibleSchema` for a different major
    /// version and `ManifestError::InvalidVersion` for a malformed one.
    pub fn from_json(json: &str) -> Result<Self, ManifestError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let version = value
            .get("schema_version")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ManifestError::InvalidVersion("missing schema_version".to_string()))?;
        check_schema_compat(version)?;
        Ok(serde_json::from_value(value)?)
    }
}

fn parse_version(version: &str) -> Result<(u64, u64, u64), ManifestError> {
    let parts: Vec<&str> = version.split('.').collect();
    if parts.len() != 3 {
        return Err(ManifestError::InvalidVersion(version.to_string()));
    }
    let mut numbers = [0u64; 3];
    for (slot, part) in numbers.iter_mut().zip(&parts) {
        *slot = part
            .parse()
            .map_err(|_| ManifestError::InvalidVersion(version.to_string()))?;
    }
    Ok((numbers[0], numbers[1], numbers[2]))
}

/// Accept any version sharing this build's major version.
pub fn check_schema_compat(version: &str) -> Result<(), ManifestError> {
    let (major, _, _) = parse_version(version)?;
    let (supported_major, _, _) = parse_version(SCHEMA_VERSION)?;
    if major != supported_major {
        return Err(ManifestError::IncompatibleSchema {
            found: version.to_string(),
            supported: SCHEMA_VERSION.to_string(),
        });
    }
    Ok(())
}
