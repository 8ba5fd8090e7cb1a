//! Job outcomes as seen by the orchestrator and the manifest.
//!
//! Connector-internal errors never cross this boundary unwrapped: the job
//! engine classifies every failure into an [`ErrorKind`] plus a message.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::artifact::ArtifactResult;
use crate::job::RetentionPolicy;

/// Classification of a job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad options, missing credentials, prepare failed
    Configuration,
    /// Transient connector failure that exhausted the retry budget
    ConnectorRetryable,
    /// Connector failure that must not be retried
    ConnectorFatal,
    /// Storage write/delete failure
    Io,
    /// Job exceeded its maximum duration
    Timeout,
    /// Shutdown requested before the job could finish
    Cancelled,
    /// Another invocation holds the job's namespace
    Conflict,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::ConnectorRetryable => "connector_retryable",
            ErrorKind::ConnectorFatal => "connector_fatal",
            ErrorKind::Io => "io",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Conflict => "conflict",
        };
        f.write_str(s)
    }
}

/// Terminal result of one job execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Success {
        artifacts: ArtifactResult,
    },
    Failure {
        kind: ErrorKind,
        message: String,
        /// Whatever was written before the failure
        #[serde(default)]
        partial: Option<ArtifactResult>,
    },
}

impl JobOutcome {
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        JobOutcome::Failure {
            kind,
            message: message.into(),
            partial: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success { .. })
    }

    /// Artifacts produced, complete or partial.
    pub fn artifacts(&self) -> Option<&ArtifactResult> {
        match self {
            JobOutcome::Success { artifacts } => Some(artifacts),
            JobOutcome::Failure { partial, .. } => partial.as_ref(),
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            JobOutcome::Success { .. } => None,
            JobOutcome::Failure { kind, .. } => Some(*kind),
        }
    }
}

/// What retention did for a job after a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionSummary {
    pub policy: RetentionPolicy,
    #[serde(default)]
    pub kept: Vec<NaiveDate>,
    #[serde(default)]
    pub deleted: Vec<NaiveDate>,
    /// Group names that did not parse as dates
    #[serde(default)]
    pub skipped: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// One job's terminal record within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRun {
    pub job_name: String,
    pub outcome: JobOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Execute attempts made (0 when the connector never ran)
    pub attempts: u32,
    pub retention: Option<RetentionSummary>,
}

impl JobRun {
    /// A run that failed before the connector was involved.
    pub fn failed_before_start(
        job_name: impl Into<String>,
        kind: ErrorKind,
        message: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            outcome: JobOutcome::failure(kind, message),
            started_at: at,
            finished_at: at,
            attempts: 0,
            retention: None,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_display_matches_serde() {
        for kind in [
            ErrorKind::Configuration,
            ErrorKind::ConnectorRetryable,
            ErrorKind::ConnectorFatal,
            ErrorKind::Io,
            ErrorKind::Timeout,
            ErrorKind::Cancelled,
            ErrorKind::Conflict,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind));
        }
    }

    #[test]
    fn test_outcome_accessors() {
        let ok = JobOutcome::Success {
            artifacts: ArtifactResult::new(),
        };
        assert!(ok.is_success());
        assert!(ok.artifacts().is_some());
        assert_eq!(ok.error_kind(), None);

        let failed = JobOutcome::failure(ErrorKind::Timeout, "too slow");
        assert!(!failed.is_success());
        assert!(failed.artifacts().is_none());
        assert_eq!(failed.error_kind(), Some(ErrorKind::Timeout));
    }

    #[test]
    fn test_failed_before_start_has_zero_duration() {
        let now = Utc::now();
        let run = JobRun::failed_before_start("docs", ErrorKind::Conflict, "locked", now);
        assert_eq!(run.duration_ms(), 0);
        assert_eq!(run.attempts, 0);
        assert!(!run.is_success());
    }
}
