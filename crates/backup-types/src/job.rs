//! Job definitions and retention policies.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::BackupError;
use crate::secret::SecretRef;

/// Rule deciding which historical dated groups survive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Delete groups older than `days`.
    Age { days: u32 },
    /// Keep the newest `keep` groups.
    Count { keep: u32 },
    /// Keep a group if either the age rule or the count rule keeps it.
    Hybrid { days: u32, keep: u32 },
}

impl RetentionPolicy {
    /// Validate policy values.
    pub fn validate(&self) -> Result<(), String> {
        match *self {
            RetentionPolicy::Age { days } if days == 0 => {
                Err("retention days must be >= 1".to_string())
            }
            RetentionPolicy::Count { keep } if keep == 0 => {
                Err("retention keep must be >= 1".to_string())
            }
            RetentionPolicy::Hybrid { days, keep } if days == 0 || keep == 0 => {
                Err("hybrid retention needs days >= 1 and keep >= 1".to_string())
            }
            _ => Ok(()),
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        RetentionPolicy::Age { days: 30 }
    }
}

impl fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetentionPolicy::Age { days } => write!(f, "age({days}d)"),
            RetentionPolicy::Count { keep } => write!(f, "count({keep})"),
            RetentionPolicy::Hybrid { days, keep } => write!(f, "hybrid({days}d, {keep})"),
        }
    }
}

/// Immutable definition of one backup job.
///
/// Created from configuration at startup and shared read-only between the
/// orchestrator and the job engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Unique job name, also the storage namespace directory
    pub name: String,

    /// Connector type identifier (e.g., "directory")
    pub connector: String,

    /// Storage target identifier
    #[serde(default = "default_storage")]
    pub storage: String,

    /// Retention override; the process-wide default applies when absent
    #[serde(default)]
    pub retention: Option<RetentionPolicy>,

    /// Maximum duration of the execute phase in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Credentials reference resolved at run time
    #[serde(default)]
    pub credentials: Option<SecretRef>,

    /// Connector-specific options, validated by the connector
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

fn default_storage() -> String {
    "default".to_string()
}

impl JobSpec {
    /// Create a job spec with default storage and no options.
    pub fn new(name: impl Into<String>, connector: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connector: connector.into(),
            storage: default_storage(),
            retention: None,
            timeout_secs: None,
            credentials: None,
            options: serde_json::Map::new(),
        }
    }

    /// Set the storage target.
    pub fn with_storage(mut self, storage: impl Into<String>) -> Self {
        self.storage = storage.into();
        self
    }

    /// Set the retention override.
    pub fn with_retention(mut self, policy: RetentionPolicy) -> Self {
        self.retention = Some(policy);
        self
    }

    /// Set the execute timeout.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Add a connector option.
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Retention policy for this job, falling back to `default`.
    pub fn effective_retention(&self, default: &RetentionPolicy) -> RetentionPolicy {
        self.retention.unwrap_or(*default)
    }

    /// Validate the spec in isolation.
    ///
    /// The name doubles as a directory, so it must be a single safe path
    /// segment.
    pub fn validate(&self) -> Result<(), BackupError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(BackupError::Config("job name must not be empty".to_string()));
        }
        if name != self.name
            || name.starts_with('.')
            || name.contains(['/', '\\'])
            || name.chars().any(char::is_control)
        {
            return Err(BackupError::Config(format!(
                "job name '{}' is not a valid directory name",
                self.name
            )));
        }
        if self.connector.trim().is_empty() {
            return Err(BackupError::Config(format!(
                "job '{}' has no connector type",
                self.name
            )));
        }
        if let Some(policy) = &self.retention {
            policy
                .validate()
                .map_err(|e| BackupError::Config(format!("job '{}': {}", self.name, e)))?;
        }
        if self.timeout_secs == Some(0) {
            return Err(BackupError::Config(format!(
                "job '{}': timeout_secs must be > 0",
                self.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_retention_prefers_override() {
        let default = RetentionPolicy::Age { days: 30 };
        let job = JobSpec::new("docs", "directory");
        assert_eq!(job.effective_retention(&default), default);

        let job = job.with_retention(RetentionPolicy::Count { keep: 3 });
        assert_eq!(
            job.effective_retention(&default),
            RetentionPolicy::Count { keep: 3 }
        );
    }

    #[test]
    fn test_validate_rejects_bad_names() {
        for name in ["", " ", "a/b", "..", ".hidden", "back\\slash", " padded"] {
            let job = JobSpec::new(name, "directory");
            assert!(job.validate().is_err(), "expected '{}' to be rejected", name);
        }
        assert!(JobSpec::new("repo-mirror_1", "directory").validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_retention() {
        let job = JobSpec::new("docs", "directory").with_retention(RetentionPolicy::Count { keep: 0 });
        assert!(job.validate().is_err());

        let job = JobSpec::new("docs", "directory")
            .with_retention(RetentionPolicy::Hybrid { days: 7, keep: 0 });
        assert!(job.validate().is_err());
    }

    #[test]
    fn test_retention_policy_serialization() {
        let policy = RetentionPolicy::Hybrid { days: 14, keep: 5 };
        let json = serde_json::to_string(&policy).unwrap();
        assert_eq!(json, r#"{"kind":"hybrid","days":14,"keep":5}"#);
        let back: RetentionPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, policy);
    }

    #[test]
    fn test_job_spec_defaults_from_json() {
        let job: JobSpec = serde_json::from_str(
            r#"{"name":"docs","connector":"directory","options":{"path":"/srv/docs"}}"#,
        )
        .unwrap();
        assert_eq!(job.storage, "default");
        assert!(job.retention.is_none());
        assert_eq!(job.options["path"], "/srv/docs");
    }
}
