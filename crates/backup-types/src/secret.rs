//! Credential references.
//!
//! Secrets never live in the config file itself: a job points at an
//! environment variable or a file, resolved when the job runs.

use std::path::PathBuf;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::BackupError;

/// Reference to a secret stored in an environment variable or a file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRef {
    /// Environment variable name (checked first)
    #[serde(default)]
    pub env: Option<String>,

    /// File containing the secret (checked second, trimmed)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl SecretRef {
    pub fn from_env(var: impl Into<String>) -> Self {
        Self {
            env: Some(var.into()),
            file: None,
        }
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            env: None,
            file: Some(path.into()),
        }
    }

    /// Resolve the secret.
    ///
    /// # Errors
    ///
    /// Returns `BackupError::Secret` if neither source yields a non-empty value.
    pub fn resolve(&self) -> Result<SecretString, BackupError> {
        if let Some(var) = &self.env {
            if let Ok(value) = std::env::var(var) {
                if !value.is_empty() {
                    return Ok(SecretString::from(value));
                }
            }
        }

        if let Some(path) = &self.file {
            if let Ok(contents) = std::fs::read_to_string(path) {
                let trimmed = contents.trim();
                if !trimmed.is_empty() {
                    return Ok(SecretString::from(trimmed.to_string()));
                }
            }
        }

        Err(BackupError::Secret(self.describe()))
    }

    fn describe(&self) -> String {
        match (&self.env, &self.file) {
            (Some(var), Some(path)) => format!("env {} or file {}", var, path.display()),
            (Some(var), None) => format!("env {}", var),
            (None, Some(path)) => format!("file {}", path.display()),
            (None, None) => "no source configured".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_resolve_from_file_trims() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "s3cret\n").unwrap();

        let secret = SecretRef::from_file(&path).resolve().unwrap();
        assert_eq!(secret.expose_secret(), "s3cret");
    }

    #[test]
    fn test_resolve_env_falls_back_to_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "from-file").unwrap();

        let secret_ref = SecretRef {
            env: Some("BACKUP_KEEPER_TEST_UNSET_VAR_7f3a".to_string()),
            file: Some(path),
        };
        let secret = secret_ref.resolve().unwrap();
        assert_eq!(secret.expose_secret(), "from-file");
    }

    #[test]
    fn test_resolve_missing_is_error() {
        let secret_ref = SecretRef::from_file("/nonexistent/backup-keeper/token");
        let err = secret_ref.resolve().unwrap_err();
        assert!(err.to_string().contains("Secret unavailable"));

        let err = SecretRef::default().resolve().unwrap_err();
        assert!(err.to_string().contains("no source configured"));
    }
}
