//! Configuration loading for backup-keeper.
//!
//! Layered config: defaults -> default config file -> `--config` file ->
//! env vars (`BACKUP__*`) -> CLI flags (applied by the caller).
//! TOML and YAML files are both accepted, chosen by extension.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::BackupError;
use crate::job::{JobSpec, RetentionPolicy};

/// A storage target. Only `filesystem` is built in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Adapter type identifier
    #[serde(rename = "type")]
    pub kind: String,

    /// Root directory for the filesystem adapter (`~` is expanded)
    pub base_path: String,
}

impl StorageConfig {
    pub fn filesystem(base_path: impl Into<String>) -> Self {
        Self {
            kind: "filesystem".to_string(),
            base_path: base_path.into(),
        }
    }

    /// Base path with `~` and `$VARS` expanded.
    pub fn expanded_base_path(&self) -> PathBuf {
        match shellexpand::full(&self.base_path) {
            Ok(expanded) => PathBuf::from(expanded.as_ref()),
            Err(_) => PathBuf::from(&self.base_path),
        }
    }
}

/// Exponential backoff settings for retryable connector failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// First retry delay in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for any single delay in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Total execute attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_delay_ms() -> u64 {
    2_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_max_attempts() -> u32 {
    5
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry.max_attempts must be >= 1".to_string());
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(format!(
                "retry.max_delay_ms ({}) must be >= retry.base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            ));
        }
        Ok(())
    }
}

/// Embedded scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Cron expression (5, 6 or 7 fields)
    pub cron: String,

    /// IANA timezone the expression is evaluated in. Defaults to "UTC".
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Run one pass immediately before waiting for the first fire.
    #[serde(default = "default_true")]
    pub run_on_startup: bool,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_true() -> bool {
    true
}

impl SchedulerConfig {
    pub fn new(cron: impl Into<String>) -> Self {
        Self {
            cron: cron.into(),
            timezone: default_timezone(),
            run_on_startup: true,
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Maximum number of jobs running at once
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Retention applied to jobs without their own policy
    #[serde(default)]
    pub default_retention: RetentionPolicy,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Present when the process should stay resident
    #[serde(default)]
    pub scheduler: Option<SchedulerConfig>,

    /// Storage targets by name
    #[serde(default)]
    pub storage: BTreeMap<String, StorageConfig>,

    /// Jobs in declaration order
    #[serde(default)]
    pub jobs: Vec<JobSpec>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_parallelism() -> usize {
    1
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            parallelism: default_parallelism(),
            default_retention: RetentionPolicy::default(),
            retry: RetryConfig::default(),
            scheduler: None,
            storage: BTreeMap::new(),
            jobs: Vec::new(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Default config file (~/.config/backup-keeper/config.{toml,yaml})
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (BACKUP__*)
    ///
    /// CLI flags should be applied by the caller after this returns.
    /// The result is not validated; call [`Settings::validate`].
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, BackupError> {
        let config_dir = ProjectDirs::from("", "", "backup-keeper")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("log_level", default_log_level())?
            .set_default("parallelism", default_parallelism() as i64)?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // BACKUP__LOG_LEVEL, BACKUP__PARALLELISM, BACKUP__RETRY__MAX_ATTEMPTS, ...
        builder = builder.add_source(
            Environment::with_prefix("BACKUP")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Validate the whole configuration.
    ///
    /// Any error here is a configuration error: nothing may run.
    pub fn validate(&self) -> Result<(), BackupError> {
        if self.jobs.is_empty() {
            return Err(BackupError::Config(
                "at least one job must be configured".to_string(),
            ));
        }
        if self.storage.is_empty() {
            return Err(BackupError::Config(
                "at least one storage target must be configured".to_string(),
            ));
        }
        if self.parallelism == 0 {
            return Err(BackupError::Config("parallelism must be >= 1".to_string()));
        }
        self.retry.validate().map_err(BackupError::Config)?;
        self.default_retention
            .validate()
            .map_err(|e| BackupError::Config(format!("default_retention: {}", e)))?;

        for (name, storage) in &self.storage {
            if storage.base_path.trim().is_empty() {
                return Err(BackupError::Config(format!(
                    "storage '{}' has an empty base_path",
                    name
                )));
            }
        }

        let mut seen = HashSet::new();
        for job in &self.jobs {
            job.validate()?;
            if !seen.insert(job.name.as_str()) {
                return Err(BackupError::Config(format!(
                    "duplicate job name '{}'",
                    job.name
                )));
            }
            if !self.storage.contains_key(&job.storage) {
                return Err(BackupError::Config(format!(
                    "job '{}' references unknown storage '{}'",
                    job.name, job.storage
                )));
            }
        }

        // Cron and timezone syntax are checked by backup-scheduler.
        if let Some(scheduler) = &self.scheduler {
            if scheduler.cron.trim().is_empty() {
                return Err(BackupError::Config(
                    "scheduler.cron must not be empty".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Job names in declaration order.
    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.name.as_str()).collect()
    }
}
