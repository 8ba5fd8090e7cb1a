//! # backup-types
//!
//! Shared domain types for backup-keeper.
//!
//! This crate defines the data structures every other crate agrees on:
//! - Job specifications and retention policies
//! - Artifact descriptors produced by connectors
//! - Job outcomes as seen by the orchestrator and the manifest
//! - Settings: layered configuration loading and validation
//!
//! ## Usage
//!
//! ```rust
//! use backup_types::{RetentionPolicy, Settings};
//!
//! let settings = Settings::default();
//! assert_eq!(settings.default_retention, RetentionPolicy::Age { days: 30 });
//! ```

pub mod artifact;
pub mod clock;
pub mod config;
pub mod error;
pub mod job;
pub mod outcome;
pub mod secret;

pub use artifact::{ArtifactDescriptor, ArtifactResult};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{RetryConfig, SchedulerConfig, Settings, StorageConfig};
pub use error::BackupError;
pub use job::{JobSpec, RetentionPolicy};
pub use outcome::{ErrorKind, JobOutcome, JobRun, RetentionSummary};
pub use secret::SecretRef;

/// Date format used for dated group directory names.
pub const DATE_FORMAT: &str = "%Y-%m-%d";
