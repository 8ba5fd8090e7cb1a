//! Run manifests for backup-keeper.
//!
//! A [`RunRecorder`] accumulates job results for one run in dispatch
//! order and finalizes into an immutable [`ManifestRecord`], which is
//! written as `manifest.json` into each job's dated directory.
//!
//! # Schema versioning
//!
//! Additive fields bump the minor version, structural changes bump the
//! major version. Readers accept any document with the same major version
//! and ignore fields they do not know.

mod error;
mod record;
mod recorder;
mod writer;

pub use error::ManifestError;
pub use record::{
    check_schema_compat, JobEntry, JobError, JobStatus, ManifestRecord, ManifestTotals,
    SCHEMA_VERSION,
};
pub use recorder::RunRecorder;
pub use writer::{write_manifest, MANIFEST_FILE_NAME};
