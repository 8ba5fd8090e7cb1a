//! Storage layer for backup-keeper.
//!
//! Artifacts live under a per-job, per-date namespace:
//!
//! ```text
//! <storage_base>/<job_name>/<YYYY-MM-DD>/...artifacts..., manifest.json
//! ```
//!
//! [`StoragePort`] is the interface the core consumes. [`FilesystemStorage`]
//! is the built-in adapter; others (object storage, NFS) plug in through
//! [`StorageRegistry::insert`].

mod error;
mod filesystem;
mod port;
mod registry;

pub use error::StorageError;
pub use filesystem::FilesystemStorage;
pub use port::{validate_relative_path, DatedGroup, RunLock, StoragePort, WrittenDescriptor};
pub use registry::StorageRegistry;
