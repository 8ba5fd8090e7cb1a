//! Job execution for backup-keeper.
//!
//! - [`JobEngine`] runs one job: lock, prepare, execute with retry and
//!   timeout, cleanup, retention.
//! - [`Orchestrator`] selects jobs, runs them under a parallelism bound,
//!   and writes the run manifest.
//! - [`RetrySchedule`] is the backoff state machine used between attempts.

pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod retry;

pub use engine::{JobEngine, RunInfo};
pub use error::EngineError;
pub use orchestrator::{ExitStatus, Orchestrator, RunReport};
pub use retry::RetrySchedule;
