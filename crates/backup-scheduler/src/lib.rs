//! Embedded scheduler for resident backup-keeper processes.
//!
//! Instead of relying on an external cron, `backup-daemon serve` stays
//! resident and triggers a backup pass on a cron cadence.
//!
//! # Features
//!
//! - Cron expressions (5, 6 or 7 fields) evaluated in an IANA timezone
//! - Injected [`Clock`](backup_types::Clock) so tests drive time
//! - Graceful shutdown via `CancellationToken`; a running pass completes
//! - State observable through a `tokio::sync::watch` channel
//!
//! # Example
//!
//! ```ignore
//! use backup_scheduler::Scheduler;
//!
//! let scheduler = Scheduler::new(&config, Arc::new(SystemClock), cancel.clone())?;
//! scheduler.run(|| async { orchestrator.run(&[]).await; }).await;
//! ```

mod error;
mod schedule;
mod scheduler;

pub use error::SchedulerError;
pub use schedule::{parse_timezone, validate_cron_expression, CronSchedule};
pub use scheduler::{PassOutcome, Scheduler, SchedulerState};
