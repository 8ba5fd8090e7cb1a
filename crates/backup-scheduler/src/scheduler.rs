//! Resident scheduler loop.
//!
//! ```text
//! Idle -> Armed -> [Running] -> Waiting(next) -> Running -> Waiting(next) ... -> Stopped
//! ```
//!
//! A pass that is `Running` is never interrupted. Cancellation while
//! `Waiting` goes straight to `Stopped`. Fires missed while a pass was
//! running are not replayed. A pass may hand back a new schedule, or stop
//! the loop, through [`PassOutcome`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use backup_types::{Clock, SchedulerConfig};
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::SchedulerError;
use crate::schedule::CronSchedule;

/// Observable scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Armed,
    Running,
    Waiting { next_fire: DateTime<Utc> },
    Stopped,
}

/// What the loop does after a pass.
#[derive(Debug, Clone)]
pub enum PassOutcome {
    /// Keep the current schedule
    Continue,
    /// Compute later fires from this schedule
    Reschedule(CronSchedule),
    /// Leave the loop
    Stop,
}

impl From<()> for PassOutcome {
    fn from(_: ()) -> Self {
        PassOutcome::Continue
    }
}

/// Cron-driven loop that invokes a pass until cancelled.
pub struct Scheduler {
    schedule: CronSchedule,
    run_on_startup: bool,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    state: watch::Sender<SchedulerState>,
}

impl Scheduler {
    /// Build a scheduler from configuration.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidCron` or
    /// `SchedulerError::InvalidTimezone` if the configuration is invalid.
    pub fn new(
        config: &SchedulerConfig,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
    ) -> Result<Self, SchedulerError> {
        let schedule = CronSchedule::parse(&config.cron, &config.timezone)?;
        let (state, _) = watch::channel(SchedulerState::Idle);
        Ok(Self {
            schedule,
            run_on_startup: config.run_on_startup,
            clock,
            cancel,
            state,
        })
    }

    /// Schedule the scheduler was built with.
    pub fn schedule(&self) -> &CronSchedule {
        &self.schedule
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Receiver that sees every state change.
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Token that stops the scheduler.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn set_state(&self, state: SchedulerState) {
        self.state.send_replace(state);
    }

    /// Drive the loop until cancelled, stopped by a pass, or the schedule
    /// is exhausted.
    ///
    /// Returns the number of passes run.
    pub async fn run<F, Fut, O>(&self, mut pass: F) -> u64
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = O>,
        O: Into<PassOutcome>,
    {
        let mut schedule = self.schedule.clone();
        let mut passes = 0u64;
        self.set_state(SchedulerState::Armed);
        info!(
            cron = %schedule.expression(),
            timezone = %schedule.timezone().name(),
            run_on_startup = self.run_on_startup,
            "Scheduler armed"
        );

        let mut stopped = false;
        if self.run_on_startup && !self.cancel.is_cancelled() {
            self.set_state(SchedulerState::Running);
            info!("Running startup pass");
            let outcome = pass().await.into();
            passes += 1;
            stopped = !apply_outcome(&mut schedule, outcome);
        }

        while !stopped {
            if self.cancel.is_cancelled() {
                break;
            }

            let now = self.clock.now();
            let Some(next_fire) = schedule.next_fire(now) else {
                warn!(cron = %schedule.expression(), "Cron expression has no future occurrence, stopping");
                break;
            };
            self.set_state(SchedulerState::Waiting { next_fire });

            let delay = (next_fire - now).to_std().unwrap_or(Duration::ZERO);
            info!(next_fire = %next_fire, wait_secs = delay.as_secs(), "Waiting for next fire");

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            self.set_state(SchedulerState::Running);
            info!(fire = %next_fire, "Scheduled pass started");
            let outcome = pass().await.into();
            passes += 1;
            stopped = !apply_outcome(&mut schedule, outcome);
        }

        self.set_state(SchedulerState::Stopped);
        info!(passes, "Scheduler stopped");
        passes
    }
}

/// Apply a pass outcome; false means leave the loop.
fn apply_outcome(schedule: &mut CronSchedule, outcome: PassOutcome) -> bool {
    match outcome {
        PassOutcome::Continue => true,
        PassOutcome::Reschedule(next) => {
            if next.expression() != schedule.expression() || next.timezone() != schedule.timezone() {
                info!(
                    from = %schedule.expression(),
                    to = %next.expression(),
                    timezone = %next.timezone().name(),
                    "Schedule changed"
                );
            }
            *schedule = next;
            true
        }
        PassOutcome::Stop => {
            info!("Pass requested scheduler stop");
            false
        }
    }
}
