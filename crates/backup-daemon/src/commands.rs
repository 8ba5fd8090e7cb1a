//! Command implementations for backup-daemon.
//!
//! Handles:
//! - run: load config, run selected jobs once, report exit status
//! - serve: run on the configured cron schedule until SIGINT/SIGTERM
//! - list-jobs, retention (dry run), validate

use std::sync::Arc;

use anyhow::{Context, Result};
use backup_connectors::ConnectorRegistry;
use backup_engine::{ExitStatus, Orchestrator};
use backup_scheduler::{CronSchedule, PassOutcome, Scheduler};
use backup_storage::StorageRegistry;
use backup_types::{Settings, SystemClock};
use tokio::signal;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Configuration inputs shared by every command.
#[derive(Debug, Clone, Default)]
pub struct ConfigArgs {
    pub config_path: Option<String>,
    pub log_level: Option<String>,
    pub parallelism: Option<usize>,
}

impl ConfigArgs {
    pub fn new(config_path: Option<String>, log_level: Option<String>) -> Self {
        Self {
            config_path,
            log_level,
            parallelism: None,
        }
    }

    pub fn with_parallelism(mut self, parallelism: Option<usize>) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Load settings, apply CLI overrides, and validate.
    ///
    /// A `scheduler` section must parse even for commands that never
    /// schedule anything.
    pub fn load(&self) -> Result<Settings> {
        let mut settings =
            Settings::load(self.config_path.as_deref()).context("Failed to load configuration")?;

        // CLI overrides (highest precedence)
        if let Some(log_level) = &self.log_level {
            settings.log_level = log_level.clone();
        }
        if let Some(parallelism) = self.parallelism {
            settings.parallelism = parallelism;
        }

        settings.validate().context("Invalid configuration")?;
        if let Some(scheduler) = &settings.scheduler {
            CronSchedule::parse(&scheduler.cron, &scheduler.timezone)
                .context("Invalid scheduler configuration")?;
        }
        Ok(settings)
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level. Calling this more than once
/// is harmless.
pub fn init_logging(log_level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .try_init();
}

/// Build the orchestrator with the built-in connectors and configured storage.
pub fn build_orchestrator(settings: Settings, cancel: CancellationToken) -> Result<Orchestrator> {
    let storage =
        StorageRegistry::from_config(&settings.storage).context("Failed to open storage")?;
    let orchestrator = Orchestrator::new(settings, ConnectorRegistry::with_builtins(), storage)
        .context("Invalid configuration")?;
    Ok(orchestrator.with_cancellation(cancel))
}

/// Cancel `cancel` on Ctrl+C or SIGTERM.
pub fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, finishing running jobs...");
            }
            _ = terminate => {
                info!("Received SIGTERM, finishing running jobs...");
            }
            _ = cancel.cancelled() => return,
        }
        cancel.cancel();
    });
}

/// Run the selected jobs once.
pub async fn run_once(
    args: &ConfigArgs,
    jobs: &[String],
    cancel: CancellationToken,
) -> Result<ExitStatus> {
    let settings = args.load()?;
    init_logging(&settings.log_level);

    let orchestrator = build_orchestrator(settings, cancel)?;
    let report = orchestrator.run(jobs).await;
    if let Some(manifest) = &report.manifest {
        println!(
            "Run {}: {} succeeded, {} failed, {} artifacts, {} bytes",
            manifest.run_id,
            manifest.totals.succeeded,
            manifest.totals.failed,
            manifest.totals.artifacts,
            manifest.totals.bytes
        );
    }
    Ok(report.exit)
}

/// Reload configuration for the next scheduled pass.
///
/// Returns the orchestrator to run and what the scheduler does afterwards:
/// follow the reloaded cron expression, or stop when the `scheduler`
/// section is gone. Fails if the reloaded configuration is invalid or no
/// longer contains the selected jobs.
pub fn reload_serving_config(
    args: &ConfigArgs,
    jobs: &[String],
    cancel: CancellationToken,
) -> Result<(Orchestrator, PassOutcome)> {
    let settings = args.load()?;
    let next = match &settings.scheduler {
        Some(scheduler) => PassOutcome::Reschedule(
            CronSchedule::parse(&scheduler.cron, &scheduler.timezone)
                .context("Invalid scheduler configuration")?,
        ),
        None => PassOutcome::Stop,
    };
    let orchestrator = build_orchestrator(settings, cancel)?;
    orchestrator
        .select_jobs(jobs)
        .context("Invalid job selection")?;
    Ok((orchestrator, next))
}

/// Stay resident and run jobs on the cron schedule.
///
/// Configuration is reloaded before every pass, scheduler section
/// included. If the reload fails, the previous configuration is used.
pub async fn serve(
    args: &ConfigArgs,
    jobs: &[String],
    cancel: CancellationToken,
) -> Result<ExitStatus> {
    let settings = args.load()?;
    init_logging(&settings.log_level);

    let scheduler_config = settings
        .scheduler
        .clone()
        .context("serve requires a 'scheduler' section with a cron expression")?;
    let scheduler = Scheduler::new(&scheduler_config, Arc::new(SystemClock), cancel.clone())
        .context("Invalid scheduler configuration")?;

    let orchestrator = build_orchestrator(settings, cancel.clone())?;
    orchestrator
        .select_jobs(jobs)
        .context("Invalid job selection")?;
    let current = Arc::new(Mutex::new(Arc::new(orchestrator)));

    info!(
        cron = %scheduler.schedule().expression(),
        timezone = %scheduler.schedule().timezone().name(),
        "Backup daemon serving"
    );

    scheduler
        .run(|| {
            let current = Arc::clone(&current);
            let cancel = cancel.clone();
            async move {
                let (orchestrator, next) = {
                    let mut current = current.lock().await;
                    let next = match reload_serving_config(args, jobs, cancel) {
                        Ok((reloaded, next)) => {
                            *current = Arc::new(reloaded);
                            next
                        }
                        Err(e) => {
                            warn!(error = %format!("{:#}", e), "Config reload failed, keeping previous configuration");
                            PassOutcome::Continue
                        }
                    };
                    (Arc::clone(&current), next)
                };

                let report = orchestrator.run(jobs).await;
                if report.exit != ExitStatus::Success {
                    error!(exit_code = report.exit.code(), "Scheduled pass finished with failures");
                }
                if matches!(next, PassOutcome::Stop) {
                    info!("Scheduler section removed from configuration, leaving serve loop");
                }
                next
            }
        })
        .await;

    Ok(ExitStatus::Success)
}

/// Print configured jobs in declaration order.
pub fn list_jobs(args: &ConfigArgs) -> Result<ExitStatus> {
    let settings = args.load()?;
    init_logging(&settings.log_level);

    for job in &settings.jobs {
        let retention = job.effective_retention(&settings.default_retention);
        println!(
            "{}\tconnector={}\tstorage={}\tretention={}",
            job.name, job.connector, job.storage, retention
        );
    }
    Ok(ExitStatus::Success)
}

/// Print retention decisions without deleting anything.
pub async fn retention_dry_run(args: &ConfigArgs, jobs: &[String]) -> Result<ExitStatus> {
    let settings = args.load()?;
    init_logging(&settings.log_level);

    let orchestrator = build_orchestrator(settings, CancellationToken::new())?;
    let decisions = orchestrator
        .plan_retention(jobs)
        .await
        .context("Failed to plan retention")?;

    for decision in decisions {
        println!("{} ({})", decision.job_name, decision.policy);
        for date in &decision.keep {
            println!("  keep    {}", date);
        }
        for date in &decision.delete {
            println!("  delete  {}", date);
        }
        for name in &decision.skipped {
            println!("  skip    {} (not a date)", name);
        }
    }
    Ok(ExitStatus::Success)
}

/// Check configuration: settings, storage, connectors and schedule.
pub fn validate(args: &ConfigArgs) -> Result<ExitStatus> {
    let settings = args.load()?;
    init_logging(&settings.log_level);

    let jobs = settings.jobs.len();
    build_orchestrator(settings, CancellationToken::new())?;

    println!("Configuration OK: {} job(s)", jobs);
    Ok(ExitStatus::Success)
}
