//! Backup Daemon
//!
//! Declarative backup orchestrator: runs configured jobs, enforces
//! retention, and records a manifest for every run.
//!
//! # Usage
//!
//! ```bash
//! backup-daemon run [--job NAME]... [--parallelism N]
//! backup-daemon serve
//! backup-daemon list-jobs
//! backup-daemon retention [--job NAME]...
//! backup-daemon validate
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/backup-keeper/config.toml)
//! 3. Environment variables (BACKUP__*)
//! 4. CLI flags
//!
//! # Exit codes
//!
//! 0 when every job succeeded, 1 when any job failed, 2 when the
//! configuration is invalid.

use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use backup_daemon::{
    list_jobs, retention_dry_run, run_once, serve, spawn_shutdown_listener, validate, Cli,
    Commands, ConfigArgs,
};
use backup_engine::ExitStatus;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let args = ConfigArgs::new(cli.config.clone(), cli.log_level.clone());
    let cancel = CancellationToken::new();

    let result = match cli.command {
        Commands::Run { jobs, parallelism } => {
            spawn_shutdown_listener(cancel.clone());
            run_once(&args.with_parallelism(parallelism), &jobs, cancel).await
        }
        Commands::Serve { jobs, parallelism } => {
            spawn_shutdown_listener(cancel.clone());
            serve(&args.with_parallelism(parallelism), &jobs, cancel).await
        }
        Commands::ListJobs => list_jobs(&args),
        Commands::Retention { jobs } => retention_dry_run(&args, &jobs).await,
        Commands::Validate => validate(&args),
    };

    match result {
        Ok(status) => ExitCode::from(status.code()),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(ExitStatus::ConfigurationError.code())
        }
    }
}
