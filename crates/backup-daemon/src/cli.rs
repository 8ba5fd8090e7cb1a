//! CLI argument parsing for backup-daemon.
//!
//! CLI flags override every other configuration source.

use clap::{Parser, Subcommand};

/// Declarative backup orchestrator
///
/// Runs configured backup jobs once, or stays resident and runs them on a
/// cron schedule.
#[derive(Parser, Debug)]
#[command(name = "backup-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/backup-keeper/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Daemon commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run jobs once and exit (0 = all succeeded, 1 = failures, 2 = bad configuration)
    Run {
        /// Only run this job (repeatable; default: all jobs)
        #[arg(short, long = "job")]
        jobs: Vec<String>,

        /// Maximum number of jobs running at once
        #[arg(short, long)]
        parallelism: Option<usize>,
    },

    /// Stay resident and run jobs on the configured cron schedule
    Serve {
        /// Only run this job (repeatable; default: all jobs)
        #[arg(short, long = "job")]
        jobs: Vec<String>,

        /// Maximum number of jobs running at once
        #[arg(short, long)]
        parallelism: Option<usize>,
    },

    /// List configured jobs
    ListJobs,

    /// Show what retention would delete, without deleting anything
    Retention {
        /// Only plan for this job (repeatable; default: all jobs)
        #[arg(short, long = "job")]
        jobs: Vec<String>,
    },

    /// Validate configuration and exit
    Validate,
}
