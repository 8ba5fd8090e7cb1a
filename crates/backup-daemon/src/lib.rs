//! Backup daemon library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (run, serve, list-jobs, retention, validate)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands};
pub use commands::{
    build_orchestrator, init_logging, list_jobs, reload_serving_config, retention_dry_run,
    run_once, serve, spawn_shutdown_listener, validate, ConfigArgs,
};
