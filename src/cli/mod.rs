//! CLI interface and argument parsing
//!
//! This module provides the command-line interface for shrsync using clap.

pub mod commands;

use clap::{Parser, Subcommand};

/// shrsync - Shared Health Record synchronization client
#[derive(Parser, Debug)]
#[command(name = "shrsync")]
#[command(version, about, long_about = None)]
#[command(author = "shrsync Contributors")]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "shrsync.toml", env = "SHRSYNC_CONFIG")]
    pub config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "SHRSYNC_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the patient and encounter feeds
    Sync(commands::sync::SyncArgs),

    /// Validate configuration file
    ValidateConfig(commands::validate::ValidateArgs),

    /// Show feed markers, failed events and mapping counts
    Status(commands::status::StatusArgs),

    /// Initialize a new configuration file
    Init(commands::init::InitArgs),
}
