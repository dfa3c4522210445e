//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// tsvc - exercise the taskservice dispatch runtime
#[derive(Parser)]
#[command(
    name = "tsvc",
    about = "Drive named task servers: queues, worker pools and scheduled jobs",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Push messages through an echo server and report throughput
    Bench {
        /// Number of messages to send
        #[arg(short, long, default_value = "10000")]
        messages: u64,

        /// Queue capacity (defaults to the configured capacity)
        #[arg(long)]
        capacity: Option<usize>,

        /// Keep only the latest queued message
        #[arg(long)]
        coalesce: bool,

        /// Wait for each reply instead of fire-and-forget
        #[arg(long)]
        sync: bool,
    },

    /// Run a scheduled job for a while and report how often it fired
    Jobs {
        /// Interval between invocations in milliseconds
        #[arg(short, long, default_value = "20")]
        interval_ms: u64,

        /// Observation window in milliseconds
        #[arg(short, long, default_value = "1000")]
        window_ms: u64,
    },

    /// Print the effective configuration
    ShowConfig,
}
