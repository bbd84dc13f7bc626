//! CLI argument parsing using clap v4

use clap::{Parser, Subcommand};

/// Refresh Worker - queue-driven document refresh robot
///
/// Pulls refresh tasks from a work queue, downloads each document from its
/// remote site, refreshes it through an external application under a hard
/// time bound, and publishes the result back.
#[derive(Parser, Debug)]
#[command(name = "refresh-worker")]
#[command(author, version, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Seed the queue from the upstream table, then process it
    Run {
        /// Path to configuration file
        #[arg(short, long, env = "REFRESH_WORKER_CONFIG")]
        config: Option<String>,

        /// Skip seeding from the upstream table
        #[arg(long)]
        no_seed: bool,
    },

    /// Copy due rows from the upstream table into the queue
    Seed {
        /// Path to configuration file
        #[arg(short, long, env = "REFRESH_WORKER_CONFIG")]
        config: Option<String>,
    },

    /// Add a single element to the queue
    Enqueue {
        /// Path to configuration file
        #[arg(short, long, env = "REFRESH_WORKER_CONFIG")]
        config: Option<String>,

        /// Element reference (for legacy elements: "<FolderPath>|<tag>")
        #[arg(short, long)]
        reference: String,

        /// JSON task payload
        #[arg(short, long)]
        data: Option<String>,

        /// Target queue (defaults to [robot] queue_name)
        #[arg(long)]
        queue: Option<String>,
    },

    /// Display version and build information
    Version,

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the current configuration
    Show {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Path where to create the config file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: Option<String>,
    },
}
