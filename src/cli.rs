use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "orchestrate",
    version,
    about = "Start, health-gate and stop a local multi-service environment"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Use a specific config file
    #[arg(short = 'f', long = "file", global = true)]
    pub config_file: Option<PathBuf>,

    /// Directory for pid-files, logs and locks (default: .orchestrate next
    /// to the config file)
    #[arg(long, global = true, env = "ORCHESTRATE_RUN_DIR")]
    pub run_dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct Selection {
    /// Only these services (comma-separated)
    #[arg(long, value_delimiter = ',', value_name = "SERVICE,...")]
    pub only: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start services in dependency order and wait until they are healthy
    Start {
        #[command(flatten)]
        selection: Selection,
        /// Give up after this many seconds and stop what this run started
        #[arg(long, value_name = "SECONDS")]
        timeout: Option<u64>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Stop services, dependents first
    Stop {
        #[command(flatten)]
        selection: Selection,
    },
    /// Stop then start services
    Restart {
        #[command(flatten)]
        selection: Selection,
        /// Give up after this many seconds and stop what this run started
        #[arg(long, value_name = "SECONDS")]
        timeout: Option<u64>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the state of every service
    Status {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check the config file without starting anything
    Validate,
    /// Print a service's log file
    Logs {
        /// Service name
        service: String,
        /// Only the last N lines
        #[arg(long, short = 'n')]
        tail: Option<usize>,
    },
    /// Generate a starter orchestrate.toml
    Init,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}
