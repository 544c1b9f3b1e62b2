//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Sync Host - two-node experiment synchronization
#[derive(Parser, Debug)]
#[command(
    name = "sync-host",
    author,
    version,
    about = "Host-side synchronization engine for thermal actuation experiments",
    long_about = "Accepts one Node over TCP, runs the configured number of experiment runs,\n\
                  estimates the Node clock offset each run, aligns Node temperature samples\n\
                  with Host position samples and writes one CSV file per run."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "SYNC_HOST_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "SYNC_HOST_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Accept a Node and run the experiment session
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),

    /// Play the Node side against a running host (bench testing)
    SimulateNode(SimulateNodeArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON); defaults apply when absent
    #[arg(short, long, env = "SYNC_HOST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the listen address from configuration
    #[arg(long, env = "SYNC_HOST_LISTEN")]
    pub listen: Option<String>,

    /// Override the number of runs
    #[arg(long, env = "SYNC_HOST_NUM_RUNS")]
    pub num_runs: Option<u32>,

    /// Override the alignment window (ms)
    #[arg(long, env = "SYNC_HOST_WINDOW_MS")]
    pub window_ms: Option<f64>,

    /// Override the output directory
    #[arg(long, env = "SYNC_HOST_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Replay positions from a JSONL recording instead of the configured source
    #[arg(long)]
    pub replay: Option<PathBuf>,

    /// Validate configuration and exit without accepting a Node
    #[arg(long)]
    pub dry_run: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "SYNC_HOST_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file; defaults are shown when absent
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Print the configuration as TOML (a starting point for a config file)
    #[arg(long, conflicts_with = "json")]
    pub toml: bool,

    /// Show sink configuration
    #[arg(long)]
    pub sinks: bool,
}

/// Arguments for the `simulate-node` command
#[derive(Parser, Debug, Clone)]
pub struct SimulateNodeArgs {
    /// Host address to connect to
    #[arg(long, default_value = "127.0.0.1:5005", env = "SYNC_NODE_CONNECT")]
    pub connect: String,

    /// Node clock skew relative to this machine (seconds)
    #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
    pub clock_skew_s: f64,

    /// Delay before answering `sync` (ms)
    #[arg(long, default_value = "5")]
    pub sync_reply_delay_ms: u64,

    /// Answer the first N `sync` requests with a malformed reply
    #[arg(long, default_value = "0")]
    pub malformed_sync_replies: u32,

    /// Never answer `reset`
    #[arg(long)]
    pub no_reset_ack: bool,

    /// Channels that always read as a fault (null)
    #[arg(long, value_delimiter = ',')]
    pub fault_channels: Vec<u8>,

    /// Insert a garbage frame every N data packets
    #[arg(long)]
    pub garbage_every: Option<u64>,

    /// Send `stop` when this run begins collecting
    #[arg(long)]
    pub stop_on_run: Option<u32>,

    /// Drop the connection after N data packets
    #[arg(long)]
    pub disconnect_after: Option<u64>,

    /// Omit `run_index` from data packets
    #[arg(long)]
    pub no_run_index: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => observability::LogFormat::Json,
            LogFormat::Pretty => observability::LogFormat::Pretty,
            LogFormat::Compact => observability::LogFormat::Compact,
        }
    }
}
