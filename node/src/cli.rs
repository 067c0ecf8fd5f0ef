//! # CLI Interface
//!
//! Defines the command-line argument structure for `endorse-node` using
//! `clap` derive. Supports three subcommands: `run`, `init`, and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Endorsement protocol agent node.
///
/// Keeps transaction records for the author or endorser side of each
/// connection, applies inbound protocol messages, serves the REST and
/// WebSocket API, and exposes Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "endorse-node",
    about = "Endorsement protocol agent node",
    version,
    propagate_version = true
)]
pub struct EndorseNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the agent node.
    Run(RunArgs),
    /// Create the data directory and generate a fresh agent signing key.
    Init(InitArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Directory holding the record database and the agent key.
    ///
    /// Created on first run if it does not exist.
    #[arg(long, short = 'd', env = "ENDORSE_DATA_DIR", default_value = ".endorse")]
    pub data_dir: PathBuf,

    /// Port for the REST and WebSocket API.
    #[arg(long, env = "ENDORSE_API_PORT", default_value_t = 8031)]
    pub api_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "ENDORSE_METRICS_PORT", default_value_t = 9031)]
    pub metrics_port: u16,

    /// Hex-encoded Ed25519 agent signing key.
    ///
    /// If not provided, the node reads `agent.key` from the data directory.
    #[arg(long, env = "ENDORSE_AGENT_KEY")]
    pub agent_key: Option<String>,

    /// Label this agent reports in `/status`.
    #[arg(long, env = "ENDORSE_LABEL", default_value = "endorse-agent")]
    pub label: String,

    /// Log output format: `pretty` or `json`.
    #[arg(long, env = "ENDORSE_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// Lifetime of correlation cache entries, in seconds. 0 disables expiry.
    #[arg(long, env = "ENDORSE_CACHE_TTL_SECS", default_value_t = 3600)]
    pub cache_ttl_secs: u64,

    /// Compare-and-set attempts per state transition before giving up.
    #[arg(long, env = "ENDORSE_MAX_RETRIES", default_value_t = 3)]
    pub max_retries: usize,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Path to the data directory to initialize.
    #[arg(long, short = 'd', env = "ENDORSE_DATA_DIR", default_value = ".endorse")]
    pub data_dir: PathBuf,

    /// Replace an existing agent key.
    #[arg(long)]
    pub force: bool,
}
