use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod simulate;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Drive traffic through a loopback remote and a local multiplexer.
    Simulate(SimulateArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Simulate(args) => simulate::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Number of local clients (1-8).
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u8).range(1..=8))]
    pub clients: u8,
    /// Requests sent to each client.
    #[arg(long, default_value_t = 100)]
    pub messages: usize,
    /// Payload size in bytes; a multiple of 4, at least 4.
    #[arg(long, default_value_t = 16)]
    pub payload_size: usize,
    /// Coalescing bound for every send (e.g. 0ms, 2ms, 1s).
    #[arg(long, default_value = "2ms")]
    pub max_latency: String,
    /// Announce a second CONNECT halfway through, as a restarted remote would.
    #[arg(long)]
    pub restart: bool,
    /// Overall time limit (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// JSON file with pump settings.
    #[arg(long, value_name = "FILE", env = "ADTLINK_CONFIG")]
    pub config: Option<PathBuf>,
    /// Override the RX (and per-client) ring size.
    #[arg(long, value_name = "BYTES")]
    pub rx_buffer_size: Option<usize>,
    /// Override the TX ring size.
    #[arg(long, value_name = "BYTES")]
    pub tx_buffer_size: Option<usize>,
    /// Exit with status 1 unless every message and reply arrived.
    #[arg(long)]
    pub strict: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
