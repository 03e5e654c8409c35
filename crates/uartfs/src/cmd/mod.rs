use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod ports;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve a local directory to the host on a UART.
    Serve(ServeArgs),
    /// List serial ports on this machine.
    Ports(PortsArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Ports(args) => ports::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// Serial device (`/dev/ttyUSB0`, `COM3`) or `unix:<socket path>`.
    pub port: Option<String>,
    /// Baud rate.
    #[arg(long, short = 'b')]
    pub baud: Option<u32>,
    /// Directory served to the host.
    #[arg(long, short = 'r', value_name = "DIR")]
    pub root: Option<PathBuf>,
    /// Path prefixes the host may not write or delete (comma-separated, repeatable).
    #[arg(long = "read-only", value_name = "PREFIX", value_delimiter = ',')]
    pub read_only: Vec<String>,
    /// Largest frame payload in bytes.
    #[arg(long, value_name = "BYTES")]
    pub max_payload: Option<usize>,
    /// Per-exchange deadline (e.g. 2s, 500ms).
    #[arg(long, value_name = "DURATION")]
    pub timeout: Option<String>,
    /// Maximum number of files open at once.
    #[arg(long, value_name = "N")]
    pub max_open_files: Option<usize>,
    /// JSON config file; flags override its values.
    #[arg(long, value_name = "FILE", env = "UARTFS_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
pub struct PortsArgs {}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
