//! Command-line interface definitions for torgate.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Tor-only routing policy for scan traffic.
///
/// Checks that Orbot (or any Tor SOCKS5 proxy) is running and that
/// traffic through it reaches the Tor network.
#[derive(Parser, Debug)]
#[command(name = "torgate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Settings file (.toml or .json); defaults apply when omitted.
    #[arg(short = 'c', long = "config", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Machine-readable JSON output.
    #[arg(long = "json", global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Apply settings and print the routing status.
    Status,
    /// Probe the proxy and verify the Tor network without changing anything.
    Test,
    /// Run the pre-flight check a scan would; exit code 2 if blocked.
    Check,
    /// Print the default settings.
    Defaults,
}
