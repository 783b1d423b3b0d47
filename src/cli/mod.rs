//! CLI subcommand definitions and handlers.
//!
//! - `portprobe scan <host> <min_port> <max_port>` - Scan a port range
//! - `portprobe check <host> <port>` - Check a single port
//! - `portprobe probe <ip> <port>` - Child side of the process strategy (hidden)

mod check;
mod probe;
mod scan;

pub use check::CheckCommand;
pub use probe::ProbeCommand;
pub use scan::ScanCommand;

use clap::{ArgAction, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// portprobe - TCP connectivity probing with selectable concurrency strategies.
#[derive(Parser, Debug)]
#[command(name = "portprobe")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Find open TCP ports on a host", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Path to a settings file
    #[arg(long, global = true, value_name = "PATH", env = "PORTPROBE_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan a range of ports and list the open ones
    #[command(alias = "s")]
    Scan(ScanCommand),

    /// Check whether a single port is open
    #[command(alias = "c")]
    Check(CheckCommand),

    #[command(hide = true)]
    Probe(ProbeCommand),
}

/// Output format for results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One line per open port
    #[default]
    Plain,
    /// JSON structured output
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain => write!(f, "plain"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Parse a timeout given in (possibly fractional) seconds.
fn parse_seconds(s: &str) -> Result<Duration, String> {
    let secs: f64 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a number of seconds"))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err("timeout must not be negative".to_string());
    }
    Duration::try_from_secs_f64(secs).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::StrategyKind;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_scan() {
        let cli = Cli::try_parse_from([
            "portprobe", "-vv", "scan", "localhost", "1", "1024", "--timeout", "0.25", "--strategy",
            "pool", "--workers", "8",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        let Commands::Scan(scan) = cli.command else {
            panic!("expected scan");
        };
        assert_eq!(scan.host, "localhost");
        assert_eq!((scan.min_port, scan.max_port), (1, 1024));
        assert_eq!(scan.timeout, Some(Duration::from_millis(250)));
        assert_eq!(scan.strategy, Some(StrategyKind::Pool));
        assert_eq!(scan.workers, Some(8));
    }

    #[test]
    fn test_parse_seconds() {
        assert_eq!(parse_seconds("1").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_seconds("0").unwrap(), Duration::ZERO);
        assert!(parse_seconds("-1").is_err());
        assert!(parse_seconds("soon").is_err());
    }

    #[test]
    fn test_parse_hidden_probe() {
        let cli = Cli::try_parse_from(["portprobe", "probe", "127.0.0.1", "80", "--timeout-ms", "500"])
            .unwrap();
        assert!(matches!(cli.command, Commands::Probe(_)));
    }
}
