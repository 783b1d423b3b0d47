//! Check subcommand implementation.
//!
//! Handles `portprobe check <host> <port>`: one port, one verdict, and an
//! exit status scripts can test.

use crate::cli::parse_seconds;
use crate::config::AppSettings;
use crate::error::CliResult;
use crate::output;
use crate::scanner::{ScanEngine, StrategyKind};
use clap::Parser;
use std::time::Duration;

/// Check whether a single port is open.
#[derive(Parser, Debug)]
pub struct CheckCommand {
    /// Host to probe (IP address or hostname)
    #[arg(value_name = "HOST")]
    pub host: String,

    /// Port to probe
    #[arg(value_name = "PORT")]
    pub port: u16,

    /// Connection timeout in seconds [default: from settings, 1]
    #[arg(short = 't', long, value_parser = parse_seconds, value_name = "SECS")]
    pub timeout: Option<Duration>,
}

impl CheckCommand {
    /// Execute the check. Returns whether the port is open.
    pub async fn execute(&self, settings: &AppSettings) -> CliResult<bool> {
        let timeout = self.timeout.unwrap_or_else(|| settings.default_timeout());
        let engine = ScanEngine::new(settings.engine_options());

        let open = engine
            .scan(&self.host, self.port, self.port, timeout, StrategyKind::Sequential)
            .await?;
        let is_open = !open.is_empty();

        output::print_check(self.port, is_open);
        Ok(is_open)
    }
}
