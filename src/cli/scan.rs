//! Scan subcommand implementation.
//!
//! Handles `portprobe scan <host> <min_port> <max_port>`.

use crate::cli::{parse_seconds, OutputFormat};
use crate::config::AppSettings;
use crate::error::{CliResult, ScanError};
use crate::output::{self, ScanReport};
use crate::scanner::{ScanEngine, ScanRequest, StrategyKind};
use crate::types::resolve_target;
use clap::Parser;
use std::time::{Duration, Instant};

/// Scan a range of ports for open ones.
#[derive(Parser, Debug)]
pub struct ScanCommand {
    /// Host to scan (IP address or hostname)
    #[arg(value_name = "HOST")]
    pub host: String,

    /// First port of the range
    #[arg(value_name = "MIN_PORT")]
    pub min_port: u16,

    /// Last port of the range (inclusive)
    #[arg(value_name = "MAX_PORT")]
    pub max_port: u16,

    /// Per-probe timeout in seconds [default: from settings, 1]
    #[arg(short = 't', long, value_parser = parse_seconds, value_name = "SECS")]
    pub timeout: Option<Duration>,

    /// Concurrency strategy [default: from settings, threads]
    #[arg(short = 's', long, value_enum)]
    pub strategy: Option<StrategyKind>,

    /// Worker count for the pool strategy
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Output format for results [default: from settings, plain]
    #[arg(short, long, value_enum)]
    pub output: Option<OutputFormat>,
}

impl ScanCommand {
    /// Execute the scan command.
    pub async fn execute(&self, settings: &AppSettings, quiet: bool) -> CliResult<()> {
        let timeout = self.timeout.unwrap_or_else(|| settings.default_timeout());
        let strategy = self.strategy.unwrap_or(settings.default_strategy);
        let format = self.output.unwrap_or(settings.output_format);

        let request = ScanRequest::new(&self.host, self.min_port, self.max_port, timeout)?;
        let target = resolve_target(&request.host)
            .await
            .map_err(ScanError::from)?;

        let mut options = settings.engine_options();
        if let Some(workers) = self.workers {
            options.pool_workers = Some(workers);
        }
        let engine = ScanEngine::new(options);

        if !quiet && format == OutputFormat::Plain {
            output::print_scan_header(&target, request.range, strategy);
        }

        let started = Instant::now();
        let open = engine
            .run_resolved(target.clone(), request.range, request.timeout, strategy)
            .await?;
        let report = ScanReport::new(&target, request.range, strategy, open, started.elapsed());

        output::print_report(&report, format)?;
        Ok(())
    }
}
