//! Output formatting module.
//!
//! Results go to stdout, one line per open port in ascending order followed
//! by the completion time, or as a single JSON document. Status messages go
//! to stderr so they never mix with results.

use crate::cli::OutputFormat;
use crate::scanner::{OpenPortSet, StrategyKind};
use crate::types::{PortRange, ScanTarget};
use console::style;
use serde::Serialize;
use std::io::{self, Write};
use std::time::Duration;

/// Everything reported about a finished scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub target: String,
    pub ip_address: String,
    pub strategy: StrategyKind,
    pub min_port: u16,
    pub max_port: u16,
    pub open_ports: OpenPortSet,
    pub elapsed_secs: f64,
}

impl ScanReport {
    pub fn new(
        target: &ScanTarget,
        range: PortRange,
        strategy: StrategyKind,
        open_ports: OpenPortSet,
        elapsed: Duration,
    ) -> Self {
        Self {
            target: target.original.clone(),
            ip_address: target.ip.to_string(),
            strategy,
            min_port: range.start().as_u16(),
            max_port: range.end().as_u16(),
            open_ports,
            elapsed_secs: elapsed.as_secs_f64(),
        }
    }
}

/// Format and print a report to stdout.
pub fn print_report(report: &ScanReport, format: OutputFormat) -> io::Result<()> {
    let stdout = io::stdout();
    write_report(&mut stdout.lock(), report, format)
}

pub fn write_report(out: &mut impl Write, report: &ScanReport, format: OutputFormat) -> io::Result<()> {
    match format {
        OutputFormat::Plain => write_plain(out, report),
        OutputFormat::Json => write_json(out, report),
    }
}

fn write_plain(out: &mut impl Write, report: &ScanReport) -> io::Result<()> {
    for port in report.open_ports.iter() {
        writeln!(out, "Port {port} is open")?;
    }
    writeln!(out, "Completed scan in {:.6} seconds", report.elapsed_secs)?;
    out.flush()
}

fn write_json(out: &mut impl Write, report: &ScanReport) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut *out, report).map_err(io::Error::other)?;
    writeln!(out)?;
    out.flush()
}

/// Print a scan header before scanning begins.
pub fn print_scan_header(target: &ScanTarget, range: PortRange, strategy: StrategyKind) {
    eprintln!(
        "{} {} ports {} with {}",
        style("Scanning").cyan(),
        style(target).white().bold(),
        range,
        style(strategy).yellow()
    );
}

/// Print the single-port verdict of `check`.
pub fn print_check(port: u16, open: bool) {
    if open {
        println!("Port {} is {}", port, style("open").green().bold());
    } else {
        println!("Port {} is {}", port, style("not open").red());
    }
}

/// Print an error message.
pub fn print_error(msg: &str) {
    eprintln!("{} {}", style("Error:").red().bold(), msg);
}

/// Print a warning message.
pub fn print_warning(msg: &str) {
    eprintln!("{} {}", style("Warning:").yellow().bold(), msg);
}
