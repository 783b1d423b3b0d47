//! portprobe command-line entry point.

use anyhow::{Context, Result};
use clap::Parser;
use portprobe::cli::{Cli, Commands};
use portprobe::config::AppSettings;
use portprobe::error::{CliResult, ConfigError};
use portprobe::output;
use std::process::ExitCode;
use tracing::{debug, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli).context("failed to initialize logging") {
        output::print_warning(&format!("{e:#}"));
    }
    debug!(?cli, "parsed arguments");

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            output::print_error(&e.to_string());
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn run(cli: Cli) -> CliResult<ExitCode> {
    // The child side answers before anything else is set up.
    if let Commands::Probe(probe) = &cli.command {
        probe.execute()?;
        return Ok(ExitCode::SUCCESS);
    }

    let settings = load_settings(&cli)?;
    match &cli.command {
        Commands::Scan(scan) => {
            scan.execute(&settings, cli.quiet).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check(check) => {
            if check.execute(&settings).await? {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        Commands::Probe(_) => Ok(ExitCode::SUCCESS),
    }
}

fn load_settings(cli: &Cli) -> CliResult<AppSettings> {
    let settings = match &cli.config {
        Some(path) => AppSettings::load_from(path)?,
        None => match AppSettings::load() {
            Ok(settings) => settings,
            Err(ConfigError::DirectoryNotFound) => {
                warn!("no configuration directory, using default settings");
                AppSettings::default()
            }
            Err(e) => return Err(e.into()),
        },
    };
    Ok(settings)
}

/// Initialize logging based on CLI arguments.
///
/// Logs go to stderr; stdout carries results and the child probe report.
/// `RUST_LOG` takes precedence over `-v` / `--quiet`.
fn init_logging(cli: &Cli) -> Result<()> {
    let default_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("portprobe={default_level}")));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_writer(std::io::stderr)
                .with_filter(filter),
        )
        .try_init()?;

    Ok(())
}
