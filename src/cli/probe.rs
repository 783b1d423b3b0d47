//! Hidden `probe` subcommand: the child side of the process strategy.

use crate::error::CliResult;
use crate::scanner::process;
use crate::types::Port;
use clap::Parser;
use std::io;
use std::net::IpAddr;
use std::time::Duration;

/// Probe one port and report it as a JSON line on stdout.
#[derive(Parser, Debug)]
pub struct ProbeCommand {
    /// Address to connect to
    #[arg(value_name = "IP")]
    pub ip: IpAddr,

    /// Port to connect to
    #[arg(value_name = "PORT")]
    pub port: u16,

    /// Connection timeout in milliseconds
    #[arg(long, value_name = "MS", default_value = "1000")]
    pub timeout_ms: u64,
}

impl ProbeCommand {
    pub fn execute(&self) -> CliResult<()> {
        let timeout = Duration::from_millis(self.timeout_ms);
        process::run_child(self.ip, Port::new(self.port), timeout, io::stdout().lock())?;
        Ok(())
    }
}
