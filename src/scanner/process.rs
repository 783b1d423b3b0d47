//! Process-per-probe strategy.
//!
//! Each port is probed by a child process running this crate's binary with
//! the hidden `probe` subcommand. Nothing is shared with the child: the
//! outcome comes back as one JSON line on its stdout, and is only trusted once
//! the child has exited successfully. Children get `timeout + grace` to finish;
//! past that they are killed, reaped, and reported as "no outcome". A batch in
//! which no child reports anything fails as a whole.

use crate::error::{ScanError, ScanResult};
use crate::scanner::aggregate::{Aggregator, OpenPortSet};
use crate::scanner::probe::{connect_blocking, ConnectionLedger, Lease, Probe};
use crate::scanner::traits::{ProbeBatch, ProbeOutcome, ScanStrategy, StrategyKind};
use crate::types::Port;
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Default extra time a child gets on top of the probe timeout.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(2);

/// Subcommand name the child side answers to.
pub const CHILD_SUBCOMMAND: &str = "probe";

/// What a child reports on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildReport {
    pub port: u16,
    pub open: bool,
}

impl ChildReport {
    fn into_outcome(self) -> ProbeOutcome {
        let port = Port::new(self.port);
        if self.open {
            ProbeOutcome::Open(port)
        } else {
            ProbeOutcome::Closed(port)
        }
    }
}

/// Child side: probe once and write the report line to `out`.
pub fn run_child(ip: IpAddr, port: Port, timeout: Duration, mut out: impl Write) -> std::io::Result<()> {
    let ledger = Arc::new(ConnectionLedger::new());
    let outcome = connect_blocking(&Probe::new(ip, port, timeout), &ledger);
    let report = ChildReport {
        port: port.as_u16(),
        open: outcome.is_open(),
    };
    serde_json::to_writer(&mut out, &report)?;
    writeln!(out)?;
    out.flush()
}

/// Parent side of the process strategy.
#[derive(Debug, Clone)]
pub struct ProcessStrategy {
    program: PathBuf,
    grace: Duration,
}

impl ProcessStrategy {
    /// `program` must accept `probe <ip> <port> --timeout-ms <ms>`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            grace: DEFAULT_GRACE,
        }
    }

    /// Use the currently running executable as the child program.
    ///
    /// Fails with [`ScanError::NoChildProgram`] unless the running executable
    /// is the `portprobe` binary, the only one that answers to the child
    /// subcommand.
    pub fn current_exe() -> ScanResult<Self> {
        let exe = std::env::current_exe()?;
        if exe.file_stem().and_then(|stem| stem.to_str()) != Some(env!("CARGO_PKG_NAME")) {
            return Err(ScanError::NoChildProgram(exe));
        }
        Ok(Self::new(exe))
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    fn command(&self, probe: &Probe) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(CHILD_SUBCOMMAND)
            .arg(probe.addr().ip().to_string())
            .arg(probe.port().to_string())
            .arg("--timeout-ms")
            .arg(probe.timeout().as_millis().max(1).to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    /// Wait for one child under the deadline. `None` means no usable outcome.
    async fn collect(&self, port: Port, mut child: Child, deadline: Duration) -> Option<ProbeOutcome> {
        let mut stdout = child.stdout.take()?;
        let mut output = String::new();

        let finished = tokio::time::timeout(deadline, async {
            stdout.read_to_string(&mut output).await?;
            child.wait().await
        })
        .await;

        let status = match finished {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                warn!(%port, error = %e, "lost contact with probe child");
                reap(&mut child).await;
                return None;
            }
            Err(_) => {
                warn!(%port, ?deadline, "probe child exceeded its deadline, killing it");
                reap(&mut child).await;
                return None;
            }
        };

        if !status.success() {
            warn!(%port, %status, "probe child exited abnormally");
            return None;
        }

        let report = output
            .lines()
            .find_map(|line| serde_json::from_str::<ChildReport>(line).ok());
        match report.map(ChildReport::into_outcome) {
            Some(outcome) if outcome.port() == port => Some(outcome),
            _ => {
                warn!(%port, "probe child sent no usable report");
                None
            }
        }
    }
}

/// Kill a child if it is still running and wait for it to exit.
async fn reap(child: &mut Child) {
    if let Err(e) = child.kill().await {
        debug!(error = %e, "kill failed, child already gone");
    }
}

#[async_trait]
impl ScanStrategy for ProcessStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Processes
    }

    async fn run(&self, batch: &ProbeBatch) -> ScanResult<OpenPortSet> {
        let deadline = batch.timeout + self.grace;
        let mut aggregator = Aggregator::new(batch.len());
        let mut children: Vec<(Port, Child, Lease)> = Vec::with_capacity(batch.len());

        for probe in batch.probes() {
            if let Some(outcome) = probe.settled() {
                aggregator.record(&outcome);
                continue;
            }
            let lease = batch.ledger.lease();
            match self.command(&probe).spawn() {
                Ok(child) => children.push((probe.port(), child, lease)),
                Err(e) => {
                    drop(lease);
                    warn!(port = %probe.port(), error = %e, "could not spawn probe child");
                    for (_, mut child, _lease) in children {
                        reap(&mut child).await;
                    }
                    return Err(ScanError::exhausted("spawning probe processes", e));
                }
            }
        }
        let spawned = children.len();
        debug!(children = spawned, ?deadline, "waiting for probe children");

        let outcomes = join_all(children.into_iter().map(|(port, child, lease)| async move {
            let outcome = self.collect(port, child, deadline).await;
            drop(lease);
            (port, outcome)
        }))
        .await;

        let mut reported = 0;
        for (port, outcome) in outcomes {
            match outcome {
                Some(outcome) => {
                    reported += 1;
                    aggregator.record(&outcome);
                }
                None => aggregator.record_missing(port),
            }
        }
        if spawned > 0 && reported == 0 {
            return Err(ScanError::WorkerFailed(format!(
                "none of {spawned} child processes of {} reported an outcome",
                self.program.display()
            )));
        }
        Ok(aggregator.finish())
    }
}
