//! Scan strategy abstraction.
//!
//! Defines the probe outcome, the request/batch types every strategy consumes,
//! and the common [`ScanStrategy`] interface the engine dispatches through.

use crate::error::ScanResult;
use crate::scanner::aggregate::OpenPortSet;
use crate::scanner::probe::{ConnectionLedger, Probe};
use crate::types::{Port, PortRange, ScanTarget};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Result of probing a single port.
///
/// Refused, reset, unreachable and timed-out attempts all collapse into
/// `Closed`. `Errored` is reserved for failures to even attempt the
/// connection (no socket could be created); it is still "not open".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Open(Port),
    Closed(Port),
    Errored(Port, String),
}

impl ProbeOutcome {
    /// The port this outcome is about.
    pub fn port(&self) -> Port {
        match self {
            Self::Open(port) | Self::Closed(port) | Self::Errored(port, _) => *port,
        }
    }

    /// Check if the port answered.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open(_))
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open(port) => write!(f, "{port}/open"),
            Self::Closed(port) => write!(f, "{port}/closed"),
            Self::Errored(port, cause) => write!(f, "{port}/errored ({cause})"),
        }
    }
}

/// Available concurrency strategies.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// One probe at a time, in ascending port order.
    Sequential,
    /// One OS thread per port.
    #[default]
    Threads,
    /// One child process per port.
    Processes,
    /// Fixed-size worker pool, completions reported as they arrive.
    Pool,
    /// Non-blocking sockets behind a single readiness wait.
    Nonblocking,
    /// Single-threaded tasks, each racing its connect against a timer.
    Cooperative,
    /// Single-threaded tasks spawned into one scope that outlives them all.
    Structured,
}

impl StrategyKind {
    /// Every strategy, in declaration order.
    pub const ALL: [StrategyKind; 7] = [
        Self::Sequential,
        Self::Threads,
        Self::Processes,
        Self::Pool,
        Self::Nonblocking,
        Self::Cooperative,
        Self::Structured,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Threads => "threads",
            Self::Processes => "processes",
            Self::Pool => "pool",
            Self::Nonblocking => "nonblocking",
            Self::Cooperative => "cooperative",
            Self::Structured => "structured",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sequential" | "serial" => Ok(Self::Sequential),
            "threads" | "thread" => Ok(Self::Threads),
            "processes" | "process" => Ok(Self::Processes),
            "pool" | "futures" => Ok(Self::Pool),
            "nonblocking" | "non-blocking" | "select" => Ok(Self::Nonblocking),
            "cooperative" | "async" => Ok(Self::Cooperative),
            "structured" | "nursery" => Ok(Self::Structured),
            _ => Err(format!("unknown strategy: {}", s)),
        }
    }
}

/// A validated scan request: host, inclusive port range and per-probe timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub host: String,
    pub range: PortRange,
    pub timeout: Duration,
}

impl ScanRequest {
    /// Validate raw scan parameters.
    ///
    /// Fails with [`crate::error::ScanError::InvalidConfig`] only when `max_port < min_port`.
    /// Port 0 and a zero timeout are accepted; such probes settle as Closed
    /// without connecting.
    pub fn new(
        host: impl Into<String>,
        min_port: u16,
        max_port: u16,
        timeout: Duration,
    ) -> ScanResult<Self> {
        let range = PortRange::from_bounds(min_port, max_port)?;
        Ok(Self {
            host: host.into(),
            range,
            timeout,
        })
    }
}

/// A request whose host has been resolved, ready to be decomposed into probes.
#[derive(Debug, Clone)]
pub struct ProbeBatch {
    pub target: ScanTarget,
    pub range: PortRange,
    pub timeout: Duration,
    pub ledger: Arc<ConnectionLedger>,
}

impl ProbeBatch {
    pub fn new(
        target: ScanTarget,
        range: PortRange,
        timeout: Duration,
        ledger: Arc<ConnectionLedger>,
    ) -> Self {
        Self {
            target,
            range,
            timeout,
            ledger,
        }
    }

    /// One probe per port, in ascending order.
    pub fn probes(&self) -> impl Iterator<Item = Probe> + '_ {
        self.range
            .iter()
            .map(move |port| Probe::new(self.target.ip, port, self.timeout))
    }

    /// Number of probes in the batch.
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// Trait for concurrency strategies.
///
/// Every implementation must account for all probes of the batch (completed,
/// timed out, or cancelled) before `run` returns, and must map per-probe
/// failures to "not open" instead of returning an error.
#[async_trait]
pub trait ScanStrategy: Send + Sync {
    /// Which strategy this is.
    fn kind(&self) -> StrategyKind;

    /// Probe every port in the batch and return the open ones.
    async fn run(&self, batch: &ProbeBatch) -> ScanResult<OpenPortSet>;
}

/// A boxed strategy for dynamic dispatch.
pub type BoxedStrategy = Box<dyn ScanStrategy>;
