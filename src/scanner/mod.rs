//! Scanner module - the connectivity probe engine.
//!
//! A scan validates its request, resolves the host once, decomposes the port
//! range into one probe per port and hands the batch to the selected
//! [`ScanStrategy`]. Every strategy returns the same [`OpenPortSet`] for the
//! same target state; they differ only in how probes are run concurrently.

pub mod aggregate;
pub mod cooperative;
pub mod nonblocking;
pub mod pool;
pub mod probe;
pub mod process;
#[cfg(unix)]
pub mod readiness;
pub mod sequential;
#[cfg(test)]
pub(crate) mod testing;
pub mod threads;
pub mod traits;

use crate::error::ScanResult;
use crate::types::{resolve_target, PortRange, ScanTarget};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub use aggregate::{Aggregator, OpenPortSet, Tally};
pub use cooperative::{CooperativeFlavor, CooperativeStrategy};
pub use nonblocking::NonBlockingStrategy;
pub use pool::{default_workers, PoolStrategy, ProbeHandle, WorkerPool};
pub use probe::{ConnectionLedger, Lease, Probe, Prober, TcpProber};
pub use process::{ChildReport, ProcessStrategy};
pub use sequential::SequentialStrategy;
pub use threads::ThreadStrategy;
pub use traits::{BoxedStrategy, ProbeBatch, ProbeOutcome, ScanRequest, ScanStrategy, StrategyKind};

/// Knobs that only some strategies look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Pool size; `None` means [`default_workers`].
    pub pool_workers: Option<usize>,
    /// Child program for the process strategy; `None` means this executable.
    pub process_program: Option<PathBuf>,
    /// Extra time a child process gets beyond the probe timeout.
    pub process_grace: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            pool_workers: None,
            process_program: None,
            process_grace: process::DEFAULT_GRACE,
        }
    }
}

/// Create a strategy of the given kind.
pub fn create_strategy(
    kind: StrategyKind,
    options: &EngineOptions,
    ledger: &Arc<ConnectionLedger>,
) -> ScanResult<BoxedStrategy> {
    let prober: Arc<dyn Prober> = Arc::new(TcpProber::new(Arc::clone(ledger)));

    let strategy: BoxedStrategy = match kind {
        StrategyKind::Sequential => Box::new(SequentialStrategy::new(prober)),
        StrategyKind::Threads => Box::new(ThreadStrategy::new(prober)),
        StrategyKind::Processes => {
            let strategy = match &options.process_program {
                Some(program) => ProcessStrategy::new(program),
                None => ProcessStrategy::current_exe()?,
            };
            Box::new(strategy.with_grace(options.process_grace))
        }
        StrategyKind::Pool => Box::new(PoolStrategy::new(
            prober,
            options.pool_workers.unwrap_or_else(default_workers),
        )),
        StrategyKind::Nonblocking => Box::new(NonBlockingStrategy::new()),
        StrategyKind::Cooperative => Box::new(CooperativeStrategy::new(CooperativeFlavor::Race)),
        StrategyKind::Structured => Box::new(CooperativeStrategy::new(CooperativeFlavor::Scoped)),
    };
    Ok(strategy)
}

/// Runs scans and keeps the connection ledger shared by all of them.
#[derive(Debug, Default)]
pub struct ScanEngine {
    options: EngineOptions,
    ledger: Arc<ConnectionLedger>,
}

impl ScanEngine {
    pub fn new(options: EngineOptions) -> Self {
        Self {
            options,
            ledger: Arc::new(ConnectionLedger::new()),
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Connection resources acquired and released by every scan so far.
    pub fn ledger(&self) -> &ConnectionLedger {
        &self.ledger
    }

    /// Validate the raw parameters, then run the scan.
    ///
    /// Invalid parameters fail before the host is resolved or any socket is
    /// created.
    pub async fn scan(
        &self,
        host: &str,
        min_port: u16,
        max_port: u16,
        timeout: Duration,
        kind: StrategyKind,
    ) -> ScanResult<OpenPortSet> {
        let request = ScanRequest::new(host, min_port, max_port, timeout)?;
        self.run(&request, kind).await
    }

    /// Resolve the request's host and probe its whole range with `kind`.
    pub async fn run(&self, request: &ScanRequest, kind: StrategyKind) -> ScanResult<OpenPortSet> {
        let target = resolve_target(&request.host).await?;
        self.run_resolved(target, request.range, request.timeout, kind)
            .await
    }

    /// Probe an already resolved target.
    pub async fn run_resolved(
        &self,
        target: ScanTarget,
        range: PortRange,
        timeout: Duration,
        kind: StrategyKind,
    ) -> ScanResult<OpenPortSet> {
        let strategy = create_strategy(kind, &self.options, &self.ledger)?;
        let batch = ProbeBatch::new(target, range, timeout, Arc::clone(&self.ledger));

        debug!(
            target = %batch.target,
            range = %batch.range,
            timeout = ?batch.timeout,
            strategy = %strategy.kind(),
            "starting scan"
        );
        let started = Instant::now();
        let open = strategy.run(&batch).await?;
        info!(
            open = open.len(),
            probes = batch.len(),
            elapsed = ?started.elapsed(),
            strategy = %kind,
            "scan finished"
        );
        Ok(open)
    }
}

/// Scan `host` from `min_port` to `max_port` inclusive with default options.
///
/// ```rust,no_run
/// use portprobe::scanner::{scan, StrategyKind};
/// use std::time::Duration;
///
/// # async fn demo() -> portprobe::error::ScanResult<()> {
/// let open = scan("127.0.0.1", 1, 1024, Duration::from_millis(500), StrategyKind::Pool).await?;
/// for port in open.iter() {
///     println!("Port {port} is open");
/// }
/// # Ok(())
/// # }
/// ```
pub async fn scan(
    host: &str,
    min_port: u16,
    max_port: u16,
    timeout: Duration,
    strategy: StrategyKind,
) -> ScanResult<OpenPortSet> {
    ScanEngine::default()
        .scan(host, min_port, max_port, timeout, strategy)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScanError;
    use std::net::TcpListener;

    #[tokio::test]
    async fn test_invalid_range_creates_no_sockets() {
        let engine = ScanEngine::default();
        for kind in StrategyKind::ALL {
            let err = engine
                .scan("127.0.0.1", 1010, 1000, Duration::from_secs(1), kind)
                .await
                .unwrap_err();
            assert!(err.is_configuration(), "{kind}");
        }
        assert_eq!(engine.ledger().acquired(), 0);
    }

    #[tokio::test]
    async fn test_unresolvable_host_is_fatal() {
        let err = scan(
            "",
            1,
            2,
            Duration::from_millis(100),
            StrategyKind::Sequential,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ScanError::Target(_)));
    }

    #[tokio::test]
    async fn test_engine_finds_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let engine = ScanEngine::default();

        let open = engine
            .scan("127.0.0.1", port, port, Duration::from_secs(1), StrategyKind::Threads)
            .await
            .unwrap();

        assert_eq!(open.to_vec(), vec![port]);
        assert_eq!(engine.ledger().acquired(), 1);
        assert_eq!(engine.ledger().outstanding(), 0);
    }

    #[tokio::test]
    async fn test_port_zero_and_zero_timeout_are_not_open() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let engine = ScanEngine::default();

        for kind in [StrategyKind::Sequential, StrategyKind::Pool, StrategyKind::Structured] {
            let zero_port = engine
                .scan("127.0.0.1", 0, 0, Duration::from_secs(1), kind)
                .await
                .unwrap();
            let zero_wait = engine
                .scan("127.0.0.1", port, port, Duration::ZERO, kind)
                .await
                .unwrap();
            assert!(zero_port.is_empty(), "{kind}");
            assert!(zero_wait.is_empty(), "{kind}");
        }
        assert_eq!(engine.ledger().acquired(), 0);
    }

    #[tokio::test]
    async fn test_processes_without_child_program_fail_loudly() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let err = scan("127.0.0.1", port, port, Duration::from_secs(1), StrategyKind::Processes)
            .await
            .unwrap_err();

        assert!(matches!(err, ScanError::NoChildProgram(_)));
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_every_kind_has_a_strategy() {
        let ledger = Arc::new(ConnectionLedger::new());
        let options = EngineOptions {
            process_program: Some(PathBuf::from("portprobe")),
            ..EngineOptions::default()
        };
        for kind in StrategyKind::ALL {
            let strategy = create_strategy(kind, &options, &ledger).unwrap();
            assert_eq!(strategy.kind(), kind);
        }
    }
}
