//! Non-blocking strategy: fan out every connect, wait once, classify.
//!
//! 1. Fan-out: one non-blocking socket per port. A connect that fails on the
//!    spot is released immediately and never handed to the multiplexer.
//! 2. Wait: the [`ReadinessMultiplexer`] watches the rest against a single
//!    batch deadline of `timeout`, not one timer per port.
//! 3. Classify: ready sockets are open if their pending error is zero;
//!    anything still pending at the deadline is closed. Every socket is
//!    released afterwards.

use crate::error::{ScanError, ScanResult};
use crate::scanner::aggregate::OpenPortSet;
use crate::scanner::traits::{ProbeBatch, ScanStrategy, StrategyKind};
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, Default)]
pub struct NonBlockingStrategy;

impl NonBlockingStrategy {
    pub fn new() -> Self {
        Self
    }

    /// Run all three phases on the calling thread.
    #[cfg(unix)]
    pub fn run_blocking(&self, batch: &ProbeBatch) -> ScanResult<OpenPortSet> {
        imp::run(batch)
    }

    #[cfg(not(unix))]
    pub fn run_blocking(&self, _batch: &ProbeBatch) -> ScanResult<OpenPortSet> {
        Err(ScanError::Unsupported(StrategyKind::Nonblocking))
    }
}

#[async_trait]
impl ScanStrategy for NonBlockingStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Nonblocking
    }

    async fn run(&self, batch: &ProbeBatch) -> ScanResult<OpenPortSet> {
        let strategy = *self;
        let batch = batch.clone();
        tokio::task::spawn_blocking(move || strategy.run_blocking(&batch))
            .await
            .map_err(|e| ScanError::WorkerFailed(e.to_string()))?
    }
}

#[cfg(unix)]
mod imp {
    use crate::error::{ScanError, ScanResult};
    use crate::scanner::aggregate::{Aggregator, OpenPortSet};
    use crate::scanner::probe::{ConnectionLedger, Probe};
    use crate::scanner::readiness::{InFlightConnection, ReadinessMultiplexer};
    use crate::scanner::traits::{ProbeBatch, ProbeOutcome};
    use socket2::{Domain, Protocol, Socket, Type};
    use std::io;
    use std::sync::Arc;
    use std::time::Instant;
    use tracing::{debug, trace, warn};

    /// Result of the fan-out phase.
    pub(crate) struct FanOut {
        pub multiplexer: ReadinessMultiplexer,
        /// Outcomes decided during fan-out; their sockets are already closed.
        pub settled: Vec<ProbeOutcome>,
    }

    pub(crate) fn fan_out(batch: &ProbeBatch) -> FanOut {
        let mut fan = FanOut {
            multiplexer: ReadinessMultiplexer::new(),
            settled: Vec::new(),
        };
        for probe in batch.probes() {
            match start_connect(&probe, &batch.ledger) {
                Ok(conn) => fan.multiplexer.register(conn),
                Err(outcome) => fan.settled.push(outcome),
            }
        }
        debug!(
            in_flight = fan.multiplexer.len(),
            settled = fan.settled.len(),
            "fan-out complete"
        );
        fan
    }

    /// Issue a non-blocking connect. `Err` carries an outcome already decided.
    fn start_connect(
        probe: &Probe,
        ledger: &Arc<ConnectionLedger>,
    ) -> Result<InFlightConnection, ProbeOutcome> {
        if let Some(outcome) = probe.settled() {
            return Err(outcome);
        }
        let port = probe.port();
        let addr = probe.addr();
        let lease = ledger.lease();

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .and_then(|socket| socket.set_nonblocking(true).map(|()| socket))
            .map_err(|e| {
                warn!(%port, error = %e, "could not open non-blocking socket");
                ProbeOutcome::Errored(port, e.to_string())
            })?;

        match socket.connect(&addr.into()) {
            Ok(()) => {
                trace!(%port, "connected instantly");
                Ok(InFlightConnection::new(port, socket, lease))
            }
            Err(e) if in_progress(&e) => Ok(InFlightConnection::new(port, socket, lease)),
            Err(e) => {
                trace!(%port, error = %e, "connect failed instantly");
                Err(ProbeOutcome::Closed(port))
            }
        }
    }

    fn in_progress(err: &io::Error) -> bool {
        err.raw_os_error() == Some(libc::EINPROGRESS) || err.kind() == io::ErrorKind::WouldBlock
    }

    pub(super) fn run(batch: &ProbeBatch) -> ScanResult<OpenPortSet> {
        let mut aggregator = Aggregator::new(batch.len());
        let FanOut { multiplexer, settled } = fan_out(batch);
        for outcome in &settled {
            aggregator.record(outcome);
        }

        let deadline = Instant::now() + batch.timeout;
        let readiness = multiplexer.wait(deadline).map_err(ScanError::Multiplexer)?;

        for mut conn in readiness.ready {
            let outcome = conn.classify();
            trace!(port = %conn.port(), elapsed = ?conn.elapsed(), %outcome, "classified");
            aggregator.record(&outcome);
            conn.release();
        }
        for mut conn in readiness.expired {
            aggregator.record(&ProbeOutcome::Closed(conn.port()));
            conn.release();
        }
        Ok(aggregator.finish())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::imp::fan_out;
    use super::*;
    use crate::scanner::probe::ConnectionLedger;
    use crate::scanner::testing::SilentBlock;
    use crate::types::{PortRange, ScanTarget};
    use std::net::{IpAddr, Ipv4Addr, TcpListener};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn batch(ip: IpAddr, min: u16, max: u16, timeout: Duration) -> ProbeBatch {
        ProbeBatch::new(
            ScanTarget::new(ip.to_string(), ip),
            PortRange::from_bounds(min, max).unwrap(),
            timeout,
            Arc::new(ConnectionLedger::new()),
        )
    }

    #[test]
    fn test_instant_failures_are_never_polled() {
        // TCP to the limited broadcast address is rejected inside connect().
        let batch = batch(
            IpAddr::V4(Ipv4Addr::BROADCAST),
            1000,
            1004,
            Duration::from_millis(100),
        );

        let fan = fan_out(&batch);

        assert!(fan.multiplexer.is_empty());
        assert_eq!(fan.settled.len(), 5);
        assert!(fan.settled.iter().all(|o| !o.is_open()));
        drop(fan);
        assert_eq!(batch.ledger.acquired(), 5);
        assert_eq!(batch.ledger.outstanding(), 0);
    }

    #[test]
    fn test_open_port_found_among_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let batch = batch(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            port.saturating_sub(1).max(1),
            port,
            Duration::from_secs(1),
        );

        let open = NonBlockingStrategy::new().run_blocking(&batch).unwrap();

        assert!(open.to_vec().contains(&port));
        assert_eq!(batch.ledger.outstanding(), 0);
    }

    #[test]
    fn test_silent_ports_bounded_by_one_deadline() {
        let silent = SilentBlock::reserve(3);
        let timeout = Duration::from_millis(200);
        let batch = batch(IpAddr::V4(Ipv4Addr::LOCALHOST), silent.min, silent.max, timeout);

        let started = Instant::now();
        let open = NonBlockingStrategy::new().run_blocking(&batch).unwrap();

        assert!(open.is_empty());
        // All three wait out one shared deadline, not three in a row.
        assert!(started.elapsed() >= timeout);
        assert!(started.elapsed() < timeout * 2);
        assert_eq!(batch.ledger.acquired(), silent.len());
        assert_eq!(batch.ledger.outstanding(), 0);
    }

    #[test]
    fn test_port_zero_settled_during_fan_out() {
        let batch = batch(IpAddr::V4(Ipv4Addr::LOCALHOST), 0, 0, Duration::from_millis(100));

        let fan = fan_out(&batch);

        assert!(fan.multiplexer.is_empty());
        assert_eq!(fan.settled.len(), 1);
        assert_eq!(batch.ledger.acquired(), 0);
    }
}
