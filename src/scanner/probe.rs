//! The probe: one connection attempt to one port with a bounded wait.
//!
//! Both the blocking and the cooperative flavour take a [`Lease`] from the
//! batch's [`ConnectionLedger`] before creating their socket and give it back
//! only after the socket is closed, on every exit path.

use crate::scanner::traits::ProbeOutcome;
use crate::types::Port;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpSocket;
use tracing::{trace, warn};

/// A single connection attempt, immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
    ip: IpAddr,
    port: Port,
    timeout: Duration,
}

impl Probe {
    pub fn new(ip: IpAddr, port: Port, timeout: Duration) -> Self {
        Self { ip, port, timeout }
    }

    pub fn port(&self) -> Port {
        self.port
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Socket address this probe connects to.
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port.as_u16())
    }

    /// Outcome known without touching the network.
    ///
    /// Port 0 cannot be connected to and a zero timeout leaves no time to
    /// connect, so both are Closed and take no lease.
    pub fn settled(&self) -> Option<ProbeOutcome> {
        if !self.port.is_connectable() || self.timeout.is_zero() {
            Some(ProbeOutcome::Closed(self.port))
        } else {
            None
        }
    }
}

/// Counts connection resources handed out and given back.
///
/// After a batch completes `acquired() == released()` must hold; anything else
/// is a leak.
#[derive(Debug, Default)]
pub struct ConnectionLedger {
    acquired: AtomicU64,
    released: AtomicU64,
}

impl ConnectionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an acquisition. The returned lease records the release on drop.
    pub fn lease(self: &Arc<Self>) -> Lease {
        self.acquired.fetch_add(1, Ordering::Relaxed);
        Lease {
            ledger: Arc::clone(self),
        }
    }

    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::Relaxed)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }

    /// Resources currently held.
    pub fn outstanding(&self) -> u64 {
        self.acquired().saturating_sub(self.released())
    }
}

/// Proof of one acquired connection resource.
#[derive(Debug)]
pub struct Lease {
    ledger: Arc<ConnectionLedger>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.ledger.released.fetch_add(1, Ordering::Relaxed);
    }
}

/// Blocking probe implementation, shared by the thread-based strategies.
pub trait Prober: Send + Sync + 'static {
    fn probe(&self, probe: &Probe) -> ProbeOutcome;
}

/// Real TCP connect prober.
#[derive(Debug, Clone)]
pub struct TcpProber {
    ledger: Arc<ConnectionLedger>,
}

impl TcpProber {
    pub fn new(ledger: Arc<ConnectionLedger>) -> Self {
        Self { ledger }
    }
}

impl Prober for TcpProber {
    fn probe(&self, probe: &Probe) -> ProbeOutcome {
        connect_blocking(probe, &self.ledger)
    }
}

/// Blocking connect with a per-probe timeout.
pub fn connect_blocking(probe: &Probe, ledger: &Arc<ConnectionLedger>) -> ProbeOutcome {
    if let Some(outcome) = probe.settled() {
        return outcome;
    }
    let port = probe.port();
    let addr = probe.addr();
    let _lease = ledger.lease();

    let socket = match Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP)) {
        Ok(socket) => socket,
        Err(e) => {
            warn!(%port, error = %e, "could not create socket");
            return ProbeOutcome::Errored(port, e.to_string());
        }
    };

    match socket.connect_timeout(&addr.into(), probe.timeout()) {
        Ok(()) => {
            trace!(%port, "connected");
            ProbeOutcome::Open(port)
        }
        Err(e) => {
            trace!(%port, error = %e, "not open");
            ProbeOutcome::Closed(port)
        }
    }
    // `socket` is dropped (closed) here, before `_lease`.
}

/// How a cooperative connect attempt ended.
#[derive(Debug)]
enum Race {
    Connected,
    Failed(std::io::Error),
    TimedOut,
}

/// Cooperative connect: the connection races a timer and the loser is dropped.
///
/// Dropping the connect future closes its socket, so a timed-out or cancelled
/// attempt releases its resource just like a finished one.
pub async fn connect_cooperative(probe: Probe, ledger: Arc<ConnectionLedger>) -> ProbeOutcome {
    if let Some(outcome) = probe.settled() {
        return outcome;
    }
    let port = probe.port();
    let addr = probe.addr();
    let _lease = ledger.lease();

    let socket = match new_tcp_socket(addr) {
        Ok(socket) => socket,
        Err(e) => {
            warn!(%port, error = %e, "could not create socket");
            return ProbeOutcome::Errored(port, e.to_string());
        }
    };

    let race = tokio::select! {
        connected = socket.connect(addr) => match connected {
            Ok(_stream) => Race::Connected,
            Err(e) => Race::Failed(e),
        },
        _ = tokio::time::sleep(probe.timeout()) => Race::TimedOut,
    };

    match race {
        Race::Connected => ProbeOutcome::Open(port),
        Race::Failed(e) => {
            trace!(%port, error = %e, "not open");
            ProbeOutcome::Closed(port)
        }
        Race::TimedOut => {
            trace!(%port, "timed out");
            ProbeOutcome::Closed(port)
        }
    }
}

/// Plain async connect without its own timer; callers bound it from outside.
pub(crate) async fn connect_unbounded(probe: Probe, ledger: Arc<ConnectionLedger>) -> ProbeOutcome {
    if let Some(outcome) = probe.settled() {
        return outcome;
    }
    let port = probe.port();
    let addr = probe.addr();
    let _lease = ledger.lease();

    let socket = match new_tcp_socket(addr) {
        Ok(socket) => socket,
        Err(e) => {
            warn!(%port, error = %e, "could not create socket");
            return ProbeOutcome::Errored(port, e.to_string());
        }
    };

    match socket.connect(addr).await {
        Ok(_stream) => ProbeOutcome::Open(port),
        Err(e) => {
            trace!(%port, error = %e, "not open");
            ProbeOutcome::Closed(port)
        }
    }
}

fn new_tcp_socket(addr: SocketAddr) -> std::io::Result<TcpSocket> {
    if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::testing::SilentBlock;
    use std::net::{Ipv4Addr, TcpListener};
    use std::time::Instant;

    fn localhost_probe(port: u16, timeout: Duration) -> Probe {
        Probe::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            Port::new(port),
            timeout,
        )
    }

    /// Bind then drop a listener so the port is known to be closed.
    fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn test_ledger_balances_after_leases_drop() {
        let ledger = Arc::new(ConnectionLedger::new());
        {
            let _a = ledger.lease();
            let _b = ledger.lease();
            assert_eq!(ledger.outstanding(), 2);
        }
        assert_eq!(ledger.acquired(), 2);
        assert_eq!(ledger.released(), 2);
        assert_eq!(ledger.outstanding(), 0);
    }

    #[test]
    fn test_blocking_probe_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let ledger = Arc::new(ConnectionLedger::new());

        let outcome = connect_blocking(&localhost_probe(port, Duration::from_secs(1)), &ledger);

        assert_eq!(outcome, ProbeOutcome::Open(Port::new(port)));
        assert_eq!(ledger.outstanding(), 0);
    }

    #[test]
    fn test_blocking_probe_refused_is_closed() {
        let port = closed_port();
        let ledger = Arc::new(ConnectionLedger::new());

        let outcome = TcpProber::new(Arc::clone(&ledger))
            .probe(&localhost_probe(port, Duration::from_millis(200)));

        assert!(matches!(outcome, ProbeOutcome::Closed(_)));
        assert_eq!(ledger.acquired(), 1);
        assert_eq!(ledger.released(), 1);
    }

    #[tokio::test]
    async fn test_cooperative_probe_open_and_closed() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        let closed = closed_port();
        let ledger = Arc::new(ConnectionLedger::new());

        let a = connect_cooperative(localhost_probe(open, Duration::from_secs(1)), Arc::clone(&ledger)).await;
        let b = connect_cooperative(localhost_probe(closed, Duration::from_secs(1)), Arc::clone(&ledger)).await;

        assert!(a.is_open());
        assert!(!b.is_open());
        assert_eq!(ledger.acquired(), 2);
        assert_eq!(ledger.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_cooperative_connect_releases_lease() {
        let silent = SilentBlock::reserve(1);
        let ledger = Arc::new(ConnectionLedger::new());
        let attempt = localhost_probe(silent.min, Duration::from_secs(30));

        let started = Instant::now();
        let cut = tokio::time::timeout(
            Duration::from_millis(100),
            connect_unbounded(attempt, Arc::clone(&ledger)),
        )
        .await;

        assert!(cut.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(ledger.acquired(), 1);
        assert_eq!(ledger.released(), 1);
    }

    #[test]
    fn test_silent_port_times_out_as_closed() {
        let silent = SilentBlock::reserve(1);
        let ledger = Arc::new(ConnectionLedger::new());
        let timeout = Duration::from_millis(150);

        let started = Instant::now();
        let outcome = connect_blocking(&localhost_probe(silent.min, timeout), &ledger);

        assert_eq!(outcome, ProbeOutcome::Closed(Port::new(silent.min)));
        assert!(started.elapsed() >= timeout);
        assert!(started.elapsed() < timeout * 10);
        assert_eq!(ledger.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_port_zero_and_zero_timeout_settle_without_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let ledger = Arc::new(ConnectionLedger::new());

        let zero_port = localhost_probe(0, Duration::from_secs(1));
        let zero_wait = localhost_probe(port, Duration::ZERO);

        assert_eq!(connect_blocking(&zero_port, &ledger), ProbeOutcome::Closed(Port::new(0)));
        assert_eq!(connect_blocking(&zero_wait, &ledger), ProbeOutcome::Closed(Port::new(port)));
        assert!(!connect_cooperative(zero_wait, Arc::clone(&ledger)).await.is_open());
        assert!(!connect_unbounded(zero_port, Arc::clone(&ledger)).await.is_open());
        assert_eq!(ledger.acquired(), 0);
    }
}
