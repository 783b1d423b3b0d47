//! Readiness multiplexer built on `poll(2)`.
//!
//! Owns a set of non-blocking connection attempts and waits, against one
//! shared deadline, for them to become writable (the handshake finished,
//! successfully or not) or errored. `poll` has no `FD_SETSIZE` ceiling, so a
//! single wait can watch thousands of sockets.

use crate::scanner::probe::Lease;
use crate::scanner::traits::ProbeOutcome;
use crate::types::Port;
use socket2::Socket;
use std::io;
use std::os::fd::AsRawFd;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Lifecycle of a non-blocking connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connect issued, outcome not yet known.
    InFlight,
    /// Reported writable or errored by the multiplexer.
    Ready,
    /// Socket closed and lease returned.
    Released,
}

/// A non-blocking connection attempt and the resources it holds.
#[derive(Debug)]
pub struct InFlightConnection {
    port: Port,
    socket: Option<Socket>,
    lease: Option<Lease>,
    started: Instant,
    state: ConnectionState,
}

impl InFlightConnection {
    pub fn new(port: Port, socket: Socket, lease: Lease) -> Self {
        Self {
            port,
            socket: Some(socket),
            lease: Some(lease),
            started: Instant::now(),
            state: ConnectionState::InFlight,
        }
    }

    pub fn port(&self) -> Port {
        self.port
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Time since the connect was issued.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn mark_ready(&mut self) {
        if self.state == ConnectionState::InFlight {
            self.state = ConnectionState::Ready;
        }
    }

    /// Decide whether the handshake succeeded.
    ///
    /// Only meaningful once the socket is `Ready`: a pending error of zero and
    /// a known peer mean the connection is established.
    pub fn classify(&self) -> ProbeOutcome {
        let port = self.port;
        let Some(socket) = self.socket.as_ref().filter(|_| self.state == ConnectionState::Ready) else {
            return ProbeOutcome::Closed(port);
        };

        match socket.take_error() {
            Ok(None) => match socket.peer_addr() {
                Ok(_) => ProbeOutcome::Open(port),
                Err(e) => {
                    trace!(%port, error = %e, "writable but not connected");
                    ProbeOutcome::Closed(port)
                }
            },
            Ok(Some(e)) | Err(e) => {
                trace!(%port, error = %e, "connect failed");
                ProbeOutcome::Closed(port)
            }
        }
    }

    /// Close the socket and return the lease.
    ///
    /// Returns `true` the first time and `false` on every later call.
    pub fn release(&mut self) -> bool {
        if self.state == ConnectionState::Released {
            return false;
        }
        drop(self.socket.take());
        drop(self.lease.take());
        self.state = ConnectionState::Released;
        true
    }
}

impl Drop for InFlightConnection {
    fn drop(&mut self) {
        self.release();
    }
}

/// Connections split by whether they became ready before the deadline.
#[derive(Debug, Default)]
pub struct Readiness {
    pub ready: Vec<InFlightConnection>,
    pub expired: Vec<InFlightConnection>,
}

/// Owns in-flight connections until they are ready or the deadline passes.
#[derive(Debug, Default)]
pub struct ReadinessMultiplexer {
    pending: Vec<InFlightConnection>,
}

impl ReadinessMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand a connection attempt to the multiplexer.
    pub fn register(&mut self, conn: InFlightConnection) {
        self.pending.push(conn);
    }

    /// Connections still being watched.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// One `poll` call of at most `timeout`.
    ///
    /// Moves every connection reported writable, errored or hung up out of
    /// the pending set and returns them. `EINTR` counts as "nothing ready".
    pub fn poll_once(&mut self, timeout: Duration) -> io::Result<Vec<InFlightConnection>> {
        if self.pending.is_empty() {
            return Ok(Vec::new());
        }

        let mut fds: Vec<libc::pollfd> = self
            .pending
            .iter()
            .map(|conn| libc::pollfd {
                fd: conn.socket.as_ref().map_or(-1, |s| s.as_raw_fd()),
                events: libc::POLLOUT,
                revents: 0,
            })
            .collect();

        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, poll_millis(timeout)) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(err);
        }
        if rc == 0 {
            return Ok(Vec::new());
        }

        let signalled = libc::POLLOUT | libc::POLLERR | libc::POLLHUP;
        let mut ready = Vec::with_capacity(rc as usize);
        let mut still_pending = Vec::with_capacity(self.pending.len());
        for (mut conn, fd) in self.pending.drain(..).zip(&fds) {
            if fd.revents & signalled != 0 {
                conn.mark_ready();
                ready.push(conn);
            } else {
                still_pending.push(conn);
            }
        }
        self.pending = still_pending;
        Ok(ready)
    }

    /// Wait until every connection is ready or `deadline` passes.
    ///
    /// The deadline is shared by the whole set: each round only re-arms the
    /// connections that are still pending, with whatever time is left.
    pub fn wait(mut self, deadline: Instant) -> io::Result<Readiness> {
        let mut readiness = Readiness::default();
        let mut rounds = 0usize;

        while !self.pending.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            rounds += 1;
            readiness.ready.extend(self.poll_once(remaining)?);
        }

        readiness.expired = std::mem::take(&mut self.pending);
        debug!(
            rounds,
            ready = readiness.ready.len(),
            expired = readiness.expired.len(),
            "readiness wait finished"
        );
        Ok(readiness)
    }
}

/// Round up to whole milliseconds so a sub-millisecond remainder still waits.
fn poll_millis(timeout: Duration) -> libc::c_int {
    let millis = timeout.as_micros().div_ceil(1000);
    millis.min(libc::c_int::MAX as u128) as libc::c_int
}
