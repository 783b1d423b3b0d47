//! Localhost listeners that never complete a handshake.
//!
//! Each listener has a backlog of zero and one queued connection that is
//! never accepted. With the accept queue full the kernel drops further SYNs,
//! so a connect to it stays pending until the caller gives up.

use socket2::{Domain, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, TcpStream};

pub(crate) struct SilentBlock {
    pub min: u16,
    pub max: u16,
    _listeners: Vec<(Socket, TcpStream)>,
}

impl SilentBlock {
    /// Reserve `len` consecutive silent ports on 127.0.0.1.
    pub fn reserve(len: u16) -> Self {
        assert!(len > 0);
        for _ in 0..64 {
            let first = silent_listener(0).expect("bind ephemeral port");
            let min = first.1.peer_addr().unwrap().port();
            let Some(max) = min.checked_add(len - 1) else {
                continue;
            };

            let mut listeners = vec![first];
            for port in min + 1..=max {
                match silent_listener(port) {
                    Some(listener) => listeners.push(listener),
                    None => break,
                }
            }
            if listeners.len() == usize::from(len) {
                return Self {
                    min,
                    max,
                    _listeners: listeners,
                };
            }
        }
        panic!("no block of {len} free ports on 127.0.0.1");
    }

    pub fn len(&self) -> u64 {
        u64::from(self.max - self.min) + 1
    }
}

fn silent_listener(port: u16) -> Option<(Socket, TcpStream)> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, None).ok()?;
    socket
        .bind(&SocketAddr::from((Ipv4Addr::LOCALHOST, port)).into())
        .ok()?;
    socket.listen(0).ok()?;
    let addr = socket.local_addr().ok()?.as_socket()?;
    // Fills the only accept slot.
    let filler = TcpStream::connect(addr).ok()?;
    Some((socket, filler))
}
