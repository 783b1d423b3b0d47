//! Localhost port harness shared by the integration tests.

#![allow(dead_code)]

use std::net::TcpListener;
use std::sync::atomic::{AtomicU16, Ordering};

/// First port tried when reserving blocks.
const BASE: u16 = 20_000;
/// Blocks are searched below this port.
const CEILING: u16 = 60_000;

static NEXT_OFFSET: AtomicU16 = AtomicU16::new(0);

/// A contiguous block of localhost ports where only some are listening.
pub struct PortBlock {
    pub min: u16,
    pub max: u16,
    open: Vec<u16>,
    _listeners: Vec<TcpListener>,
}

impl PortBlock {
    /// Reserve `len` consecutive ports and keep listeners on `open_offsets`.
    ///
    /// Every port of the block is bound once to make sure nothing else owns
    /// it; the ones not listed are released again and refuse connections.
    pub fn reserve(len: u16, open_offsets: &[u16]) -> Self {
        assert!(len > 0 && open_offsets.iter().all(|&o| o < len));
        let spread = (std::process::id() % 97) as u16 * 256;

        loop {
            let offset = NEXT_OFFSET.fetch_add(len + 1, Ordering::Relaxed);
            let min = BASE + spread.wrapping_add(offset) % (CEILING - BASE);
            let Some(max) = min.checked_add(len - 1).filter(|&m| m < CEILING) else {
                continue;
            };
            if let Some(block) = Self::try_bind(min, max, open_offsets) {
                return block;
            }
        }
    }

    fn try_bind(min: u16, max: u16, open_offsets: &[u16]) -> Option<Self> {
        let mut bound = Vec::new();
        for port in min..=max {
            bound.push((port, TcpListener::bind(("127.0.0.1", port)).ok()?));
        }

        let mut open = Vec::new();
        let mut listeners = Vec::new();
        for (port, listener) in bound {
            if open_offsets.contains(&(port - min)) {
                open.push(port);
                listeners.push(listener);
            }
        }
        open.sort_unstable();
        Some(Self {
            min,
            max,
            open,
            _listeners: listeners,
        })
    }

    /// Listening ports in ascending order.
    pub fn open_ports(&self) -> Vec<u16> {
        self.open.clone()
    }

    pub fn len(&self) -> u64 {
        u64::from(self.max - self.min) + 1
    }
}

/// Path of the compiled binary, used as the child of the process strategy.
pub fn binary() -> std::path::PathBuf {
    std::path::PathBuf::from(env!("CARGO_BIN_EXE_portprobe"))
}
