//! Port types with validation.
//!
//! `Port` wraps a TCP port number. `PortRange` is the inclusive `[min, max]`
//! range a scan covers; an inverted range cannot be built.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A TCP port number.
///
/// Port 0 is representable so a range may include it, but it is never
/// connectable: probing it always yields `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Port(u16);

impl Port {
    /// Create a new Port.
    #[inline]
    pub const fn new(port: u16) -> Self {
        Self(port)
    }

    /// Get the raw port number.
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Whether a connection to this port can be attempted at all.
    #[inline]
    pub const fn is_connectable(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for Port {
    fn from(port: u16) -> Self {
        Self(port)
    }
}

impl From<Port> for u16 {
    fn from(port: Port) -> Self {
        port.0
    }
}

/// Error type for port range validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("max_port ({1}) should be greater than or equal to min_port ({0})")]
    InvalidRange(u16, u16),
}

/// An inclusive range of ports. Always holds at least one port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    start: Port,
    end: Port,
}

impl PortRange {
    /// Create a new port range.
    pub fn new(start: Port, end: Port) -> Result<Self, PortError> {
        if start.0 > end.0 {
            Err(PortError::InvalidRange(start.0, end.0))
        } else {
            Ok(Self { start, end })
        }
    }

    /// Build a range from raw bounds as given on a command line.
    pub fn from_bounds(min: u16, max: u16) -> Result<Self, PortError> {
        Self::new(Port(min), Port(max))
    }

    pub const fn start(&self) -> Port {
        self.start
    }

    pub const fn end(&self) -> Port {
        self.end
    }

    /// Get the number of ports in this range.
    pub const fn len(&self) -> usize {
        (self.end.0 - self.start.0) as usize + 1
    }

    /// Check if the range is empty (never true for valid ranges).
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Iterate over all ports in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = Port> {
        (self.start.0..=self.end.0).map(Port)
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_zero_is_not_connectable() {
        assert!(!Port::new(0).is_connectable());
        assert!(Port::new(1).is_connectable());
        assert!(Port::from(65535).is_connectable());
    }

    #[test]
    fn test_port_range_len() {
        let range = PortRange::from_bounds(1000, 1010).unwrap();
        assert_eq!(range.len(), 11);
        assert_eq!(range.iter().count(), 11);
        assert_eq!(PortRange::from_bounds(0, 65535).unwrap().len(), 65536);
    }

    #[test]
    fn test_port_range_is_ascending() {
        let range = PortRange::from_bounds(0, 3).unwrap();
        let ports: Vec<u16> = range.iter().map(Port::as_u16).collect();
        assert_eq!(ports, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_inverted_range_rejected() {
        assert_eq!(
            PortRange::from_bounds(10, 5),
            Err(PortError::InvalidRange(10, 5))
        );
        assert_eq!(
            PortRange::from_bounds(10, 0),
            Err(PortError::InvalidRange(10, 0))
        );
    }

    #[test]
    fn test_range_display() {
        assert_eq!(PortRange::from_bounds(443, 443).unwrap().to_string(), "443");
        assert_eq!(PortRange::from_bounds(1, 3).unwrap().to_string(), "1-3");
    }
}
