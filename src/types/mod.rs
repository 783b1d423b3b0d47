//! Core type definitions using newtype patterns for type safety.
//!
//! Inverted ranges are rejected at construction, so the engine never sees
//! a batch it should not attempt.

mod port;
mod target;

pub use port::{Port, PortError, PortRange};
pub use target::{resolve_target, ScanTarget, TargetError};
