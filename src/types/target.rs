//! Scan target resolution.
//!
//! A scan names its host as a string; the engine resolves it once, before any
//! probe is built, and every probe of the batch connects to the same address.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// A scan target that has been resolved to an IP address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanTarget {
    /// The original input (hostname or IP string).
    pub original: String,
    /// The resolved IP address.
    pub ip: IpAddr,
}

impl ScanTarget {
    /// Create a new scan target.
    pub fn new(original: impl Into<String>, ip: IpAddr) -> Self {
        Self {
            original: original.into(),
            ip,
        }
    }
}

impl fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.original == self.ip.to_string() {
            write!(f, "{}", self.ip)
        } else {
            write!(f, "{} ({})", self.original, self.ip)
        }
    }
}

/// Error type for target resolution.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TargetError {
    #[error("invalid target: {0}")]
    InvalidFormat(String),
    #[error("failed to resolve hostname '{0}': {1}")]
    DnsResolutionFailed(String, String),
    #[error("no IP addresses found for hostname '{0}'")]
    NoAddressesFound(String),
}

/// Resolve a hostname or IP address string to a [`ScanTarget`].
///
/// IPv4 results are preferred when a name resolves to both families.
pub async fn resolve_target(host: &str) -> Result<ScanTarget, TargetError> {
    let host = host.trim();
    if host.is_empty() {
        return Err(TargetError::InvalidFormat(host.to_string()));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ScanTarget::new(host, ip));
    }

    let addrs: Vec<IpAddr> = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| TargetError::DnsResolutionFailed(host.to_string(), e.to_string()))?
        .map(|addr| addr.ip())
        .collect();

    addrs
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addrs.first())
        .map(|ip| ScanTarget::new(host, *ip))
        .ok_or_else(|| TargetError::NoAddressesFound(host.to_string()))
}
