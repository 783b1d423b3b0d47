//! Result aggregation.
//!
//! Outcomes arrive in whatever order a strategy produces them; the aggregator
//! only keeps which ports were open plus a tally used to check that every
//! probe of the batch was accounted for.

use crate::scanner::traits::ProbeOutcome;
use crate::types::Port;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// The set of ports that answered. Iterates in ascending order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpenPortSet(BTreeSet<Port>);

impl OpenPortSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a port. Returns `false` if it was already present.
    pub fn insert(&mut self, port: Port) -> bool {
        self.0.insert(port)
    }

    pub fn contains(&self, port: Port) -> bool {
        self.0.contains(&port)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Port> + '_ {
        self.0.iter().copied()
    }

    /// Raw port numbers in ascending order.
    pub fn to_vec(&self) -> Vec<u16> {
        self.iter().map(Port::as_u16).collect()
    }
}

impl FromIterator<Port> for OpenPortSet {
    fn from_iter<I: IntoIterator<Item = Port>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for OpenPortSet {
    type Item = Port;
    type IntoIter = std::collections::btree_set::IntoIter<Port>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Per-batch tally of how probes resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub open: usize,
    pub closed: usize,
    pub errored: usize,
    /// Probes with no outcome of their own (deadline, crashed worker or child).
    pub missing: usize,
}

impl Tally {
    pub fn accounted(&self) -> usize {
        self.open + self.closed + self.errored + self.missing
    }
}

/// Collects outcomes for one batch.
#[derive(Debug)]
pub struct Aggregator {
    expected: usize,
    open: OpenPortSet,
    tally: Tally,
}

impl Aggregator {
    /// Start a batch of `expected` probes.
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            open: OpenPortSet::new(),
            tally: Tally::default(),
        }
    }

    /// Record a probe outcome. Only `Open` grows the set.
    pub fn record(&mut self, outcome: &ProbeOutcome) {
        match outcome {
            ProbeOutcome::Open(port) => {
                self.tally.open += 1;
                if !self.open.insert(*port) {
                    warn!(%port, "duplicate open outcome");
                }
            }
            ProbeOutcome::Closed(_) => self.tally.closed += 1,
            ProbeOutcome::Errored(port, cause) => {
                debug!(%port, %cause, "probe errored, treating as not open");
                self.tally.errored += 1;
            }
        }
    }

    /// Record a probe that produced no outcome. It counts as not open.
    pub fn record_missing(&mut self, port: Port) {
        debug!(%port, "no outcome received, treating as not open");
        self.tally.missing += 1;
    }

    pub fn tally(&self) -> Tally {
        self.tally
    }

    /// Close the batch and hand out the open set.
    pub fn finish(self) -> OpenPortSet {
        let tally = self.tally;
        if tally.accounted() != self.expected {
            warn!(
                expected = self.expected,
                accounted = tally.accounted(),
                "batch outcome count mismatch"
            );
        }
        debug!(
            open = tally.open,
            closed = tally.closed,
            errored = tally.errored,
            missing = tally.missing,
            "batch complete"
        );
        self.open
    }
}
