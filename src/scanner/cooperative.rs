//! Cooperative single-threaded strategies.
//!
//! All probes of a batch run as tasks on one current-thread runtime, so only
//! one of them executes at any moment and results go into a plain `RefCell`.
//! Two shapes are offered:
//!
//! - [`CooperativeFlavor::Race`]: every probe is a future that races its
//!   connect against a timer with `select!`; all are driven by `join_all`.
//! - [`CooperativeFlavor::Scoped`]: every probe is spawned into one `JoinSet`
//!   on a `LocalSet`, bounded by its own `timeout`. The scope does not return
//!   until the set is drained, and dropping it aborts anything left.

use crate::error::{ScanError, ScanResult};
use crate::scanner::aggregate::{Aggregator, OpenPortSet};
use crate::scanner::probe::{connect_cooperative, connect_unbounded};
use crate::scanner::traits::{ProbeBatch, ProbeOutcome, ScanStrategy, StrategyKind};
use async_trait::async_trait;
use futures::future::join_all;
use std::cell::RefCell;
use std::rc::Rc;
use tokio::task::{JoinSet, LocalSet};
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooperativeFlavor {
    Race,
    Scoped,
}

#[derive(Debug, Clone, Copy)]
pub struct CooperativeStrategy {
    flavor: CooperativeFlavor,
}

impl CooperativeStrategy {
    pub fn new(flavor: CooperativeFlavor) -> Self {
        Self { flavor }
    }

    /// Build a current-thread runtime and run the batch on it.
    ///
    /// Must not be called from inside an async context.
    pub fn run_blocking(&self, batch: &ProbeBatch) -> ScanResult<OpenPortSet> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let open = match self.flavor {
            CooperativeFlavor::Race => runtime.block_on(race_all(batch)),
            CooperativeFlavor::Scoped => LocalSet::new().block_on(&runtime, scoped(batch)),
        };
        Ok(open)
    }
}

/// Future/await realization: one `select!` per probe, all joined.
async fn race_all(batch: &ProbeBatch) -> OpenPortSet {
    let aggregator = RefCell::new(Aggregator::new(batch.len()));
    let results = &aggregator;

    join_all(batch.probes().map(move |probe| {
        let ledger = batch.ledger.clone();
        async move {
            let outcome = connect_cooperative(probe, ledger).await;
            trace!(%outcome, "probe finished");
            results.borrow_mut().record(&outcome);
        }
    }))
    .await;

    aggregator.into_inner().finish()
}

/// Structured realization: every probe is a child of one `JoinSet` scope.
async fn scoped(batch: &ProbeBatch) -> OpenPortSet {
    let aggregator = Rc::new(RefCell::new(Aggregator::new(batch.len())));
    scoped_into(batch, Rc::clone(&aggregator)).await;

    match Rc::try_unwrap(aggregator) {
        Ok(aggregator) => aggregator.into_inner().finish(),
        // Unreachable once the scope is drained; keep what was collected.
        Err(shared) => shared.replace(Aggregator::new(batch.len())).finish(),
    }
}

/// Run the batch inside one scope, recording into `aggregator`. A child cut
/// off by its timeout is Closed.
async fn scoped_into(batch: &ProbeBatch, aggregator: Rc<RefCell<Aggregator>>) {
    let mut scope = JoinSet::new();

    for probe in batch.probes() {
        let aggregator = Rc::clone(&aggregator);
        let ledger = batch.ledger.clone();
        let timeout = probe.timeout();
        scope.spawn_local(async move {
            let port = probe.port();
            match tokio::time::timeout(timeout, connect_unbounded(probe, ledger)).await {
                Ok(outcome) => aggregator.borrow_mut().record(&outcome),
                Err(_) => {
                    trace!(%port, "timed out, connect cancelled");
                    aggregator.borrow_mut().record(&ProbeOutcome::Closed(port));
                }
            }
        });
    }

    debug!(tasks = scope.len(), "scope open");
    while let Some(joined) = scope.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "probe task failed");
        }
    }
}

#[async_trait]
impl ScanStrategy for CooperativeStrategy {
    fn kind(&self) -> StrategyKind {
        match self.flavor {
            CooperativeFlavor::Race => StrategyKind::Cooperative,
            CooperativeFlavor::Scoped => StrategyKind::Structured,
        }
    }

    async fn run(&self, batch: &ProbeBatch) -> ScanResult<OpenPortSet> {
        let strategy = *self;
        let batch = batch.clone();
        tokio::task::spawn_blocking(move || strategy.run_blocking(&batch))
            .await
            .map_err(|e| ScanError::WorkerFailed(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
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
    fn test_both_flavors_find_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        for flavor in [CooperativeFlavor::Race, CooperativeFlavor::Scoped] {
            let batch = batch(IpAddr::V4(Ipv4Addr::LOCALHOST), port, port, Duration::from_secs(1));
            let open = CooperativeStrategy::new(flavor).run_blocking(&batch).unwrap();
            assert_eq!(open.to_vec(), vec![port], "{flavor:?}");
            assert_eq!(batch.ledger.outstanding(), 0, "{flavor:?}");
        }
    }

    #[test]
    fn test_timeouts_release_connections() {
        let silent = SilentBlock::reserve(10);
        let timeout = Duration::from_millis(100);
        for flavor in [CooperativeFlavor::Race, CooperativeFlavor::Scoped] {
            let batch = batch(IpAddr::V4(Ipv4Addr::LOCALHOST), silent.min, silent.max, timeout);

            let started = Instant::now();
            let open = CooperativeStrategy::new(flavor).run_blocking(&batch).unwrap();

            assert!(open.is_empty());
            // Tasks overlap: ten timeouts cost about one, not ten.
            assert!(started.elapsed() >= timeout, "{flavor:?}");
            assert!(started.elapsed() < timeout * 5, "{flavor:?}");
            assert_eq!(batch.ledger.acquired(), 10, "{flavor:?}");
            assert_eq!(batch.ledger.released(), 10, "{flavor:?}");
        }
    }

    #[tokio::test]
    async fn test_scoped_timeout_counts_as_closed() {
        let silent = SilentBlock::reserve(2);
        let batch = batch(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            silent.min,
            silent.max,
            Duration::from_millis(100),
        );

        let tally = LocalSet::new()
            .run_until(async {
                let aggregator = Rc::new(RefCell::new(Aggregator::new(batch.len())));
                scoped_into(&batch, Rc::clone(&aggregator)).await;
                let tally = aggregator.borrow().tally();
                tally
            })
            .await;

        assert_eq!(tally.closed, 2);
        assert_eq!(tally.missing, 0);
        assert_eq!(batch.ledger.outstanding(), 0);
    }

    #[test]
    fn test_kind_follows_flavor() {
        assert_eq!(
            CooperativeStrategy::new(CooperativeFlavor::Race).kind(),
            StrategyKind::Cooperative
        );
        assert_eq!(
            CooperativeStrategy::new(CooperativeFlavor::Scoped).kind(),
            StrategyKind::Structured
        );
    }
}
