//! Thread-per-probe strategy.
//!
//! Every port gets its own OS thread. Workers share nothing but the mailbox
//! (an mpsc channel); the parent joins every handle before reading it.

use crate::error::{ScanError, ScanResult};
use crate::scanner::aggregate::{Aggregator, OpenPortSet};
use crate::scanner::probe::Prober;
use crate::scanner::traits::{ProbeBatch, ScanStrategy, StrategyKind};
use crate::types::Port;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::{mpsc, Arc};
use std::thread;
use tracing::{debug, warn};

pub struct ThreadStrategy {
    prober: Arc<dyn Prober>,
}

impl ThreadStrategy {
    pub fn new(prober: Arc<dyn Prober>) -> Self {
        Self { prober }
    }

    /// Spawn, join all, then drain the mailbox.
    pub fn run_blocking(&self, batch: &ProbeBatch) -> ScanResult<OpenPortSet> {
        let prober: &dyn Prober = self.prober.as_ref();
        let (mailbox, inbox) = mpsc::channel();
        let mut spawn_error = None;
        let mut lost = Vec::new();

        thread::scope(|scope| {
            let mut workers = Vec::with_capacity(batch.len());
            for probe in batch.probes() {
                let mailbox = mailbox.clone();
                let spawned = thread::Builder::new()
                    .name(format!("probe-{}", probe.port()))
                    .spawn_scoped(scope, move || {
                        // The receiver outlives every worker.
                        let _ = mailbox.send(prober.probe(&probe));
                    });
                match spawned {
                    Ok(handle) => workers.push((probe.port(), handle)),
                    Err(e) => {
                        spawn_error = Some(e);
                        break;
                    }
                }
            }

            debug!(workers = workers.len(), "joining probe threads");
            for (port, handle) in workers {
                if handle.join().is_err() {
                    warn!(%port, "probe thread panicked");
                    lost.push(port);
                }
            }
        });
        drop(mailbox);

        if let Some(e) = spawn_error {
            return Err(ScanError::exhausted("spawning probe threads", e));
        }

        let mut aggregator = Aggregator::new(batch.len());
        let mut reported = BTreeSet::new();
        for outcome in inbox.try_iter() {
            reported.insert(outcome.port());
            aggregator.record(&outcome);
        }
        for port in lost.into_iter().filter(|p: &Port| !reported.contains(p)) {
            aggregator.record_missing(port);
        }
        Ok(aggregator.finish())
    }
}

#[async_trait]
impl ScanStrategy for ThreadStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Threads
    }

    async fn run(&self, batch: &ProbeBatch) -> ScanResult<OpenPortSet> {
        let strategy = Self::new(Arc::clone(&self.prober));
        let batch = batch.clone();
        tokio::task::spawn_blocking(move || strategy.run_blocking(&batch))
            .await
            .map_err(|e| ScanError::WorkerFailed(e.to_string()))?
    }
}
