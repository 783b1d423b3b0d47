//! Sequential strategy: one probe at a time, ascending port order.

use crate::error::{ScanError, ScanResult};
use crate::scanner::aggregate::{Aggregator, OpenPortSet};
use crate::scanner::probe::Prober;
use crate::scanner::traits::{ProbeBatch, ScanStrategy, StrategyKind};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Baseline strategy. Worst case wall time is `ports * timeout`.
pub struct SequentialStrategy {
    prober: Arc<dyn Prober>,
}

impl SequentialStrategy {
    pub fn new(prober: Arc<dyn Prober>) -> Self {
        Self { prober }
    }

    /// Run the batch on the calling thread.
    pub fn run_blocking(&self, batch: &ProbeBatch) -> OpenPortSet {
        let mut aggregator = Aggregator::new(batch.len());
        for probe in batch.probes() {
            let outcome = self.prober.probe(&probe);
            if outcome.is_open() {
                debug!(port = %outcome.port(), "open");
            }
            aggregator.record(&outcome);
        }
        aggregator.finish()
    }
}

#[async_trait]
impl ScanStrategy for SequentialStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Sequential
    }

    async fn run(&self, batch: &ProbeBatch) -> ScanResult<OpenPortSet> {
        let strategy = Self::new(Arc::clone(&self.prober));
        let batch = batch.clone();
        tokio::task::spawn_blocking(move || strategy.run_blocking(&batch))
            .await
            .map_err(|e| ScanError::WorkerFailed(e.to_string()))
    }
}
