//! Bounded worker pool with futures.
//!
//! A fixed number of named worker threads pull probes off a shared queue.
//! Submitting a probe returns a [`ProbeHandle`], a future for its outcome.
//! The strategy drains handles through `FuturesUnordered`, so outcomes are
//! consumed in completion order and each handle is dropped once consumed.

use crate::error::{ScanError, ScanResult};
use crate::scanner::aggregate::{Aggregator, OpenPortSet};
use crate::scanner::probe::{Probe, Prober};
use crate::scanner::traits::{ProbeBatch, ProbeOutcome, ScanStrategy, StrategyKind};
use crate::types::Port;
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::{mpsc, Arc, Mutex};
use std::task::{Context, Poll};
use std::thread::{self, JoinHandle};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

/// Upper bound on the default worker count.
const MAX_DEFAULT_WORKERS: usize = 32;

/// Default pool size: `min(32, cpus + 4)`.
pub fn default_workers() -> usize {
    let cpus = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    (cpus + 4).min(MAX_DEFAULT_WORKERS)
}

struct Job {
    probe: Probe,
    reply: oneshot::Sender<ProbeOutcome>,
}

/// Fixed-size pool of probe workers.
///
/// Dropping the pool discards queued jobs and detaches the workers; each
/// finishes at most the job it holds. [`WorkerPool::shutdown`] also joins them.
pub struct WorkerPool {
    queue: Option<mpsc::Sender<Job>>,
    jobs: Arc<Mutex<mpsc::Receiver<Job>>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `size` workers. Fails if the OS refuses a thread.
    pub fn start(size: usize, prober: Arc<dyn Prober>) -> ScanResult<Self> {
        let (queue, jobs) = mpsc::channel::<Job>();
        let jobs = Arc::new(Mutex::new(jobs));
        let mut pool = Self {
            queue: Some(queue),
            jobs: Arc::clone(&jobs),
            workers: Vec::with_capacity(size),
        };

        for id in 0..size.max(1) {
            let jobs = Arc::clone(&jobs);
            let prober = Arc::clone(&prober);
            let worker = thread::Builder::new()
                .name(format!("probe-worker-{id}"))
                .spawn(move || worker_loop(&jobs, prober.as_ref()))
                .map_err(|e| ScanError::exhausted("starting pool workers", e))?;
            pool.workers.push(worker);
        }
        Ok(pool)
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue a probe and get a handle to its eventual outcome.
    pub fn submit(&self, probe: Probe) -> ProbeHandle {
        let (reply, outcome) = oneshot::channel();
        if let Some(queue) = &self.queue {
            // A closed queue drops the reply sender; the handle reports that.
            let _ = queue.send(Job { probe, reply });
        }
        ProbeHandle {
            port: probe.port(),
            outcome,
        }
    }

    /// Stop accepting work, discard what is queued and join every worker.
    pub fn shutdown(mut self) {
        self.close();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("pool worker panicked");
            }
        }
    }

    /// Stop accepting work and drop every job no worker has picked up yet.
    ///
    /// Handles of dropped jobs resolve to `Errored`.
    fn close(&mut self) {
        if self.queue.take().is_none() {
            return;
        }
        let discarded = match self.jobs.lock() {
            Ok(jobs) => jobs.try_iter().count(),
            Err(_) => 0,
        };
        if discarded > 0 {
            debug!(discarded, "dropped queued jobs");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.close();
    }
}

fn worker_loop(jobs: &Mutex<mpsc::Receiver<Job>>, prober: &dyn Prober) {
    loop {
        let job = match jobs.lock() {
            Ok(receiver) => receiver.recv(),
            Err(_) => return,
        };
        let Ok(Job { probe, reply }) = job else {
            return;
        };
        trace!(port = %probe.port(), "worker picked up probe");
        // The caller may have stopped listening; that is not our problem.
        let _ = reply.send(prober.probe(&probe));
    }
}

/// Future for a submitted probe.
///
/// Resolves to `Errored` if the worker died before answering.
pub struct ProbeHandle {
    port: Port,
    outcome: oneshot::Receiver<ProbeOutcome>,
}

impl ProbeHandle {
    pub fn port(&self) -> Port {
        self.port
    }
}

impl Future for ProbeHandle {
    type Output = ProbeOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let port = self.port;
        Pin::new(&mut self.outcome).poll(cx).map(|received| {
            received.unwrap_or_else(|_| ProbeOutcome::Errored(port, "worker dropped probe".to_string()))
        })
    }
}

pub struct PoolStrategy {
    prober: Arc<dyn Prober>,
    workers: usize,
}

impl PoolStrategy {
    pub fn new(prober: Arc<dyn Prober>, workers: usize) -> Self {
        Self {
            prober,
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run the batch, calling `on_complete` for each outcome as it arrives.
    pub async fn run_observed<F>(&self, batch: &ProbeBatch, mut on_complete: F) -> ScanResult<OpenPortSet>
    where
        F: FnMut(&ProbeOutcome) + Send,
    {
        let pool = WorkerPool::start(self.workers, Arc::clone(&self.prober))?;
        debug!(workers = pool.size(), probes = batch.len(), "pool started");

        let mut pending: FuturesUnordered<ProbeHandle> =
            batch.probes().map(|probe| pool.submit(probe)).collect();

        let mut aggregator = Aggregator::new(batch.len());
        while let Some(outcome) = pending.next().await {
            on_complete(&outcome);
            aggregator.record(&outcome);
        }

        tokio::task::spawn_blocking(move || pool.shutdown())
            .await
            .map_err(|e| ScanError::WorkerFailed(e.to_string()))?;
        Ok(aggregator.finish())
    }
}

#[async_trait]
impl ScanStrategy for PoolStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Pool
    }

    async fn run(&self, batch: &ProbeBatch) -> ScanResult<OpenPortSet> {
        self.run_observed(batch, |outcome| {
            if outcome.is_open() {
                debug!(port = %outcome.port(), "open");
            }
        })
        .await
    }
}
