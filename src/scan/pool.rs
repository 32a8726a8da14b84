//! Fixed-size worker pool over a pre-filled, closed work queue.
//!
//! `run` loads every item into a bounded queue sized to the batch, closes
//! it, and starts `size` workers that pull until the queue is empty. The
//! call returns only after every worker has exited, which is the barrier
//! the page loop relies on.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn, Instrument};

use super::ScanTally;
use crate::errors::ScanError;

/// What a worker does after one of its items fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerErrorPolicy {
    /// Stop pulling from the queue for the rest of this batch. Other
    /// workers keep draining, so the batch still completes with one fewer
    /// worker.
    #[default]
    HaltWorker,
    /// Report the failure and move on to the next item.
    Continue,
}

#[derive(Debug)]
pub struct PoolOutput<T> {
    /// Results of every successful item, in no particular order.
    pub results: Vec<T>,
    /// Errors forwarded by workers, one per failed item.
    pub errors: Vec<ScanError>,
    pub cancelled: bool,
}

impl<T> Default for PoolOutput<T> {
    fn default() -> Self {
        Self {
            results: Vec::new(),
            errors: Vec::new(),
            cancelled: false,
        }
    }
}

pub struct WorkerPool {
    size: usize,
    policy: WorkerErrorPolicy,
    tally: Arc<ScanTally>,
}

impl WorkerPool {
    /// `tally` is incremented once per successfully processed item.
    pub fn new(size: usize, policy: WorkerErrorPolicy, tally: Arc<ScanTally>) -> Self {
        Self {
            size: size.max(1),
            policy,
            tally,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn tally(&self) -> &Arc<ScanTally> {
        &self.tally
    }

    /// Process `items` with `task` and wait for every worker to exit.
    pub async fn run<I, T, F, Fut>(
        &self,
        items: Vec<I>,
        cancel: &CancellationToken,
        task: F,
    ) -> PoolOutput<T>
    where
        I: Display + Send + 'static,
        T: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<T>, ScanError>> + Send + 'static,
    {
        if items.is_empty() {
            return PoolOutput::default();
        }

        let (tx, rx) = mpsc::channel(items.len());
        for item in items {
            // capacity equals the batch size, so this never waits
            if tx.send(item).await.is_err() {
                break;
            }
        }
        drop(tx);

        let queue = Arc::new(Mutex::new(rx));
        let (err_tx, mut err_rx) = mpsc::unbounded_channel();
        let task = Arc::new(task);
        let mut workers = JoinSet::new();

        for worker in 0..self.size {
            let queue = Arc::clone(&queue);
            let task = Arc::clone(&task);
            let err_tx = err_tx.clone();
            let tally = Arc::clone(&self.tally);
            let cancel = cancel.clone();
            let policy = self.policy;

            // workers log under the caller's span (the cycle id)
            let worker_task = async move {
                let mut local = Vec::new();
                loop {
                    let next = queue.lock().await.recv().await;
                    let Some(item) = next else { break };
                    let label = item.to_string();

                    let result = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        result = task(item) => result,
                    };

                    match result {
                        Ok(mut found) => {
                            local.append(&mut found);
                            tally.increment();
                        }
                        Err(e) => {
                            warn!(worker, resource_id = %label, error = %e, "worker item failed");
                            let _ = err_tx.send(e);
                            if policy == WorkerErrorPolicy::HaltWorker {
                                break;
                            }
                        }
                    }
                }
                local
            };
            workers.spawn(worker_task.in_current_span());
        }
        drop(err_tx);

        let mut out = PoolOutput::default();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(mut local) => out.results.append(&mut local),
                Err(e) => error!(error = %e, "worker task aborted"),
            }
        }
        while let Ok(e) = err_rx.try_recv() {
            out.errors.push(e);
        }
        out.cancelled = cancel.is_cancelled();
        out
    }
}
