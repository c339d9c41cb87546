// Copyright 2025 OCL Index Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Worker pool draining the task queue.
//!
//! ```text
//! TaskQueue ─► mpsc ─► Arc<Mutex<Receiver>> ─┬─► worker 0 ─► JobHandler
//!                                            ├─► worker 1 ─► JobHandler
//!                                            └─► worker N ─► JobHandler
//! ```
//!
//! A job runs to completion or failure; there is no cancellation. Failures
//! are logged and counted, never retried at this level. Shutting down closes
//! the channel and releases whatever is still queued, so no once-key or
//! outstanding count outlives the pool.

use async_trait::async_trait;
use ocl_core::OclResult;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::job::Job;
use crate::queue::{QueuedJob, TaskQueue};
use crate::runner::JobOutcome;

/// Executes one job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> OclResult<JobOutcome>;
}

#[derive(Debug, Default)]
struct WorkerStatsInternal {
    completed: AtomicU64,
    failed: AtomicU64,
    abandoned: AtomicU64,
    in_flight: AtomicUsize,
    total_latency_ms: AtomicU64,
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkerStats {
    pub workers: usize,
    pub completed: u64,
    pub failed: u64,
    /// Jobs still queued at shutdown, released without running
    pub abandoned: u64,
    pub in_flight: usize,
    pub avg_latency_ms: f64,
}

pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
    stats: Arc<WorkerStatsInternal>,
    receiver: Arc<Mutex<mpsc::Receiver<QueuedJob>>>,
    queue: TaskQueue,
}

impl WorkerPool {
    /// Spawn `workers` tasks sharing `receiver`.
    pub fn start<H: JobHandler + 'static>(
        queue: TaskQueue,
        receiver: mpsc::Receiver<QueuedJob>,
        handler: Arc<H>,
        workers: usize,
    ) -> Self {
        let shared_receiver = Arc::new(Mutex::new(receiver));
        let stats = Arc::new(WorkerStatsInternal::default());
        let (shutdown, shutdown_rx) = watch::channel(false);

        let handles = (0..workers.max(1))
            .map(|worker_id| {
                let receiver = shared_receiver.clone();
                let queue = queue.clone();
                let handler = handler.clone();
                let stats = stats.clone();
                let shutdown_rx = shutdown_rx.clone();
                tokio::spawn(async move {
                    worker_loop(worker_id, receiver, queue, handler, stats, shutdown_rx).await;
                })
            })
            .collect::<Vec<_>>();

        info!(workers = handles.len(), "Worker pool started");
        Self {
            workers: handles,
            shutdown,
            stats,
            receiver: shared_receiver,
            queue,
        }
    }

    pub fn stats(&self) -> WorkerStats {
        Self::snapshot(&self.stats, self.workers.len())
    }

    /// Stop taking new jobs and wait for running ones to finish.
    ///
    /// Jobs still queued are released, not run: their once-keys are freed
    /// and they count as finished for [`TaskQueue::wait_idle`]. Later
    /// submissions fail with `QueueError::Closed`.
    pub async fn shutdown(self) -> WorkerStats {
        let _ = self.shutdown.send(true);
        let workers = self.workers.len();
        for handle in self.workers {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task panicked");
            }
        }

        let mut rx = self.receiver.lock().await;
        rx.close();
        while let Ok(queued) = rx.try_recv() {
            warn!(job = %queued.job, "Dropping queued job at shutdown");
            self.stats.abandoned.fetch_add(1, Ordering::Relaxed);
            self.queue.complete(&queued);
        }
        drop(rx);
        info!("Worker pool stopped");

        Self::snapshot(&self.stats, workers)
    }

    fn snapshot(stats: &WorkerStatsInternal, workers: usize) -> WorkerStats {
        let completed = stats.completed.load(Ordering::Relaxed);
        let failed = stats.failed.load(Ordering::Relaxed);
        let finished = completed + failed;
        WorkerStats {
            workers,
            completed,
            failed,
            abandoned: stats.abandoned.load(Ordering::Relaxed),
            in_flight: stats.in_flight.load(Ordering::Relaxed),
            avg_latency_ms: if finished > 0 {
                stats.total_latency_ms.load(Ordering::Relaxed) as f64 / finished as f64
            } else {
                0.0
            },
        }
    }
}

async fn worker_loop<H: JobHandler>(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<QueuedJob>>>,
    queue: TaskQueue,
    handler: Arc<H>,
    stats: Arc<WorkerStatsInternal>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        let next = {
            let mut rx = receiver.lock().await;
            tokio::select! {
                biased;
                _ = shutdown.changed() => None,
                job = rx.recv() => job,
            }
        };

        let Some(queued) = next else {
            break;
        };

        stats.in_flight.fetch_add(1, Ordering::Relaxed);
        let waited_ms = queued.enqueued_at.elapsed().as_millis() as u64;
        info!(worker = worker_id, job = %queued.job, waited_ms, "Job started");

        let started = std::time::Instant::now();
        let result = handler.handle(&queued.job).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(outcome) => {
                stats.completed.fetch_add(1, Ordering::Relaxed);
                info!(
                    worker = worker_id,
                    job = %queued.job,
                    elapsed_ms,
                    outcome = %outcome,
                    "Job finished"
                );
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    worker = worker_id,
                    job = %queued.job,
                    elapsed_ms,
                    error = %e,
                    "Job failed"
                );
            }
        }
        stats.total_latency_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
        stats.in_flight.fetch_sub(1, Ordering::Relaxed);
        queue.complete(&queued);
    }

    debug!("Worker {} shutting down", worker_id);
}
