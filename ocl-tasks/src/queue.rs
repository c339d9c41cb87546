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

//! Task queue with once-per-key admission.
//!
//! Jobs travel over a bounded `mpsc` channel. Jobs that carry a once-key
//! (exports) are admitted only if no job with the same key is queued or
//! running; the key is released when the worker finishes the job.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ocl_core::OclError;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};

use crate::job::Job;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Job already queued or running: {0}")]
    AlreadyQueued(String),

    #[error("Task queue is closed")]
    Closed,
}

pub type QueueResult<T> = Result<T, QueueError>;

impl From<QueueError> for OclError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::AlreadyQueued(key) => {
                OclError::Validation(format!("job already queued: {key}"))
            }
            QueueError::Closed => OclError::Transient("task queue is closed".into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Channel buffer size (backpressure control)
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_capacity() -> usize {
    1024
}

fn default_workers() -> usize {
    4
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            workers: default_workers(),
        }
    }
}

/// A job as it sits in the channel.
#[derive(Debug)]
pub struct QueuedJob {
    pub id: u64,
    pub job: Job,
    pub once_key: Option<String>,
    pub enqueued_at: Instant,
}

/// Where producers hand off follow-up work.
#[async_trait]
pub trait JobSink: Send + Sync {
    async fn submit(&self, job: Job) -> QueueResult<u64>;
}

struct QueueInner {
    sender: mpsc::Sender<QueuedJob>,
    once_keys: DashMap<String, u64>,
    next_id: AtomicU64,
    outstanding: AtomicUsize,
    idle: Notify,
}

/// Producer handle; cheap to clone.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

impl TaskQueue {
    /// Create the queue and the receiver the worker pool will drain.
    pub fn new(config: &QueueConfig) -> (Self, mpsc::Receiver<QueuedJob>) {
        let (sender, receiver) = mpsc::channel(config.capacity.max(1));
        let queue = Self {
            inner: Arc::new(QueueInner {
                sender,
                once_keys: DashMap::new(),
                next_id: AtomicU64::new(1),
                outstanding: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        };
        (queue, receiver)
    }

    /// Submitted jobs not yet finished (queued or running).
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::SeqCst)
    }

    pub fn is_claimed(&self, key: &str) -> bool {
        self.inner.once_keys.contains_key(key)
    }

    /// Mark a job finished and release its once-key.
    pub fn complete(&self, queued: &QueuedJob) {
        if let Some(key) = &queued.once_key {
            self.inner
                .once_keys
                .remove_if(key, |_, owner| *owner == queued.id);
        }
        self.finish_one();
    }

    fn finish_one(&self) {
        if self.inner.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
    }

    /// Wait until every submitted job has finished.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.outstanding() == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl JobSink for TaskQueue {
    async fn submit(&self, job: Job) -> QueueResult<u64> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let once_key = job.once_key();

        if let Some(key) = &once_key {
            match self.inner.once_keys.entry(key.clone()) {
                Entry::Occupied(_) => {
                    tracing::info!(key = %key, "Rejected duplicate job");
                    return Err(QueueError::AlreadyQueued(key.clone()));
                }
                Entry::Vacant(slot) => {
                    slot.insert(id);
                }
            }
        }

        self.inner.outstanding.fetch_add(1, Ordering::SeqCst);
        let name = job.name();
        let queued = QueuedJob {
            id,
            job,
            once_key,
            enqueued_at: Instant::now(),
        };

        if let Err(mpsc::error::SendError(rejected)) = self.inner.sender.send(queued).await {
            if let Some(key) = &rejected.once_key {
                self.inner.once_keys.remove(key);
            }
            self.finish_one();
            return Err(QueueError::Closed);
        }

        tracing::debug!(job = name, id, "Job queued");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocl_core::{ContainerKind, ContainerVersionId};
    use std::time::Duration;

    fn export(id: &str) -> Job {
        Job::ExportSource {
            version_id: ContainerVersionId::from(id),
        }
    }

    #[tokio::test]
    async fn test_duplicate_export_rejected_until_complete() {
        let (queue, mut rx) = TaskQueue::new(&QueueConfig::default());

        queue.submit(export("v1")).await.unwrap();
        assert_eq!(
            queue.submit(export("v1")).await,
            Err(QueueError::AlreadyQueued("export_source:v1".into()))
        );
        queue.submit(export("v2")).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert!(queue.is_claimed("export_source:v1"));
        queue.complete(&first);
        assert!(!queue.is_claimed("export_source:v1"));
        queue.submit(export("v1")).await.unwrap();
        assert_eq!(queue.outstanding(), 2);
    }

    #[tokio::test]
    async fn test_reindex_jobs_are_never_coalesced() {
        let (queue, _rx) = TaskQueue::new(&QueueConfig::default());
        let job = Job::ReindexChildren {
            version_id: ContainerVersionId::from("v1"),
            kind: ContainerKind::Collection,
        };
        queue.submit(job.clone()).await.unwrap();
        queue.submit(job).await.unwrap();
        assert_eq!(queue.outstanding(), 2);
    }

    #[tokio::test]
    async fn test_closed_queue_releases_key() {
        let (queue, rx) = TaskQueue::new(&QueueConfig::default());
        drop(rx);
        assert_eq!(queue.submit(export("v1")).await, Err(QueueError::Closed));
        assert!(!queue.is_claimed("export_source:v1"));
        assert_eq!(queue.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_wait_idle_returns_after_completion() {
        let (queue, mut rx) = TaskQueue::new(&QueueConfig::default());
        queue.submit(export("v1")).await.unwrap();

        let worker = queue.clone();
        tokio::spawn(async move {
            let job = rx.recv().await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            worker.complete(&job);
        });

        tokio::time::timeout(Duration::from_secs(2), queue.wait_idle())
            .await
            .unwrap();
        assert_eq!(queue.outstanding(), 0);
    }
}
