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

//! OCL Worker
//!
//! Wires the record store, search index, task queue and worker pool
//! together from a [`WorkerConfig`]. The `ocl-worker` binary is a thin
//! clap front end over [`Worker`].

pub mod config;

use anyhow::{Context, Result};
use ocl_core::{
    ConceptId, ContainerKind, ContainerVersionId, MappingId, ReferenceBatchRequest, VersionId,
    VersionKind,
};
use ocl_index::{IncrementalReindexer, MemorySearchIndex, SearchIndex};
use ocl_storage::{require_container_version, FsExportWriter, MemoryStore};
use ocl_tasks::{
    BatchOutcome, DeleteOutcome, Job, JobHandler, JobOutcome, JobSink, QueueError, QueuedJob,
    TaskQueue, TaskRunner, WorkerPool, WorkerStats,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::WorkerConfig;

pub type Runner = TaskRunner<MemoryStore, MemorySearchIndex>;

/// Install the global fmt subscriber, filtered by `RUST_LOG`.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ocl_worker=info,ocl_tasks=info,ocl_index=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Processing state and counts of one container version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerStatus {
    pub id: ContainerVersionId,
    pub kind: ContainerKind,
    pub uri: String,
    pub processing: bool,
    pub released: bool,
    pub concepts: usize,
    pub mappings: usize,
    pub references: usize,
    pub indexed_concepts: usize,
    pub indexed_mappings: usize,
}

pub struct Worker {
    config: WorkerConfig,
    store: Arc<MemoryStore>,
    index: Arc<MemorySearchIndex>,
    queue: TaskQueue,
    receiver: Option<mpsc::Receiver<QueuedJob>>,
    runner: Arc<Runner>,
}

impl Worker {
    /// Open the store and index under the configured data directory.
    pub async fn bootstrap(config: WorkerConfig) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(
            MemoryStore::open(config.store_dir())
                .await
                .with_context(|| format!("opening store at {}", config.store_dir().display()))?,
        );
        let index = Arc::new(
            MemorySearchIndex::open(config.index_snapshot()).with_context(|| {
                format!("opening index at {}", config.index_snapshot().display())
            })?,
        );

        let (queue, receiver) = TaskQueue::new(&config.queue);
        let reindexer = Arc::new(IncrementalReindexer::new(
            store.clone(),
            index.clone(),
            config.reindex_config(),
        ));
        let exporter = Arc::new(FsExportWriter::new(store.clone(), config.export_config()));
        let runner = Arc::new(TaskRunner::new(
            store.clone(),
            reindexer,
            exporter,
            Arc::new(queue.clone()),
        ));

        tracing::info!(
            data_dir = %config.storage.data_dir.display(),
            workers = config.queue.workers,
            "Worker bootstrapped"
        );

        Ok(Self {
            config,
            store,
            index,
            queue,
            receiver: Some(receiver),
            runner,
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Spawn the worker pool. The receiver can only be handed out once.
    pub fn start_pool(&mut self) -> Result<WorkerPool> {
        let receiver = self
            .receiver
            .take()
            .context("worker pool already started")?;
        Ok(WorkerPool::start(
            self.queue.clone(),
            receiver,
            self.runner.clone(),
            self.config.queue.workers,
        ))
    }

    /// Run one job on the calling task, bypassing the queue.
    pub async fn execute(&self, job: &Job) -> Result<JobOutcome> {
        let outcome = self.runner.handle(job).await?;
        self.flush()?;
        Ok(outcome)
    }

    /// Add references to a collection version and wait for the delta reindex.
    pub async fn add_references(
        &mut self,
        request: &ReferenceBatchRequest,
        version_id: &ContainerVersionId,
    ) -> Result<BatchOutcome> {
        let pool = self.start_pool()?;
        let result = self
            .runner
            .apply_reference_batch(request, None, version_id)
            .await;
        self.queue.wait_idle().await;
        let stats = pool.shutdown().await;
        self.flush()?;

        let outcome = result?;
        if stats.failed > 0 {
            anyhow::bail!("reindex of {version_id} failed, see log for details");
        }
        Ok(outcome)
    }

    /// Feed JSON-lines jobs from `input` into the pool until EOF, then wait
    /// for the queue to drain.
    ///
    /// Unparseable lines and duplicate exports are logged and skipped.
    pub async fn run_jobs<R>(&mut self, input: R) -> Result<WorkerStats>
    where
        R: AsyncBufRead + Unpin,
    {
        let pool = self.start_pool()?;
        let mut lines = input.lines();
        let mut line_no = 0usize;

        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let job: Job = match serde_json::from_str(line) {
                Ok(job) => job,
                Err(e) => {
                    tracing::warn!(line = line_no, error = %e, "Skipping malformed job");
                    continue;
                }
            };

            match self.queue.submit(job).await {
                Ok(id) => tracing::debug!(line = line_no, job_id = id, "Job queued"),
                Err(QueueError::AlreadyQueued(key)) => {
                    tracing::warn!(line = line_no, key = %key, "Job already queued, skipping");
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.queue.wait_idle().await;
        let stats = pool.shutdown().await;
        self.flush()?;
        tracing::info!(
            completed = stats.completed,
            failed = stats.failed,
            abandoned = stats.abandoned,
            "Job stream drained"
        );
        Ok(stats)
    }

    /// Delete a concept with its versions and drop its search documents.
    pub async fn delete_concept(&self, id: &ConceptId) -> Result<DeleteOutcome> {
        let outcome = self.runner.delete_concept(id).await?;
        self.flush()?;
        Ok(outcome)
    }

    pub async fn delete_mapping(&self, id: &MappingId) -> Result<DeleteOutcome> {
        let outcome = self.runner.delete_mapping(id).await?;
        self.flush()?;
        Ok(outcome)
    }

    pub async fn status(&self, version_id: &ContainerVersionId) -> Result<ContainerStatus> {
        let version = require_container_version(self.store.as_ref(), version_id).await?;
        Ok(ContainerStatus {
            indexed_concepts: self
                .count_indexed(VersionKind::ConceptVersion, &version.concepts)
                .await?,
            indexed_mappings: self
                .count_indexed(VersionKind::MappingVersion, &version.mappings)
                .await?,
            id: version.id,
            kind: version.kind,
            uri: version.uri,
            processing: version.processing,
            released: version.released,
            concepts: version.concepts.len(),
            mappings: version.mappings.len(),
            references: version.references.len(),
        })
    }

    async fn count_indexed(&self, kind: VersionKind, ids: &[VersionId]) -> Result<usize> {
        let mut count = 0;
        for id in ids {
            if self.index.get(kind, id).await?.is_some() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Persist the index snapshot.
    pub fn flush(&self) -> Result<()> {
        self.index.flush().context("flushing search index")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocl_core::ExpressionSelector;
    use ocl_storage::fixtures::{create_collection, OclTestContext};
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> WorkerConfig {
        let mut config = WorkerConfig::default();
        config.storage.data_dir = dir.path().join("data");
        config.queue.workers = 2;
        config
    }

    async fn seeded_worker(dir: &TempDir) -> (Worker, OclTestContext) {
        let worker = Worker::bootstrap(config_in(dir)).await.unwrap();
        let ctx = OclTestContext::setup_with(worker.store().clone())
            .await
            .unwrap();
        (worker, ctx)
    }

    #[tokio::test]
    async fn test_add_references_reindexes_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let (mut worker, ctx) = seeded_worker(&dir).await;
        let (_, collection) = create_collection(
            worker.store().as_ref(),
            &ctx.user,
            Some(&ctx.organization),
            Some("Starter"),
        )
        .await
        .unwrap();

        let request = ReferenceBatchRequest {
            concepts: ExpressionSelector::All,
            uri: Some(ctx.source.uri.clone()),
            ..Default::default()
        };
        let outcome = worker.add_references(&request, &collection.id).await.unwrap();
        assert_eq!(outcome.diff.added.len(), 7);
        assert!(outcome.reindex_job.is_some());

        let status = worker.status(&collection.id).await.unwrap();
        assert_eq!(status.kind, ContainerKind::Collection);
        assert_eq!(status.references, 7);
        assert_eq!(status.indexed_concepts, 7);
        assert!(!status.processing);
        assert!(worker.config().index_snapshot().exists());
        drop(worker);

        let reopened = Worker::bootstrap(config_in(&dir)).await.unwrap();
        let status = reopened.status(&collection.id).await.unwrap();
        assert_eq!(status.concepts, 7);
        assert_eq!(status.indexed_concepts, 7);
    }

    #[tokio::test]
    async fn test_run_jobs_skips_bad_lines_and_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let (mut worker, ctx) = seeded_worker(&dir).await;
        let head = ctx.source_head.id.clone();

        let export = serde_json::to_string(&Job::ExportSource {
            version_id: head.clone(),
        })
        .unwrap();
        let reindex = serde_json::to_string(&Job::ReindexChildren {
            version_id: head.clone(),
            kind: ContainerKind::Source,
        })
        .unwrap();
        let input = format!("{reindex}\nnot json\n\n{export}\n");

        let stats = worker.run_jobs(input.as_bytes()).await.unwrap();
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.failed, 0);
        assert_eq!(worker.status(&head).await.unwrap().indexed_concepts, 7);
        assert!(worker.start_pool().is_err());
    }

    #[tokio::test]
    async fn test_delete_concept_drops_its_document() {
        let dir = tempfile::tempdir().unwrap();
        let (worker, ctx) = seeded_worker(&dir).await;
        let head = ctx.source_head.id.clone();
        worker
            .execute(&Job::ReindexChildren {
                version_id: head.clone(),
                kind: ContainerKind::Source,
            })
            .await
            .unwrap();

        let drug = ctx.concept("Drug").unwrap();
        let outcome = worker.delete_concept(&drug.id).await.unwrap();
        assert_eq!(outcome.documents_removed, 1);

        let status = worker.status(&head).await.unwrap();
        assert_eq!(status.concepts, 6);
        assert_eq!(status.indexed_concepts, 6);
        drop(worker);

        let reopened = Worker::bootstrap(config_in(&dir)).await.unwrap();
        assert_eq!(
            reopened
                .index
                .len(VersionKind::ConceptVersion)
                .await
                .unwrap(),
            6
        );
        assert!(reopened.delete_concept(&drug.id).await.is_err());
    }

    #[tokio::test]
    async fn test_execute_wrong_kind_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (worker, ctx) = seeded_worker(&dir).await;

        let err = worker
            .execute(&Job::ReindexChildren {
                version_id: ctx.source_head.id.clone(),
                kind: ContainerKind::Collection,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not a collection"));

        let outcome = worker
            .execute(&Job::ExportSource {
                version_id: ctx.source_head.id.clone(),
            })
            .await
            .unwrap();
        assert!(matches!(outcome, JobOutcome::Exported(path) if path.exists()));
    }
}
