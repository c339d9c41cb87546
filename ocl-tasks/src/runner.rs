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

//! Task entry points.
//!
//! [`TaskRunner`] owns the store, the reindexer, the export writer and a
//! [`JobSink`] for follow-up work. The worker pool calls it through
//! [`JobHandler`]; request handlers call the reference batch and delete
//! operations directly.

use async_trait::async_trait;
use ocl_core::{
    ConceptId, ContainerKind, ContainerVersionId, MappingId, OclError, OclResult,
    ReferenceBatchRequest, ReferenceDiff, ReferenceError, UserId, VersionId, VersionKind,
};
use ocl_index::{IncrementalReindexer, ReindexReport, SearchIndex};
use ocl_storage::{
    add_references, delete_concept, delete_mapping, expand_expressions, remove_references,
    replace_references, require_container_version, ExportSerializer, ExportWriter,
    ReferenceUpdate, ResourceStore,
};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::job::Job;
use crate::queue::JobSink;
use crate::worker::JobHandler;

/// What a finished job produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Exported(PathBuf),
    Reindexed(ReindexReport),
    /// Nothing to do (e.g. an empty diff)
    Skipped,
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Exported(path) => write!(f, "exported {}", path.display()),
            JobOutcome::Reindexed(report) => write!(
                f,
                "indexed {} concepts, {} mappings",
                report.concepts_indexed, report.mappings_indexed
            ),
            JobOutcome::Skipped => f.write_str("skipped"),
        }
    }
}

/// Result of a reference batch: what changed, what was rejected, and the
/// follow-up reindex job if one was queued.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub diff: ReferenceDiff,
    pub errors: Vec<ReferenceError>,
    pub reindex_job: Option<u64>,
}

impl BatchOutcome {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Versions deleted from the store and documents dropped from the index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub versions: Vec<VersionId>,
    pub documents_removed: usize,
}

pub struct TaskRunner<S: ?Sized, I: ?Sized> {
    store: Arc<S>,
    reindexer: Arc<IncrementalReindexer<S, I>>,
    exporter: Arc<dyn ExportWriter>,
    sink: Arc<dyn JobSink>,
}

impl<S, I> TaskRunner<S, I>
where
    S: ResourceStore + ?Sized + 'static,
    I: SearchIndex + ?Sized + 'static,
{
    pub fn new(
        store: Arc<S>,
        reindexer: Arc<IncrementalReindexer<S, I>>,
        exporter: Arc<dyn ExportWriter>,
        sink: Arc<dyn JobSink>,
    ) -> Self {
        Self {
            store,
            reindexer,
            exporter,
            sink,
        }
    }

    pub fn reindexer(&self) -> &Arc<IncrementalReindexer<S, I>> {
        &self.reindexer
    }

    /// Write the export artifact of a container version.
    pub async fn export(
        &self,
        version_id: &ContainerVersionId,
        resource_type: ContainerKind,
    ) -> OclResult<PathBuf> {
        let version = require_container_version(self.store.as_ref(), version_id).await?;
        info!(version = %version_id, resource_type = %resource_type, "Export started");
        let path = self
            .exporter
            .write_export(&version, resource_type, ExportSerializer::Detail)
            .await?;
        Ok(path)
    }

    /// Full resync of a container version's concepts and mappings.
    pub async fn reindex_container_children(
        &self,
        version_id: &ContainerVersionId,
        kind: ContainerKind,
    ) -> OclResult<ReindexReport> {
        let version = require_container_version(self.store.as_ref(), version_id).await?;
        if version.kind != kind {
            return Err(OclError::invalid_argument(format!(
                "{version_id} is a {} version, not a {kind}",
                version.kind
            )));
        }
        self.reindexer.reindex_children(version_id).await
    }

    /// Reindex only the references in `diff`, added and removed alike.
    pub async fn reindex_after_reference_change(
        &self,
        version_id: &ContainerVersionId,
        diff: &ReferenceDiff,
    ) -> OclResult<ReindexReport> {
        if diff.is_empty() {
            return Ok(ReindexReport::default());
        }
        self.reindexer
            .reindex_references(version_id, diff.changed())
            .await
    }

    /// Expand and add a bulk reference request, then queue the delta reindex.
    ///
    /// Rejected expressions come back in [`BatchOutcome::errors`]; they do
    /// not fail the call.
    pub async fn apply_reference_batch(
        &self,
        request: &ReferenceBatchRequest,
        user: Option<&UserId>,
        version_id: &ContainerVersionId,
    ) -> OclResult<BatchOutcome> {
        let expressions = expand_expressions(self.store.as_ref(), request).await?;
        info!(
            collection = %version_id,
            user = ?user,
            expressions = expressions.len(),
            "Applying reference batch"
        );
        let update = add_references(self.store.as_ref(), version_id, &expressions).await?;
        self.schedule_reindex(version_id, update).await
    }

    /// Remove references and queue the delta reindex.
    pub async fn remove_reference_batch(
        &self,
        expressions: &[String],
        version_id: &ContainerVersionId,
    ) -> OclResult<BatchOutcome> {
        let update = remove_references(self.store.as_ref(), version_id, expressions).await?;
        self.schedule_reindex(version_id, update).await
    }

    /// Replace the whole reference list and queue the delta reindex.
    pub async fn replace_reference_list(
        &self,
        expressions: &[String],
        version_id: &ContainerVersionId,
    ) -> OclResult<BatchOutcome> {
        let update = replace_references(self.store.as_ref(), version_id, expressions).await?;
        self.schedule_reindex(version_id, update).await
    }

    /// Delete a concept and drop its documents from the search index.
    pub async fn delete_concept(&self, id: &ConceptId) -> OclResult<DeleteOutcome> {
        let versions = delete_concept(self.store.as_ref(), id).await?;
        let documents_removed = self
            .reindexer
            .remove_documents(VersionKind::ConceptVersion, &versions)
            .await?;
        info!(concept = %id, documents_removed, "Concept deleted");
        Ok(DeleteOutcome {
            versions,
            documents_removed,
        })
    }

    pub async fn delete_mapping(&self, id: &MappingId) -> OclResult<DeleteOutcome> {
        let versions = delete_mapping(self.store.as_ref(), id).await?;
        let documents_removed = self
            .reindexer
            .remove_documents(VersionKind::MappingVersion, &versions)
            .await?;
        info!(mapping = %id, documents_removed, "Mapping deleted");
        Ok(DeleteOutcome {
            versions,
            documents_removed,
        })
    }

    async fn schedule_reindex(
        &self,
        version_id: &ContainerVersionId,
        update: ReferenceUpdate,
    ) -> OclResult<BatchOutcome> {
        let diff = update.diff();
        let mut outcome = BatchOutcome {
            diff: diff.clone(),
            errors: update.errors,
            reindex_job: None,
        };

        if !diff.is_empty() {
            let job = Job::ReindexReferenceChange {
                version_id: version_id.clone(),
                diff,
            };
            match self.sink.submit(job).await {
                Ok(id) => outcome.reindex_job = Some(id),
                Err(e) => {
                    warn!(collection = %version_id, error = %e, "Could not queue reindex");
                    return Err(e.into());
                }
            }
        }
        Ok(outcome)
    }
}

#[async_trait]
impl<S, I> JobHandler for TaskRunner<S, I>
where
    S: ResourceStore + ?Sized + 'static,
    I: SearchIndex + ?Sized + 'static,
{
    async fn handle(&self, job: &Job) -> OclResult<JobOutcome> {
        match job {
            Job::ExportSource { version_id } => self
                .export(version_id, ContainerKind::Source)
                .await
                .map(JobOutcome::Exported),
            Job::ExportCollection { version_id } => self
                .export(version_id, ContainerKind::Collection)
                .await
                .map(JobOutcome::Exported),
            Job::ReindexChildren { version_id, kind } => self
                .reindex_container_children(version_id, *kind)
                .await
                .map(JobOutcome::Reindexed),
            Job::ReindexReferenceChange { version_id, diff } if diff.is_empty() => {
                info!(collection = %version_id, "Empty reference diff, nothing to reindex");
                Ok(JobOutcome::Skipped)
            }
            Job::ReindexReferenceChange { version_id, diff } => self
                .reindex_after_reference_change(version_id, diff)
                .await
                .map(JobOutcome::Reindexed),
        }
    }
}
