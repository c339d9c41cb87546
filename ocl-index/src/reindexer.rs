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

//! Incremental reindexing of container versions.
//!
//! ```text
//! lock(container) ─► processing=true ─► resolve ids ─► build docs ─► upsert
//!                                                                      │
//!                    processing=false ◄────────── always ◄─────────────┘
//! ```
//!
//! The `processing` flag is cleared whether or not the push succeeded. The
//! per-container mutex keeps two reindex runs for the same version from
//! interleaving their flag updates inside one process; its map entry is
//! dropped once no run holds or waits on it.
//!
//! Version identifiers whose record is gone are reported as missing and
//! their documents are removed from the index.

use dashmap::DashMap;
use ocl_core::{
    with_retry, CollectionReference, ContainerVersionId, Identifier, OclError, OclResult,
    ResourceKind, RetryPolicy, VersionId, VersionKind,
};
use ocl_storage::{require_container_version, ResourceStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::document::build_documents;
use crate::resolver::{resolve, MissingIdPolicy};
use crate::search::SearchIndex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReindexConfig {
    /// Deadline for each index call
    #[serde(default = "default_index_timeout_ms")]
    pub index_timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub missing_ids: MissingIdPolicy,
}

fn default_index_timeout_ms() -> u64 {
    30_000
}

impl Default for ReindexConfig {
    fn default() -> Self {
        Self {
            index_timeout_ms: default_index_timeout_ms(),
            retry: RetryPolicy::default(),
            missing_ids: MissingIdPolicy::default(),
        }
    }
}

impl ReindexConfig {
    pub fn index_timeout(&self) -> Duration {
        Duration::from_millis(self.index_timeout_ms)
    }
}

/// What a reindex run pushed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReindexReport {
    pub concepts_indexed: usize,
    pub mappings_indexed: usize,
    /// Identifiers that resolved to nothing (reporting policy only)
    pub missing: Vec<Identifier>,
    /// Stale documents removed for missing version identifiers
    pub documents_removed: usize,
}

pub struct IncrementalReindexer<S: ?Sized, I: ?Sized> {
    store: Arc<S>,
    index: Arc<I>,
    config: ReindexConfig,
    locks: DashMap<ContainerVersionId, Arc<Mutex<()>>>,
}

impl<S, I> IncrementalReindexer<S, I>
where
    S: ResourceStore + ?Sized,
    I: SearchIndex + ?Sized,
{
    pub fn new(store: Arc<S>, index: Arc<I>, config: ReindexConfig) -> Self {
        Self {
            store,
            index,
            config,
            locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn index(&self) -> &Arc<I> {
        &self.index
    }

    pub fn config(&self) -> &ReindexConfig {
        &self.config
    }

    fn lock_for(&self, container: &ContainerVersionId) -> Arc<Mutex<()>> {
        self.locks.entry(container.clone()).or_default().clone()
    }

    /// Drop the container's lock entry unless another run still holds a
    /// handle to it. Must be called after the caller's own handle is gone.
    fn release_lock(&self, container: &ContainerVersionId) {
        self.locks
            .remove_if(container, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Number of containers with a live lock entry.
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    /// Reindex the given concepts and mappings of one container version.
    pub async fn reindex(
        &self,
        container: &ContainerVersionId,
        concept_ids: &[Identifier],
        mapping_ids: &[Identifier],
    ) -> OclResult<ReindexReport> {
        let lock = self.lock_for(container);
        let guard = lock.lock().await;
        let outcome = self.run_locked(container, concept_ids, mapping_ids).await;
        drop(guard);
        drop(lock);
        self.release_lock(container);
        outcome
    }

    async fn run_locked(
        &self,
        container: &ContainerVersionId,
        concept_ids: &[Identifier],
        mapping_ids: &[Identifier],
    ) -> OclResult<ReindexReport> {
        self.set_processing(container, true).await?;
        let result = self.push(container, concept_ids, mapping_ids).await;
        let cleared = self.set_processing(container, false).await;

        match (result, cleared) {
            (Ok(report), Ok(())) => {
                tracing::info!(
                    container = %container,
                    concepts = report.concepts_indexed,
                    mappings = report.mappings_indexed,
                    missing = report.missing.len(),
                    removed = report.documents_removed,
                    "Reindex complete"
                );
                Ok(report)
            }
            (Ok(_), Err(e)) => Err(e),
            (Err(e), cleared) => {
                if let Err(clear_err) = cleared {
                    tracing::error!(
                        container = %container,
                        error = %clear_err,
                        "Could not clear processing flag"
                    );
                }
                tracing::error!(container = %container, error = %e, "Reindex failed");
                Err(e)
            }
        }
    }

    /// Reindex every resource touched by `references`.
    pub async fn reindex_references<'a>(
        &self,
        container: &ContainerVersionId,
        references: impl IntoIterator<Item = &'a CollectionReference>,
    ) -> OclResult<ReindexReport> {
        let mut concepts = Vec::new();
        let mut mappings = Vec::new();
        for reference in references {
            concepts.extend(reference.concepts.iter().cloned());
            mappings.extend(reference.mappings.iter().cloned());
        }
        self.reindex(container, &concepts, &mappings).await
    }

    /// Full resync of the version's concept and mapping lists.
    pub async fn reindex_children(&self, container: &ContainerVersionId) -> OclResult<ReindexReport> {
        let version = require_container_version(self.store.as_ref(), container).await?;
        let concepts: Vec<Identifier> = version
            .concepts
            .iter()
            .cloned()
            .map(Identifier::ConceptVersion)
            .collect();
        let mappings: Vec<Identifier> = version
            .mappings
            .iter()
            .cloned()
            .map(Identifier::MappingVersion)
            .collect();
        self.reindex(container, &concepts, &mappings).await
    }

    /// Remove the documents of deleted versions from the index.
    pub async fn remove_documents(&self, kind: VersionKind, ids: &[VersionId]) -> OclResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let index = self.index.as_ref();
        let removed = with_retry(
            "remove",
            &self.config.retry,
            self.config.index_timeout(),
            || async move { index.remove(kind, ids).await.map_err(OclError::from) },
        )
        .await?;
        tracing::debug!(kind = %kind, requested = ids.len(), removed, "Removed documents");
        Ok(removed)
    }

    /// Whether the version is flagged as having a reindex in flight.
    pub async fn is_processing(&self, container: &ContainerVersionId) -> OclResult<bool> {
        Ok(require_container_version(self.store.as_ref(), container)
            .await?
            .processing)
    }

    async fn set_processing(&self, container: &ContainerVersionId, processing: bool) -> OclResult<()> {
        let store = self.store.as_ref();
        with_retry(
            "set_processing",
            &self.config.retry,
            self.config.index_timeout(),
            || async move {
                let mut version = require_container_version(store, container).await?;
                version.processing = processing;
                store.save_container_version(&version).await
            },
        )
        .await
    }

    async fn push(
        &self,
        container: &ContainerVersionId,
        concept_ids: &[Identifier],
        mapping_ids: &[Identifier],
    ) -> OclResult<ReindexReport> {
        let store = self.store.as_ref();
        let policy = self.config.missing_ids;

        let concepts = resolve(store, concept_ids, ResourceKind::Concept, policy).await?;
        let mappings = resolve(store, mapping_ids, ResourceKind::Mapping, policy).await?;

        let mut report = ReindexReport {
            missing: concepts
                .missing
                .iter()
                .chain(&mappings.missing)
                .cloned()
                .collect(),
            ..Default::default()
        };
        report.concepts_indexed = self
            .upsert(container, VersionKind::ConceptVersion, &concepts.to_vec())
            .await?;
        report.mappings_indexed = self
            .upsert(container, VersionKind::MappingVersion, &mappings.to_vec())
            .await?;

        let (stale_concepts, stale_mappings) = missing_versions(&report.missing);
        report.documents_removed = self
            .remove_documents(VersionKind::ConceptVersion, &stale_concepts)
            .await?
            + self
                .remove_documents(VersionKind::MappingVersion, &stale_mappings)
                .await?;
        Ok(report)
    }

    async fn upsert(
        &self,
        container: &ContainerVersionId,
        kind: VersionKind,
        ids: &[VersionId],
    ) -> OclResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let documents = build_documents(self.store.as_ref(), kind, ids).await?;
        if documents.is_empty() {
            return Ok(0);
        }

        tracing::debug!(
            container = %container,
            kind = %kind,
            documents = documents.len(),
            "Pushing documents to search index"
        );
        let index = self.index.as_ref();
        with_retry(
            "update_all",
            &self.config.retry,
            self.config.index_timeout(),
            || {
                let batch = documents.clone();
                async move { index.update_all(kind, batch).await.map_err(OclError::from) }
            },
        )
        .await
    }
}

/// Version ids among `missing`, split into concepts and mappings.
fn missing_versions(missing: &[Identifier]) -> (Vec<VersionId>, Vec<VersionId>) {
    let mut concepts = Vec::new();
    let mut mappings = Vec::new();
    for id in missing {
        match id {
            Identifier::ConceptVersion(v) => concepts.push(v.clone()),
            Identifier::MappingVersion(v) => mappings.push(v.clone()),
            Identifier::Concept(_) | Identifier::Mapping(_) => {}
        }
    }
    (concepts, mappings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{IndexError, IndexResult, MemorySearchIndex};
    use crate::IndexDocument;
    use async_trait::async_trait;
    use ocl_core::{ConceptId, ContainerVersion};
    use ocl_storage::fixtures::{create_collection, OclTestContext};
    use ocl_storage::{add_references, delete_concept, MemoryStore};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> ReindexConfig {
        ReindexConfig {
            index_timeout_ms: 200,
            retry: RetryPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                multiplier: 2.0,
                jitter: 0.0,
            },
            missing_ids: MissingIdPolicy::Report,
        }
    }

    /// Fails the first `failures` update calls, then delegates.
    struct FlakyIndex {
        inner: MemorySearchIndex,
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl SearchIndex for FlakyIndex {
        async fn update_all(
            &self,
            kind: VersionKind,
            documents: Vec<IndexDocument>,
        ) -> IndexResult<usize> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(IndexError::Unavailable("connection refused".into()));
            }
            self.inner.update_all(kind, documents).await
        }

        async fn remove(&self, kind: VersionKind, ids: &[VersionId]) -> IndexResult<usize> {
            self.inner.remove(kind, ids).await
        }

        async fn get(&self, kind: VersionKind, id: &VersionId) -> IndexResult<Option<IndexDocument>> {
            self.inner.get(kind, id).await
        }

        async fn len(&self, kind: VersionKind) -> IndexResult<usize> {
            self.inner.len(kind).await
        }
    }

    async fn collection_with(ctx: &OclTestContext, names: &[&str]) -> ContainerVersion {
        let (_, head) = create_collection(ctx.store.as_ref(), &ctx.user, None, None)
            .await
            .unwrap();
        let exprs: Vec<String> = names
            .iter()
            .map(|n| ctx.concept(n).unwrap().uri.clone())
            .collect();
        add_references(ctx.store.as_ref(), &head.id, &exprs)
            .await
            .unwrap()
            .version
    }

    #[tokio::test]
    async fn test_reindex_children_pushes_every_version() {
        let ctx = OclTestContext::setup().await.unwrap();
        let index = Arc::new(MemorySearchIndex::new());
        let reindexer = IncrementalReindexer::new(ctx.store.clone(), index.clone(), fast_config());

        let report = reindexer.reindex_children(&ctx.source_head.id).await.unwrap();
        assert_eq!(report.concepts_indexed, 7);
        assert_eq!(report.mappings_indexed, 0);
        assert_eq!(index.len(VersionKind::ConceptVersion).await.unwrap(), 7);
        assert!(!reindexer.is_processing(&ctx.source_head.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_reindex_references_tags_collection() {
        let ctx = OclTestContext::setup().await.unwrap();
        let collection = collection_with(&ctx, &["Diagnosis", "Drug"]).await;
        let index = Arc::new(MemorySearchIndex::new());
        let reindexer = IncrementalReindexer::new(ctx.store.clone(), index.clone(), fast_config());

        let report = reindexer
            .reindex_references(&collection.id, &collection.references)
            .await
            .unwrap();
        assert_eq!(report.concepts_indexed, 2);

        let drug = ctx.concept("Drug").unwrap();
        let doc = index
            .get(
                VersionKind::ConceptVersion,
                drug.latest_version_id.as_ref().unwrap(),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.collections, vec![collection.id.clone()]);
    }

    #[tokio::test]
    async fn test_flag_cleared_after_failed_push() {
        let ctx = OclTestContext::setup().await.unwrap();
        let index = Arc::new(MemorySearchIndex::new());
        index.set_available(false);
        let reindexer = IncrementalReindexer::new(ctx.store.clone(), index, fast_config());

        let err = reindexer
            .reindex_children(&ctx.source_head.id)
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(!reindexer.is_processing(&ctx.source_head.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let ctx = OclTestContext::setup().await.unwrap();
        let index = Arc::new(FlakyIndex {
            inner: MemorySearchIndex::new(),
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let reindexer = IncrementalReindexer::new(ctx.store.clone(), index.clone(), fast_config());

        let report = reindexer.reindex_children(&ctx.source_head.id).await.unwrap();
        assert_eq!(report.concepts_indexed, 7);
        assert_eq!(index.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_missing_ids_reported_or_fatal() {
        let ctx = OclTestContext::setup().await.unwrap();
        let index = Arc::new(MemorySearchIndex::new());
        let ghost = Identifier::Concept(ConceptId::from("ghost"));
        let first = Identifier::Concept(ctx.concept("First").unwrap().id.clone());

        let reporting = IncrementalReindexer::new(ctx.store.clone(), index.clone(), fast_config());
        let report = reporting
            .reindex(&ctx.source_head.id, &[first.clone(), ghost.clone()], &[])
            .await
            .unwrap();
        assert_eq!(report.concepts_indexed, 1);
        assert_eq!(report.missing, vec![ghost.clone()]);

        let strict = IncrementalReindexer::new(
            ctx.store.clone(),
            index,
            ReindexConfig {
                missing_ids: MissingIdPolicy::Fail,
                ..fast_config()
            },
        );
        let err = strict
            .reindex(&ctx.source_head.id, &[first, ghost], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, OclError::NotFound { .. }));
        assert!(!strict.is_processing(&ctx.source_head.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_deleted_version_is_missing_and_purged() {
        let ctx = OclTestContext::setup().await.unwrap();
        let index = Arc::new(MemorySearchIndex::new());
        let reindexer = IncrementalReindexer::new(ctx.store.clone(), index.clone(), fast_config());
        reindexer.reindex_children(&ctx.source_head.id).await.unwrap();

        let drug = ctx.concept("Drug").unwrap();
        let stale = drug.latest_version_id.clone().unwrap();
        delete_concept(ctx.store.as_ref(), &drug.id).await.unwrap();
        let stale_id = Identifier::ConceptVersion(stale.clone());

        let report = reindexer
            .reindex(&ctx.source_head.id, &[stale_id.clone()], &[])
            .await
            .unwrap();
        assert_eq!(report.missing, vec![stale_id.clone()]);
        assert_eq!(report.documents_removed, 1);
        assert!(index
            .get(VersionKind::ConceptVersion, &stale)
            .await
            .unwrap()
            .is_none());
        assert_eq!(index.len(VersionKind::ConceptVersion).await.unwrap(), 6);

        let strict = IncrementalReindexer::new(
            ctx.store.clone(),
            index,
            ReindexConfig {
                missing_ids: MissingIdPolicy::Fail,
                ..fast_config()
            },
        );
        let err = strict
            .reindex(&ctx.source_head.id, &[stale_id], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, OclError::NotFound { kind: "ConceptVersion", .. }));
        assert!(!strict.is_processing(&ctx.source_head.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_entries_are_released() {
        let ctx = OclTestContext::setup().await.unwrap();
        let index = Arc::new(MemorySearchIndex::new());
        let reindexer = Arc::new(IncrementalReindexer::new(
            ctx.store.clone(),
            index,
            fast_config(),
        ));

        let runs: Vec<_> = (0..4)
            .map(|_| {
                let reindexer = reindexer.clone();
                let head = ctx.source_head.id.clone();
                tokio::spawn(async move { reindexer.reindex_children(&head).await })
            })
            .collect();
        for run in runs {
            run.await.unwrap().unwrap();
        }
        assert_eq!(reindexer.lock_count(), 0);

        let _ = reindexer
            .reindex_children(&ContainerVersionId::from("nope"))
            .await;
        assert_eq!(reindexer.lock_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_sets_skip_the_index() {
        let store = Arc::new(MemoryStore::in_memory());
        let ctx = OclTestContext::setup_with(store).await.unwrap();
        let index = Arc::new(MemorySearchIndex::new());
        index.set_available(false);
        let reindexer = IncrementalReindexer::new(ctx.store.clone(), index, fast_config());

        let report = reindexer
            .reindex(&ctx.source_head.id, &[], &[])
            .await
            .unwrap();
        assert_eq!(report, ReindexReport::default());
    }

    #[tokio::test]
    async fn test_unknown_container_fails_without_flag() {
        let ctx = OclTestContext::setup().await.unwrap();
        let reindexer = IncrementalReindexer::new(
            ctx.store.clone(),
            Arc::new(MemorySearchIndex::new()),
            fast_config(),
        );
        let err = reindexer
            .reindex_children(&ContainerVersionId::from("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, OclError::NotFound { .. }));
    }
}
