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

//! Integration tests for reindexing against a persisted index

use ocl_core::{ContainerKind, VersionKind};
use ocl_index::{IncrementalReindexer, MemorySearchIndex, ReindexConfig, SearchIndex};
use ocl_storage::fixtures::{create_collection, OclTestContext};
use ocl_storage::{add_references, persist_concept_version, remove_references};
use std::sync::Arc;
use tempfile::tempdir;

/// Index survives a flush and reopen
#[tokio::test]
async fn test_reindexed_source_survives_snapshot() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("index.json.gz");
    let ctx = OclTestContext::setup().await.unwrap();

    let index = Arc::new(MemorySearchIndex::open(&path).unwrap());
    let reindexer =
        IncrementalReindexer::new(ctx.store.clone(), index.clone(), ReindexConfig::default());
    reindexer.reindex_children(&ctx.source_head.id).await.unwrap();
    index.flush().unwrap();

    let reopened = MemorySearchIndex::open(&path).unwrap();
    assert_eq!(reopened.len(VersionKind::ConceptVersion).await.unwrap(), 7);
}

/// Removing a reference drops the collection from the document
#[tokio::test]
async fn test_removed_reference_untags_document() {
    let ctx = OclTestContext::setup().await.unwrap();
    let (container, head) = create_collection(ctx.store.as_ref(), &ctx.user, None, Some("Trial"))
        .await
        .unwrap();
    assert_eq!(container.kind, ContainerKind::Collection);

    let third = ctx.concept("Third").unwrap();
    let index = Arc::new(MemorySearchIndex::new());
    let reindexer =
        IncrementalReindexer::new(ctx.store.clone(), index.clone(), ReindexConfig::default());

    let added = add_references(ctx.store.as_ref(), &head.id, &[third.uri.clone()])
        .await
        .unwrap();
    let diff = added.diff();
    reindexer.reindex_references(&head.id, diff.changed()).await.unwrap();

    let version = third.latest_version_id.clone().unwrap();
    let doc = index
        .get(VersionKind::ConceptVersion, &version)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(doc.collections, vec![head.id.clone()]);

    let removed = remove_references(ctx.store.as_ref(), &head.id, &[third.uri.clone()])
        .await
        .unwrap();
    let diff = removed.diff();
    assert_eq!(diff.removed.len(), 1);
    reindexer.reindex_references(&head.id, diff.changed()).await.unwrap();

    let doc = index
        .get(VersionKind::ConceptVersion, &version)
        .await
        .unwrap()
        .unwrap();
    assert!(doc.collections.is_empty());
}

/// A late reindex writes what the store holds now
#[tokio::test]
async fn test_late_reindex_uses_current_state() {
    let ctx = OclTestContext::setup().await.unwrap();
    let index = Arc::new(MemorySearchIndex::new());
    let reindexer =
        IncrementalReindexer::new(ctx.store.clone(), index.clone(), ReindexConfig::default());

    let mut fourth = ctx.concept("Fourth").unwrap().clone();
    let v1 = fourth.latest_version_id.clone().unwrap();
    let v2 = persist_concept_version(ctx.store.as_ref(), &mut fourth, None)
        .await
        .unwrap();

    reindexer.reindex_children(&ctx.source_head.id).await.unwrap();

    let latest = index
        .get(VersionKind::ConceptVersion, &v2.id)
        .await
        .unwrap()
        .unwrap();
    assert!(latest.is_latest_version);
    assert!(index
        .get(VersionKind::ConceptVersion, &v1)
        .await
        .unwrap()
        .is_none());
}
