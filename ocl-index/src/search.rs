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

//! Search index interface and the in-memory implementation.

use async_trait::async_trait;
use dashmap::DashMap;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ocl_core::{OclError, VersionId, VersionKind};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;

use crate::document::IndexDocument;

#[derive(Debug, Error)]
pub enum IndexError {
    /// Backend cannot take requests right now
    #[error("Search index unavailable: {0}")]
    Unavailable(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type IndexResult<T> = Result<T, IndexError>;

impl From<IndexError> for OclError {
    fn from(e: IndexError) -> Self {
        match e {
            IndexError::Unavailable(msg) => OclError::Transient(msg),
            IndexError::Io(io) => OclError::Io(io),
            other => OclError::Storage(other.to_string()),
        }
    }
}

/// Full-text search backend fed by the reindexer.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Bulk upsert keyed by `(kind, id)`; returns the number written.
    async fn update_all(&self, kind: VersionKind, documents: Vec<IndexDocument>)
        -> IndexResult<usize>;

    /// Returns how many of `ids` were present.
    async fn remove(&self, kind: VersionKind, ids: &[VersionId]) -> IndexResult<usize>;

    async fn get(&self, kind: VersionKind, id: &VersionId) -> IndexResult<Option<IndexDocument>>;

    async fn len(&self, kind: VersionKind) -> IndexResult<usize>;
}

/// Index held in a `DashMap`, optionally snapshotted to a gzip JSON file.
pub struct MemorySearchIndex {
    documents: DashMap<(VersionKind, VersionId), IndexDocument>,
    snapshot_path: Option<PathBuf>,
    available: AtomicBool,
    writes: AtomicU64,
    flush_lock: parking_lot::Mutex<()>,
}

impl Default for MemorySearchIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySearchIndex {
    pub fn new() -> Self {
        Self {
            documents: DashMap::new(),
            snapshot_path: None,
            available: AtomicBool::new(true),
            writes: AtomicU64::new(0),
            flush_lock: parking_lot::Mutex::new(()),
        }
    }

    /// Open an index backed by `path`, loading the snapshot if present.
    pub fn open(path: impl AsRef<Path>) -> IndexResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut index = Self::new();

        if path.exists() {
            let reader = GzDecoder::new(BufReader::new(File::open(&path)?));
            let documents: Vec<IndexDocument> = serde_json::from_reader(reader)?;
            for doc in documents {
                index.documents.insert((doc.kind, doc.id.clone()), doc);
            }
            tracing::info!(
                path = %path.display(),
                documents = index.documents.len(),
                "Loaded search index snapshot"
            );
        }

        index.snapshot_path = Some(path);
        Ok(index)
    }

    /// Write the snapshot file. No-op for a purely in-memory index.
    pub fn flush(&self) -> IndexResult<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let _guard = self.flush_lock.lock();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut documents: Vec<IndexDocument> =
            self.documents.iter().map(|e| e.value().clone()).collect();
        documents.sort_by(|a, b| (a.kind, &a.id).cmp(&(b.kind, &b.id)));

        let temp_path = path.with_extension("tmp");
        let writer = BufWriter::new(File::create(&temp_path)?);
        let mut encoder = GzEncoder::new(writer, Compression::default());
        serde_json::to_writer(&mut encoder, &documents)?;
        encoder
            .finish()?
            .into_inner()
            .map_err(|e| IndexError::Snapshot(e.to_string()))?
            .sync_all()?;
        std::fs::rename(&temp_path, path)?;

        tracing::debug!(path = %path.display(), documents = documents.len(), "Flushed search index");
        Ok(())
    }

    /// Simulate an outage: while unavailable every call fails with
    /// [`IndexError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Total documents written since creation
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Every document of `kind`, sorted by id.
    pub fn documents(&self, kind: VersionKind) -> Vec<IndexDocument> {
        let mut docs: Vec<IndexDocument> = self
            .documents
            .iter()
            .filter(|e| e.key().0 == kind)
            .map(|e| e.value().clone())
            .collect();
        docs.sort_by(|a, b| a.id.cmp(&b.id));
        docs
    }

    fn check_available(&self) -> IndexResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(IndexError::Unavailable("index is offline".into()))
        }
    }
}

#[async_trait]
impl SearchIndex for MemorySearchIndex {
    async fn update_all(
        &self,
        kind: VersionKind,
        documents: Vec<IndexDocument>,
    ) -> IndexResult<usize> {
        self.check_available()?;
        let count = documents.len();
        for doc in documents {
            self.documents.insert((kind, doc.id.clone()), doc);
        }
        self.writes.fetch_add(count as u64, Ordering::Relaxed);
        Ok(count)
    }

    async fn remove(&self, kind: VersionKind, ids: &[VersionId]) -> IndexResult<usize> {
        self.check_available()?;
        Ok(ids
            .iter()
            .filter(|id| self.documents.remove(&(kind, (*id).clone())).is_some())
            .count())
    }

    async fn get(&self, kind: VersionKind, id: &VersionId) -> IndexResult<Option<IndexDocument>> {
        self.check_available()?;
        Ok(self
            .documents
            .get(&(kind, id.clone()))
            .map(|e| e.value().clone()))
    }

    async fn len(&self, kind: VersionKind) -> IndexResult<usize> {
        self.check_available()?;
        Ok(self.documents.iter().filter(|e| e.key().0 == kind).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ocl_core::ContainerId;
    use tempfile::tempdir;

    fn doc(id: &str) -> IndexDocument {
        IndexDocument {
            id: VersionId::from(id),
            kind: VersionKind::ConceptVersion,
            versioned_object_id: format!("root-{id}"),
            parent_id: ContainerId::from("src"),
            uri: format!("/orgs/OCL/sources/Classes/concepts/{id}/"),
            name: Some(id.to_string()),
            concept_class: Some("Concept Class".into()),
            datatype: Some("None".into()),
            map_type: None,
            from_concept_id: None,
            to_concept_id: None,
            retired: false,
            is_latest_version: true,
            collections: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upsert_is_keyed_by_kind_and_id() {
        let index = MemorySearchIndex::new();
        index
            .update_all(VersionKind::ConceptVersion, vec![doc("a"), doc("b")])
            .await
            .unwrap();
        let mut changed = doc("a");
        changed.retired = true;
        index
            .update_all(VersionKind::ConceptVersion, vec![changed])
            .await
            .unwrap();

        assert_eq!(index.len(VersionKind::ConceptVersion).await.unwrap(), 2);
        assert_eq!(index.len(VersionKind::MappingVersion).await.unwrap(), 0);
        let a = index
            .get(VersionKind::ConceptVersion, &VersionId::from("a"))
            .await
            .unwrap()
            .unwrap();
        assert!(a.retired);
        assert_eq!(index.writes(), 3);
    }

    #[tokio::test]
    async fn test_offline_index_reports_unavailable() {
        let index = MemorySearchIndex::new();
        index.set_available(false);
        let err = index
            .update_all(VersionKind::ConceptVersion, vec![doc("a")])
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Unavailable(_)));
        assert!(OclError::from(err).is_transient());
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.json.gz");

        let index = MemorySearchIndex::open(&path).unwrap();
        index
            .update_all(VersionKind::ConceptVersion, vec![doc("a"), doc("b")])
            .await
            .unwrap();
        index
            .remove(VersionKind::ConceptVersion, &[VersionId::from("b")])
            .await
            .unwrap();
        index.flush().unwrap();

        let reopened = MemorySearchIndex::open(&path).unwrap();
        let docs = reopened.documents(VersionKind::ConceptVersion);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, VersionId::from("a"));
    }
}
