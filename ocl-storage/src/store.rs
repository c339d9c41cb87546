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

//! Persistence layer for terminology records
//!
//! [`ResourceStore`] is the interface the indexer and task runner consume:
//! typed get/filter/save per record class plus the few relationship queries
//! they need. [`MemoryStore`] keeps every table in memory and, when opened
//! with a directory, mirrors each record to a JSON file so a worker restart
//! sees the same state.

use async_trait::async_trait;
use ocl_core::{
    normalize_expression, Concept, ConceptId, ConceptVersion, Container, ContainerId,
    ContainerKind, ContainerVersion, ContainerVersionId, Identifier, Mapping, MappingId,
    MappingVersion, OclError, OclResult, Organization, OrganizationId, User, UserId, UserProfile,
    VersionId, VersionKind,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// A record found by URI lookup.
#[derive(Debug, Clone)]
pub enum UriTarget {
    Concept(Concept),
    ConceptVersion(ConceptVersion),
    Mapping(Mapping),
    MappingVersion(MappingVersion),
}

impl UriTarget {
    pub fn identifier(&self) -> Identifier {
        match self {
            UriTarget::Concept(c) => Identifier::Concept(c.id.clone()),
            UriTarget::ConceptVersion(v) => Identifier::ConceptVersion(v.id.clone()),
            UriTarget::Mapping(m) => Identifier::Mapping(m.id.clone()),
            UriTarget::MappingVersion(v) => Identifier::MappingVersion(v.id.clone()),
        }
    }
}

/// Record persistence consumed by indexing and task code.
///
/// Implementations give per-record read-after-write consistency; nothing
/// here spans several records in one transaction.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn save_user(&self, user: &User) -> OclResult<()>;
    async fn get_user(&self, id: &UserId) -> OclResult<Option<User>>;
    async fn save_user_profile(&self, profile: &UserProfile) -> OclResult<()>;
    async fn get_user_profile(&self, user_id: &UserId) -> OclResult<Option<UserProfile>>;
    async fn save_organization(&self, org: &Organization) -> OclResult<()>;
    async fn get_organization(&self, id: &OrganizationId) -> OclResult<Option<Organization>>;

    async fn save_container(&self, container: &Container) -> OclResult<()>;
    async fn get_container(&self, id: &ContainerId) -> OclResult<Option<Container>>;
    async fn container_by_uri(&self, uri: &str) -> OclResult<Option<Container>>;
    async fn save_container_version(&self, version: &ContainerVersion) -> OclResult<()>;
    async fn get_container_version(
        &self,
        id: &ContainerVersionId,
    ) -> OclResult<Option<ContainerVersion>>;
    async fn container_version_by_uri(&self, uri: &str) -> OclResult<Option<ContainerVersion>>;
    async fn head_version(&self, container: &ContainerId) -> OclResult<Option<ContainerVersion>>;
    async fn delete_container_version(&self, id: &ContainerVersionId) -> OclResult<bool>;
    /// Collection versions whose concept or mapping list holds `id`.
    async fn collections_containing(
        &self,
        kind: VersionKind,
        id: &VersionId,
    ) -> OclResult<Vec<ContainerVersionId>>;

    async fn save_concept(&self, concept: &Concept) -> OclResult<()>;
    async fn get_concept(&self, id: &ConceptId) -> OclResult<Option<Concept>>;
    async fn concepts_in(&self, parent: &ContainerId) -> OclResult<Vec<Concept>>;
    /// Delete a concept root; its versions stay addressable.
    async fn delete_concept(&self, id: &ConceptId) -> OclResult<bool>;
    async fn save_concept_version(&self, version: &ConceptVersion) -> OclResult<()>;
    async fn get_concept_version(&self, id: &VersionId) -> OclResult<Option<ConceptVersion>>;
    async fn delete_concept_version(&self, id: &VersionId) -> OclResult<bool>;
    /// Every concept version whose id is in `ids`; unknown ids are skipped.
    async fn concept_versions(&self, ids: &[VersionId]) -> OclResult<Vec<ConceptVersion>>;

    async fn save_mapping(&self, mapping: &Mapping) -> OclResult<()>;
    async fn get_mapping(&self, id: &MappingId) -> OclResult<Option<Mapping>>;
    async fn mappings_in(&self, parent: &ContainerId) -> OclResult<Vec<Mapping>>;
    async fn delete_mapping(&self, id: &MappingId) -> OclResult<bool>;
    async fn save_mapping_version(&self, version: &MappingVersion) -> OclResult<()>;
    async fn get_mapping_version(&self, id: &VersionId) -> OclResult<Option<MappingVersion>>;
    async fn delete_mapping_version(&self, id: &VersionId) -> OclResult<bool>;
    /// Every mapping version whose id is in `ids`; unknown ids are skipped.
    async fn mapping_versions(&self, ids: &[VersionId]) -> OclResult<Vec<MappingVersion>>;

    /// Resolve a concept, concept version, mapping or mapping version URI.
    async fn find_by_uri(&self, uri: &str) -> OclResult<Option<UriTarget>>;
}

/// Load a container version or fail with `NotFound`.
pub async fn require_container_version<S: ResourceStore + ?Sized>(
    store: &S,
    id: &ContainerVersionId,
) -> OclResult<ContainerVersion> {
    store
        .get_container_version(id)
        .await?
        .ok_or_else(|| OclError::not_found("ContainerVersion", id.as_str()))
}

/// One table of the in-memory store.
#[derive(Debug)]
struct Table<T> {
    name: &'static str,
    rows: RwLock<HashMap<String, T>>,
}

impl<T: Clone + Serialize + DeserializeOwned> Table<T> {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            rows: RwLock::new(HashMap::new()),
        }
    }

    async fn get(&self, key: &str) -> Option<T> {
        self.rows.read().await.get(key).cloned()
    }

    async fn insert(&self, key: &str, value: T) {
        self.rows.write().await.insert(key.to_string(), value);
    }

    async fn remove(&self, key: &str) -> bool {
        self.rows.write().await.remove(key).is_some()
    }

    async fn filter<F: Fn(&T) -> bool>(&self, predicate: F) -> Vec<T> {
        self.rows
            .read()
            .await
            .values()
            .filter(|row| predicate(row))
            .cloned()
            .collect()
    }

    async fn find<F: Fn(&T) -> bool>(&self, predicate: F) -> Option<T> {
        self.rows
            .read()
            .await
            .values()
            .find(|row| predicate(row))
            .cloned()
    }

    async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    async fn clear(&self) {
        self.rows.write().await.clear();
    }

    fn load(&mut self, dir: &Path) -> OclResult<usize> {
        let table_dir = dir.join(self.name);
        if !table_dir.exists() {
            return Ok(0);
        }

        let mut rows = HashMap::new();
        for entry in std::fs::read_dir(&table_dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                let content = std::fs::read_to_string(&path)?;
                match serde_json::from_str::<T>(&content) {
                    Ok(row) => {
                        if let Some(key) = path.file_stem().and_then(|s| s.to_str()) {
                            rows.insert(key.to_string(), row);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable record");
                    }
                }
            }
        }

        let count = rows.len();
        *self.rows.get_mut() = rows;
        Ok(count)
    }
}

/// In-memory store with optional JSON-file mirroring.
#[derive(Debug)]
pub struct MemoryStore {
    path: Option<PathBuf>,
    users: Table<User>,
    profiles: Table<UserProfile>,
    organizations: Table<Organization>,
    containers: Table<Container>,
    container_versions: Table<ContainerVersion>,
    concepts: Table<Concept>,
    concept_versions: Table<ConceptVersion>,
    mappings: Table<Mapping>,
    mapping_versions: Table<MappingVersion>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl MemoryStore {
    /// Store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            users: Table::new("users"),
            profiles: Table::new("user_profiles"),
            organizations: Table::new("organizations"),
            containers: Table::new("containers"),
            container_versions: Table::new("container_versions"),
            concepts: Table::new("concepts"),
            concept_versions: Table::new("concept_versions"),
            mappings: Table::new("mappings"),
            mapping_versions: Table::new("mapping_versions"),
        }
    }

    /// Open a store mirrored under `path`, loading any existing records.
    pub async fn open(path: impl AsRef<Path>) -> OclResult<Self> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path)?;

        let mut store = Self::in_memory();
        store.path = Some(path);
        store.load_from_disk()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn load_from_disk(&mut self) -> OclResult<()> {
        let Some(dir) = self.path.clone() else {
            return Ok(());
        };
        let dir = dir.as_path();

        let loaded = self.users.load(dir)?
            + self.profiles.load(dir)?
            + self.organizations.load(dir)?
            + self.containers.load(dir)?
            + self.container_versions.load(dir)?
            + self.concepts.load(dir)?
            + self.concept_versions.load(dir)?
            + self.mappings.load(dir)?
            + self.mapping_versions.load(dir)?;

        tracing::info!(path = %dir.display(), records = loaded, "Loaded store from disk");
        Ok(())
    }

    async fn put<T>(&self, table: &Table<T>, key: &str, value: &T) -> OclResult<()>
    where
        T: Clone + Serialize + DeserializeOwned,
    {
        table.insert(key, value.clone()).await;
        if let Some(dir) = &self.path {
            let table_dir = dir.join(table.name);
            tokio::fs::create_dir_all(&table_dir).await?;
            let content = serde_json::to_vec_pretty(value)?;
            tokio::fs::write(table_dir.join(format!("{}.json", file_key(key))), content).await?;
        }
        Ok(())
    }

    async fn delete<T>(&self, table: &Table<T>, key: &str) -> OclResult<bool>
    where
        T: Clone + Serialize + DeserializeOwned,
    {
        let removed = table.remove(key).await;
        if let Some(dir) = &self.path {
            let file = dir.join(table.name).join(format!("{}.json", file_key(key)));
            if tokio::fs::try_exists(&file).await? {
                tokio::fs::remove_file(&file).await?;
            }
        }
        Ok(removed)
    }

    /// Record counts per table
    pub async fn stats(&self) -> StoreStats {
        StoreStats {
            containers: self.containers.len().await,
            container_versions: self.container_versions.len().await,
            concepts: self.concepts.len().await,
            concept_versions: self.concept_versions.len().await,
            mappings: self.mappings.len().await,
            mapping_versions: self.mapping_versions.len().await,
            users: self.users.len().await,
            organizations: self.organizations.len().await,
        }
    }

    /// Delete every record (and its mirror directory, if any).
    pub async fn clear(&self) -> OclResult<()> {
        self.users.clear().await;
        self.profiles.clear().await;
        self.organizations.clear().await;
        self.containers.clear().await;
        self.container_versions.clear().await;
        self.concepts.clear().await;
        self.concept_versions.clear().await;
        self.mappings.clear().await;
        self.mapping_versions.clear().await;

        if let Some(dir) = &self.path {
            if tokio::fs::try_exists(dir).await? {
                tokio::fs::remove_dir_all(dir).await?;
            }
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }
}

/// Ids may be user supplied; keep file names to a safe alphabet.
fn file_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn save_user(&self, user: &User) -> OclResult<()> {
        self.put(&self.users, user.id.as_str(), user).await
    }

    async fn get_user(&self, id: &UserId) -> OclResult<Option<User>> {
        Ok(self.users.get(id.as_str()).await)
    }

    async fn save_user_profile(&self, profile: &UserProfile) -> OclResult<()> {
        self.put(&self.profiles, profile.user_id.as_str(), profile)
            .await
    }

    async fn get_user_profile(&self, user_id: &UserId) -> OclResult<Option<UserProfile>> {
        Ok(self.profiles.get(user_id.as_str()).await)
    }

    async fn save_organization(&self, org: &Organization) -> OclResult<()> {
        self.put(&self.organizations, org.id.as_str(), org).await
    }

    async fn get_organization(&self, id: &OrganizationId) -> OclResult<Option<Organization>> {
        Ok(self.organizations.get(id.as_str()).await)
    }

    async fn save_container(&self, container: &Container) -> OclResult<()> {
        self.put(&self.containers, container.id.as_str(), container)
            .await
    }

    async fn get_container(&self, id: &ContainerId) -> OclResult<Option<Container>> {
        Ok(self.containers.get(id.as_str()).await)
    }

    async fn container_by_uri(&self, uri: &str) -> OclResult<Option<Container>> {
        let uri = normalize_expression(uri);
        Ok(self.containers.find(|c| c.uri == uri).await)
    }

    async fn save_container_version(&self, version: &ContainerVersion) -> OclResult<()> {
        self.put(&self.container_versions, version.id.as_str(), version)
            .await
    }

    async fn get_container_version(
        &self,
        id: &ContainerVersionId,
    ) -> OclResult<Option<ContainerVersion>> {
        Ok(self.container_versions.get(id.as_str()).await)
    }

    async fn container_version_by_uri(&self, uri: &str) -> OclResult<Option<ContainerVersion>> {
        let uri = normalize_expression(uri);
        Ok(self.container_versions.find(|v| v.uri == uri).await)
    }

    async fn head_version(&self, container: &ContainerId) -> OclResult<Option<ContainerVersion>> {
        Ok(self
            .container_versions
            .find(|v| &v.versioned_object_id == container && v.is_head())
            .await)
    }

    async fn delete_container_version(&self, id: &ContainerVersionId) -> OclResult<bool> {
        self.delete(&self.container_versions, id.as_str()).await
    }

    async fn collections_containing(
        &self,
        kind: VersionKind,
        id: &VersionId,
    ) -> OclResult<Vec<ContainerVersionId>> {
        let mut ids: Vec<ContainerVersionId> = self
            .container_versions
            .filter(|v| {
                v.kind == ContainerKind::Collection
                    && match kind {
                        VersionKind::ConceptVersion => v.concepts.contains(id),
                        VersionKind::MappingVersion => v.mappings.contains(id),
                    }
            })
            .await
            .into_iter()
            .map(|v| v.id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn save_concept(&self, concept: &Concept) -> OclResult<()> {
        self.put(&self.concepts, concept.id.as_str(), concept).await
    }

    async fn get_concept(&self, id: &ConceptId) -> OclResult<Option<Concept>> {
        Ok(self.concepts.get(id.as_str()).await)
    }

    async fn concepts_in(&self, parent: &ContainerId) -> OclResult<Vec<Concept>> {
        let mut concepts = self.concepts.filter(|c| &c.parent_id == parent).await;
        concepts.sort_by(|a, b| a.mnemonic.cmp(&b.mnemonic));
        Ok(concepts)
    }

    async fn delete_concept(&self, id: &ConceptId) -> OclResult<bool> {
        self.delete(&self.concepts, id.as_str()).await
    }

    async fn save_concept_version(&self, version: &ConceptVersion) -> OclResult<()> {
        self.put(&self.concept_versions, version.id.as_str(), version)
            .await
    }

    async fn get_concept_version(&self, id: &VersionId) -> OclResult<Option<ConceptVersion>> {
        Ok(self.concept_versions.get(id.as_str()).await)
    }

    async fn delete_concept_version(&self, id: &VersionId) -> OclResult<bool> {
        self.delete(&self.concept_versions, id.as_str()).await
    }

    async fn concept_versions(&self, ids: &[VersionId]) -> OclResult<Vec<ConceptVersion>> {
        let rows = self.concept_versions.rows.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| rows.get(id.as_str()).cloned())
            .collect())
    }

    async fn save_mapping(&self, mapping: &Mapping) -> OclResult<()> {
        self.put(&self.mappings, mapping.id.as_str(), mapping).await
    }

    async fn get_mapping(&self, id: &MappingId) -> OclResult<Option<Mapping>> {
        Ok(self.mappings.get(id.as_str()).await)
    }

    async fn mappings_in(&self, parent: &ContainerId) -> OclResult<Vec<Mapping>> {
        let mut mappings = self.mappings.filter(|m| &m.parent_id == parent).await;
        mappings.sort_by(|a, b| a.uri.cmp(&b.uri));
        Ok(mappings)
    }

    async fn delete_mapping(&self, id: &MappingId) -> OclResult<bool> {
        self.delete(&self.mappings, id.as_str()).await
    }

    async fn save_mapping_version(&self, version: &MappingVersion) -> OclResult<()> {
        self.put(&self.mapping_versions, version.id.as_str(), version)
            .await
    }

    async fn get_mapping_version(&self, id: &VersionId) -> OclResult<Option<MappingVersion>> {
        Ok(self.mapping_versions.get(id.as_str()).await)
    }

    async fn delete_mapping_version(&self, id: &VersionId) -> OclResult<bool> {
        self.delete(&self.mapping_versions, id.as_str()).await
    }

    async fn mapping_versions(&self, ids: &[VersionId]) -> OclResult<Vec<MappingVersion>> {
        let rows = self.mapping_versions.rows.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| rows.get(id.as_str()).cloned())
            .collect())
    }

    async fn find_by_uri(&self, uri: &str) -> OclResult<Option<UriTarget>> {
        let uri = normalize_expression(uri);

        if let Some(v) = self.concept_versions.find(|v| v.uri == uri).await {
            return Ok(Some(UriTarget::ConceptVersion(v)));
        }
        if let Some(c) = self.concepts.find(|c| c.uri == uri).await {
            return Ok(Some(UriTarget::Concept(c)));
        }
        if let Some(v) = self.mapping_versions.find(|v| v.uri == uri).await {
            return Ok(Some(UriTarget::MappingVersion(v)));
        }
        Ok(self
            .mappings
            .find(|m| m.uri == uri)
            .await
            .map(UriTarget::Mapping))
    }
}

/// Storage statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub containers: usize,
    pub container_versions: usize,
    pub concepts: usize,
    pub concept_versions: usize,
    pub mappings: usize,
    pub mapping_versions: usize,
    pub users: usize,
    pub organizations: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocl_core::Owner;
    use tempfile::tempdir;

    fn sample_source() -> (Container, ContainerVersion) {
        let source = Container::new(
            ContainerKind::Source,
            "Classes",
            Owner::Organization {
                mnemonic: "OCL".into(),
            },
        );
        let head = ContainerVersion::head_of(&source);
        (source, head)
    }

    #[tokio::test]
    async fn test_container_roundtrip_and_uri_lookup() {
        let store = MemoryStore::in_memory();
        let (source, head) = sample_source();
        store.save_container(&source).await.unwrap();
        store.save_container_version(&head).await.unwrap();

        let by_uri = store
            .container_version_by_uri("orgs/OCL/sources/Classes/HEAD")
            .await
            .unwrap();
        assert_eq!(by_uri.map(|v| v.id), Some(head.id.clone()));

        let found_head = store.head_version(&source.id).await.unwrap();
        assert_eq!(found_head.map(|v| v.id), Some(head.id));
        assert!(store
            .container_by_uri("/orgs/OCL/sources/Classes/")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_collections_containing() {
        let store = MemoryStore::in_memory();
        let collection = Container::new(
            ContainerKind::Collection,
            "Starter",
            Owner::User {
                mnemonic: "jdoe".into(),
            },
        );
        let mut head = ContainerVersion::head_of(&collection);
        let version = VersionId::from("cv-1");
        head.add_concept(&version);
        store.save_container_version(&head).await.unwrap();

        let (_, mut source_head) = sample_source();
        source_head.add_concept(&version);
        store.save_container_version(&source_head).await.unwrap();

        let found = store
            .collections_containing(VersionKind::ConceptVersion, &version)
            .await
            .unwrap();
        assert_eq!(found, vec![head.id]);
        assert!(store
            .collections_containing(VersionKind::MappingVersion, &version)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_persisted_store_reloads() {
        let dir = tempdir().unwrap();
        let (source, head) = sample_source();
        {
            let store = MemoryStore::open(dir.path()).await.unwrap();
            store.save_container(&source).await.unwrap();
            store.save_container_version(&head).await.unwrap();
        }

        let reopened = MemoryStore::open(dir.path()).await.unwrap();
        let stats = reopened.stats().await;
        assert_eq!(stats.containers, 1);
        assert_eq!(stats.container_versions, 1);
        assert!(reopened.get_container(&source.id).await.unwrap().is_some());

        assert!(reopened
            .delete_container_version(&head.id)
            .await
            .unwrap());
        assert!(!reopened
            .delete_container_version(&head.id)
            .await
            .unwrap());
        assert_eq!(reopened.stats().await.container_versions, 0);

        reopened.clear().await.unwrap();
        assert_eq!(reopened.stats().await, StoreStats::default());
    }

    #[test]
    fn test_file_key_is_safe() {
        assert_eq!(file_key("abc-123_x"), "abc-123_x");
        assert_eq!(file_key("../etc/passwd"), "___etc_passwd");
    }
}
