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

//! Search documents built from concept and mapping versions.

use chrono::{DateTime, Utc};
use ocl_core::{
    ConceptVersion, ContainerId, ContainerVersionId, MappingVersion, OclResult, VersionId,
    VersionKind,
};
use ocl_storage::ResourceStore;
use serde::{Deserialize, Serialize};

/// One record in the search index.
///
/// `collections` lists every collection version that currently references
/// the version, so removing a reference and reindexing drops the entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub id: VersionId,
    pub kind: VersionKind,
    pub versioned_object_id: String,
    pub parent_id: ContainerId,
    pub uri: String,
    pub name: Option<String>,
    pub concept_class: Option<String>,
    pub datatype: Option<String>,
    pub map_type: Option<String>,
    pub from_concept_id: Option<String>,
    pub to_concept_id: Option<String>,
    pub retired: bool,
    pub is_latest_version: bool,
    pub collections: Vec<ContainerVersionId>,
    pub created_at: DateTime<Utc>,
}

impl IndexDocument {
    pub fn from_concept_version(
        version: &ConceptVersion,
        is_latest_version: bool,
        collections: Vec<ContainerVersionId>,
    ) -> Self {
        let name = version
            .names
            .iter()
            .find(|n| n.text_type == ocl_core::FULLY_SPECIFIED)
            .or_else(|| version.names.first())
            .map(|n| n.name.clone());

        Self {
            id: version.id.clone(),
            kind: VersionKind::ConceptVersion,
            versioned_object_id: version.versioned_object_id.to_string(),
            parent_id: version.parent_id.clone(),
            uri: version.uri.clone(),
            name,
            concept_class: Some(version.concept_class.clone()),
            datatype: Some(version.datatype.clone()),
            map_type: None,
            from_concept_id: None,
            to_concept_id: None,
            retired: version.retired,
            is_latest_version,
            collections,
            created_at: version.created_at,
        }
    }

    pub fn from_mapping_version(
        version: &MappingVersion,
        is_latest_version: bool,
        collections: Vec<ContainerVersionId>,
    ) -> Self {
        Self {
            id: version.id.clone(),
            kind: VersionKind::MappingVersion,
            versioned_object_id: version.versioned_object_id.to_string(),
            parent_id: version.parent_id.clone(),
            uri: version.uri.clone(),
            name: None,
            concept_class: None,
            datatype: None,
            map_type: Some(version.map_type.clone()),
            from_concept_id: Some(version.from_concept_id.to_string()),
            to_concept_id: Some(version.to_concept_id.to_string()),
            retired: version.retired,
            is_latest_version,
            collections,
            created_at: version.created_at,
        }
    }
}

/// Build documents for `ids` from the store as it is now.
///
/// Ids with no stored version are skipped.
pub async fn build_documents<S: ResourceStore + ?Sized>(
    store: &S,
    kind: VersionKind,
    ids: &[VersionId],
) -> OclResult<Vec<IndexDocument>> {
    let mut documents = Vec::with_capacity(ids.len());

    match kind {
        VersionKind::ConceptVersion => {
            for version in store.concept_versions(ids).await? {
                let latest = store
                    .get_concept(&version.versioned_object_id)
                    .await?
                    .and_then(|c| c.latest_version_id)
                    .map(|latest| latest == version.id)
                    .unwrap_or(false);
                let collections = store.collections_containing(kind, &version.id).await?;
                documents.push(IndexDocument::from_concept_version(
                    &version,
                    latest,
                    collections,
                ));
            }
        }
        VersionKind::MappingVersion => {
            for version in store.mapping_versions(ids).await? {
                let latest = store
                    .get_mapping(&version.versioned_object_id)
                    .await?
                    .and_then(|m| m.latest_version_id)
                    .map(|latest| latest == version.id)
                    .unwrap_or(false);
                let collections = store.collections_containing(kind, &version.id).await?;
                documents.push(IndexDocument::from_mapping_version(
                    &version,
                    latest,
                    collections,
                ));
            }
        }
    }

    if documents.len() < ids.len() {
        tracing::debug!(
            kind = %kind,
            requested = ids.len(),
            built = documents.len(),
            "Some versions had no stored record"
        );
    }
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocl_core::ContainerKind;
    use ocl_storage::add_references;
    use ocl_storage::fixtures::{create_collection, OclTestContext};

    #[tokio::test]
    async fn test_documents_carry_collections() {
        let ctx = OclTestContext::setup().await.unwrap();
        let (_, collection) = create_collection(ctx.store.as_ref(), &ctx.user, None, Some("Starter"))
            .await
            .unwrap();
        let drug = ctx.concept("Drug").unwrap();
        add_references(ctx.store.as_ref(), &collection.id, &[drug.uri.clone()])
            .await
            .unwrap();

        let latest = drug.latest_version_id.clone().unwrap();
        let docs = build_documents(
            ctx.store.as_ref(),
            VersionKind::ConceptVersion,
            &[latest.clone(), VersionId::from("ghost")],
        )
        .await
        .unwrap();

        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, latest);
        assert_eq!(docs[0].name.as_deref(), Some("Drug"));
        assert!(docs[0].is_latest_version);
        assert_eq!(docs[0].collections, vec![collection.id]);
        assert_eq!(collection.kind, ContainerKind::Collection);
    }
}
