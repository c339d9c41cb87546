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

//! Record lifecycle: creating roots, cutting new versions and deleting.
//!
//! Every content save of a concept or mapping produces a new immutable
//! version, moves the root's latest pointer and swaps the id in the parent
//! source's HEAD version. Deleting a root deletes its whole version chain
//! and detaches it from the source HEAD and from every collection.

use chrono::Utc;
use ocl_core::{
    Concept, ConceptId, ConceptVersion, Container, ContainerKind, ContainerVersion, Identifier,
    Mapping, MappingId, MappingVersion, OclError, OclResult, Organization, User, UserId,
    UserProfile, VersionId, VersionKind, FULLY_SPECIFIED,
};

use crate::store::ResourceStore;

/// Schema name that requires every concept to carry a fully specified name.
pub const OPENMRS_SCHEMA: &str = "OpenMRS";

pub async fn persist_new_user<S: ResourceStore + ?Sized>(
    store: &S,
    user: &User,
    profile_mnemonic: &str,
) -> OclResult<UserProfile> {
    if user.username.trim().is_empty() {
        return Err(OclError::Validation("username: required".into()));
    }
    store.save_user(user).await?;
    let profile = UserProfile {
        user_id: user.id.clone(),
        mnemonic: profile_mnemonic.to_string(),
    };
    store.save_user_profile(&profile).await?;
    Ok(profile)
}

pub async fn persist_new_organization<S: ResourceStore + ?Sized>(
    store: &S,
    org: &Organization,
) -> OclResult<()> {
    if org.mnemonic.trim().is_empty() {
        return Err(OclError::Validation("mnemonic: required".into()));
    }
    store.save_organization(org).await
}

/// Save a new source or collection together with its HEAD version.
pub async fn persist_new_container<S: ResourceStore + ?Sized>(
    store: &S,
    container: &mut Container,
    user: Option<&UserId>,
) -> OclResult<ContainerVersion> {
    if container.mnemonic.trim().is_empty() {
        return Err(OclError::Validation("mnemonic: required".into()));
    }
    if store.container_by_uri(&container.uri).await?.is_some() {
        return Err(OclError::Validation(format!(
            "mnemonic: {} with this mnemonic already exists for this owner",
            container.kind
        )));
    }

    container.created_by = user.cloned();
    store.save_container(container).await?;

    let head = ContainerVersion::head_of(container);
    store.save_container_version(&head).await?;

    tracing::info!(
        container = %container.id,
        uri = %container.uri,
        kind = %container.kind,
        "Created container"
    );
    Ok(head)
}

async fn require_source<S: ResourceStore + ?Sized>(
    store: &S,
    parent: &Container,
) -> OclResult<ContainerVersion> {
    if parent.kind != ContainerKind::Source {
        return Err(OclError::Validation(format!(
            "parent: {} is not a source",
            parent.uri
        )));
    }
    store
        .head_version(&parent.id)
        .await?
        .ok_or_else(|| OclError::not_found("ContainerVersion", format!("{}HEAD/", parent.uri)))
}

fn validate_concept(concept: &Concept, parent: &Container) -> OclResult<()> {
    if concept.mnemonic.trim().is_empty() {
        return Err(OclError::Validation("mnemonic: required".into()));
    }
    if concept.names.is_empty() {
        return Err(OclError::Validation(
            "names: A concept must have at least one name".into(),
        ));
    }
    if parent.custom_validation_schema.as_deref() == Some(OPENMRS_SCHEMA)
        && !concept.names.iter().any(|n| n.text_type == FULLY_SPECIFIED)
    {
        return Err(OclError::Validation(
            "names: A concept must have at least one fully specified name".into(),
        ));
    }
    Ok(())
}

/// Create a concept in `parent`, its first version, and list that version in
/// the source HEAD.
pub async fn persist_new_concept<S: ResourceStore + ?Sized>(
    store: &S,
    concept: &mut Concept,
    parent: &Container,
    user: Option<&UserId>,
) -> OclResult<ConceptVersion> {
    validate_concept(concept, parent)?;
    let mut head = require_source(store, parent).await?;

    let uri = format!("{}concepts/{}/", parent.uri, concept.mnemonic);
    if store.find_by_uri(&uri).await?.is_some() {
        return Err(OclError::Validation(format!(
            "mnemonic: Concept ID must be unique within a source: {}",
            concept.mnemonic
        )));
    }

    concept.parent_id = parent.id.clone();
    concept.uri = uri;
    concept.created_by = user.cloned();
    concept.updated_by = user.cloned();

    let version = ConceptVersion::snapshot(concept, None);
    store.save_concept_version(&version).await?;
    concept.latest_version_id = Some(version.id.clone());
    store.save_concept(concept).await?;

    head.add_concept(&version.id);
    head.touch();
    store.save_container_version(&head).await?;

    tracing::debug!(concept = %concept.id, version = %version.id, "Created concept");
    Ok(version)
}

/// Save edits to an existing concept as a new version.
pub async fn persist_concept_version<S: ResourceStore + ?Sized>(
    store: &S,
    concept: &mut Concept,
    user: Option<&UserId>,
) -> OclResult<ConceptVersion> {
    let parent = store
        .get_container(&concept.parent_id)
        .await?
        .ok_or_else(|| OclError::not_found("Container", concept.parent_id.as_str()))?;
    validate_concept(concept, &parent)?;
    let mut head = require_source(store, &parent).await?;

    concept.updated_by = user.cloned();
    concept.updated_at = Utc::now();

    let previous = concept.latest_version_id.clone();
    let version = ConceptVersion::snapshot(concept, previous.clone());
    store.save_concept_version(&version).await?;
    concept.latest_version_id = Some(version.id.clone());
    store.save_concept(concept).await?;

    match &previous {
        Some(prev) => head.replace_concept(prev, &version.id),
        None => head.add_concept(&version.id),
    }
    head.touch();
    store.save_container_version(&head).await?;

    tracing::debug!(
        concept = %concept.id,
        version = %version.id,
        previous = ?previous,
        "Saved concept version"
    );
    Ok(version)
}

/// Create a mapping between two existing concepts inside `parent`.
pub async fn persist_new_mapping<S: ResourceStore + ?Sized>(
    store: &S,
    mapping: &mut Mapping,
    parent: &Container,
    user: Option<&UserId>,
) -> OclResult<MappingVersion> {
    if mapping.map_type.trim().is_empty() {
        return Err(OclError::Validation("map_type: required".into()));
    }
    for id in [&mapping.from_concept_id, &mapping.to_concept_id] {
        if store.get_concept(id).await?.is_none() {
            return Err(OclError::Validation(format!(
                "concept: {id} does not exist"
            )));
        }
    }
    let mut head = require_source(store, parent).await?;

    mapping.parent_id = parent.id.clone();
    mapping.uri = format!("{}mappings/{}/", parent.uri, mapping.id);
    mapping.created_by = user.cloned();
    mapping.updated_by = user.cloned();

    let version = MappingVersion::snapshot(mapping, None);
    store.save_mapping_version(&version).await?;
    mapping.latest_version_id = Some(version.id.clone());
    store.save_mapping(mapping).await?;

    head.add_mapping(&version.id);
    head.touch();
    store.save_container_version(&head).await?;

    tracing::debug!(mapping = %mapping.id, version = %version.id, "Created mapping");
    Ok(version)
}

pub async fn persist_mapping_version<S: ResourceStore + ?Sized>(
    store: &S,
    mapping: &mut Mapping,
    user: Option<&UserId>,
) -> OclResult<MappingVersion> {
    let parent = store
        .get_container(&mapping.parent_id)
        .await?
        .ok_or_else(|| OclError::not_found("Container", mapping.parent_id.as_str()))?;
    let mut head = require_source(store, &parent).await?;

    mapping.updated_by = user.cloned();
    mapping.updated_at = Utc::now();

    let previous = mapping.latest_version_id.clone();
    let version = MappingVersion::snapshot(mapping, previous.clone());
    store.save_mapping_version(&version).await?;
    mapping.latest_version_id = Some(version.id.clone());
    store.save_mapping(mapping).await?;

    match &previous {
        Some(prev) => head.replace_mapping(prev, &version.id),
        None => head.add_mapping(&version.id),
    }
    head.touch();
    store.save_container_version(&head).await?;
    Ok(version)
}

/// Delete a concept with every one of its versions.
///
/// Returns the deleted version ids, latest first, so the caller can drop
/// their search documents.
pub async fn delete_concept<S: ResourceStore + ?Sized>(
    store: &S,
    id: &ConceptId,
) -> OclResult<Vec<VersionId>> {
    let concept = store
        .get_concept(id)
        .await?
        .ok_or_else(|| OclError::not_found("Concept", id.as_str()))?;

    let mut versions = Vec::new();
    let mut next = concept.latest_version_id.clone();
    while let Some(version_id) = next.take() {
        if versions.contains(&version_id) {
            break;
        }
        next = store
            .get_concept_version(&version_id)
            .await?
            .and_then(|v| v.previous_version_id);
        versions.push(version_id);
    }

    let root = Identifier::Concept(concept.id.clone());
    detach_from_collections(store, VersionKind::ConceptVersion, &root, &versions).await?;

    if let Some(mut head) = store.head_version(&concept.parent_id).await? {
        let mut changed = false;
        for version_id in &versions {
            changed |= head.remove_concept(version_id);
        }
        if changed {
            head.touch();
            store.save_container_version(&head).await?;
        }
    }

    for version_id in &versions {
        store.delete_concept_version(version_id).await?;
    }
    store.delete_concept(id).await?;

    tracing::info!(concept = %id, versions = versions.len(), "Deleted concept");
    Ok(versions)
}

/// Delete a mapping with every one of its versions.
pub async fn delete_mapping<S: ResourceStore + ?Sized>(
    store: &S,
    id: &MappingId,
) -> OclResult<Vec<VersionId>> {
    let mapping = store
        .get_mapping(id)
        .await?
        .ok_or_else(|| OclError::not_found("Mapping", id.as_str()))?;

    let mut versions = Vec::new();
    let mut next = mapping.latest_version_id.clone();
    while let Some(version_id) = next.take() {
        if versions.contains(&version_id) {
            break;
        }
        next = store
            .get_mapping_version(&version_id)
            .await?
            .and_then(|v| v.previous_version_id);
        versions.push(version_id);
    }

    let root = Identifier::Mapping(mapping.id.clone());
    detach_from_collections(store, VersionKind::MappingVersion, &root, &versions).await?;

    if let Some(mut head) = store.head_version(&mapping.parent_id).await? {
        let mut changed = false;
        for version_id in &versions {
            changed |= head.remove_mapping(version_id);
        }
        if changed {
            head.touch();
            store.save_container_version(&head).await?;
        }
    }

    for version_id in &versions {
        store.delete_mapping_version(version_id).await?;
    }
    store.delete_mapping(id).await?;

    tracing::info!(mapping = %id, versions = versions.len(), "Deleted mapping");
    Ok(versions)
}

/// Drop `versions` and any reference pointing at them or at `root` from
/// every collection version that lists one of them.
async fn detach_from_collections<S: ResourceStore + ?Sized>(
    store: &S,
    kind: VersionKind,
    root: &Identifier,
    versions: &[VersionId],
) -> OclResult<()> {
    let mut collections = Vec::new();
    for version_id in versions {
        for collection in store.collections_containing(kind, version_id).await? {
            if !collections.contains(&collection) {
                collections.push(collection);
            }
        }
    }

    let targets_deleted = |id: &Identifier| {
        id == root
            || match id {
                Identifier::ConceptVersion(v) | Identifier::MappingVersion(v) => {
                    versions.contains(v)
                }
                _ => false,
            }
    };

    for collection_id in collections {
        let Some(mut collection) = store.get_container_version(&collection_id).await? else {
            continue;
        };
        for version_id in versions {
            match kind {
                VersionKind::ConceptVersion => collection.remove_concept(version_id),
                VersionKind::MappingVersion => collection.remove_mapping(version_id),
            };
        }
        collection.references.retain(|r| {
            !r.concepts.iter().any(&targets_deleted) && !r.mappings.iter().any(&targets_deleted)
        });
        collection.touch();
        store.save_container_version(&collection).await?;
        tracing::debug!(collection = %collection_id, "Detached deleted resource");
    }
    Ok(())
}
