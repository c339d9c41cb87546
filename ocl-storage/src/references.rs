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

//! Applying reference changes to a collection version.

use ocl_core::{
    diff, normalize_expression, CollectionReference, ContainerKind, ContainerVersion,
    ContainerVersionId, ExpressionSelector, Identifier, OclError, OclResult,
    ReferenceBatchRequest, ReferenceDiff, ReferenceError, ResourceKind, VersionId,
};
use std::collections::HashSet;

use crate::store::{require_container_version, ResourceStore, UriTarget};

pub const INVALID_EXPRESSION: &str = "Expression specified is not valid.";
pub const DUPLICATE_RESOURCE: &str =
    "Concept or Mapping reference name must be unique in a collection.";

/// Outcome of saving a new reference list.
#[derive(Debug, Clone)]
pub struct ReferenceUpdate {
    /// The collection version as persisted
    pub version: ContainerVersion,
    /// Reference list before the change
    pub previous: Vec<CollectionReference>,
    /// Expressions rejected by validation
    pub errors: Vec<ReferenceError>,
}

impl ReferenceUpdate {
    pub fn diff(&self) -> ReferenceDiff {
        diff(&self.version.references, &self.previous)
    }
}

/// Turn a batch request into a flat list of expressions, expanding `*`
/// selectors against the container named by `request.uri`.
pub async fn expand_expressions<S: ResourceStore + ?Sized>(
    store: &S,
    request: &ReferenceBatchRequest,
) -> OclResult<Vec<String>> {
    let mut expressions = request.expressions.clone();

    for (kind, selector) in [
        (ResourceKind::Concept, &request.concepts),
        (ResourceKind::Mapping, &request.mappings),
    ] {
        match selector {
            ExpressionSelector::All => {
                let uri = request.uri.as_deref().ok_or_else(|| {
                    OclError::Validation(format!(
                        "uri: required to add all {}s of a container",
                        kind.as_str().to_lowercase()
                    ))
                })?;
                expressions.extend(expand_wildcard(store, uri, kind).await?);
            }
            ExpressionSelector::List(list) => expressions.extend(list.iter().cloned()),
            ExpressionSelector::Empty => {}
        }
    }

    let mut seen = HashSet::new();
    expressions.retain(|e| seen.insert(normalize_expression(e)));
    Ok(expressions)
}

async fn expand_wildcard<S: ResourceStore + ?Sized>(
    store: &S,
    uri: &str,
    kind: ResourceKind,
) -> OclResult<Vec<String>> {
    // Version URIs stand for their container. Either way the expansion is
    // every root URI whose parent is that container.
    let container = match store.container_version_by_uri(uri).await? {
        Some(version) => store.get_container(&version.versioned_object_id).await?,
        None => store.container_by_uri(uri).await?,
    }
    .ok_or_else(|| OclError::Validation(format!("uri: {uri} does not name a container")))?;

    Ok(match kind {
        ResourceKind::Concept => store
            .concepts_in(&container.id)
            .await?
            .into_iter()
            .map(|c| c.uri)
            .collect(),
        ResourceKind::Mapping => store
            .mappings_in(&container.id)
            .await?
            .into_iter()
            .map(|m| m.uri)
            .collect(),
    })
}

/// Version id and root key for a reference target.
fn target_version(target: &UriTarget) -> Option<(ResourceKind, VersionId, String)> {
    match target {
        UriTarget::Concept(c) => c
            .latest_version_id
            .clone()
            .map(|v| (ResourceKind::Concept, v, c.id.to_string())),
        UriTarget::ConceptVersion(v) => Some((
            ResourceKind::Concept,
            v.id.clone(),
            v.versioned_object_id.to_string(),
        )),
        UriTarget::Mapping(m) => m
            .latest_version_id
            .clone()
            .map(|v| (ResourceKind::Mapping, v, m.id.to_string())),
        UriTarget::MappingVersion(v) => Some((
            ResourceKind::Mapping,
            v.id.clone(),
            v.versioned_object_id.to_string(),
        )),
    }
}

/// Root ids of every concept and mapping currently listed in `version`.
async fn listed_roots<S: ResourceStore + ?Sized>(
    store: &S,
    version: &ContainerVersion,
) -> OclResult<HashSet<String>> {
    let mut roots: HashSet<String> = store
        .concept_versions(&version.concepts)
        .await?
        .into_iter()
        .map(|v| v.versioned_object_id.to_string())
        .collect();
    roots.extend(
        store
            .mapping_versions(&version.mappings)
            .await?
            .into_iter()
            .map(|v| v.versioned_object_id.to_string()),
    );
    Ok(roots)
}

/// Add `expressions` to a collection version's references.
///
/// Rejected expressions are collected in `errors`; valid ones are saved
/// regardless.
pub async fn add_references<S: ResourceStore + ?Sized>(
    store: &S,
    collection_version_id: &ContainerVersionId,
    expressions: &[String],
) -> OclResult<ReferenceUpdate> {
    let mut version = require_container_version(store, collection_version_id).await?;
    if version.kind != ContainerKind::Collection {
        return Err(OclError::Validation(format!(
            "{} is not a collection version",
            version.uri
        )));
    }

    let previous = version.references.clone();
    let mut present: HashSet<String> = previous.iter().map(CollectionReference::key).collect();
    let mut roots = listed_roots(store, &version).await?;
    let mut errors = Vec::new();

    for expression in expressions {
        let key = normalize_expression(expression);
        if present.contains(&key) {
            continue;
        }

        let Some(target) = store.find_by_uri(&key).await? else {
            errors.push(ReferenceError::new(expression.as_str(), INVALID_EXPRESSION));
            continue;
        };
        let Some((kind, version_id, root)) = target_version(&target) else {
            errors.push(ReferenceError::new(expression.as_str(), INVALID_EXPRESSION));
            continue;
        };
        if !roots.insert(root) {
            errors.push(ReferenceError::new(expression.as_str(), DUPLICATE_RESOURCE));
            continue;
        }

        let reference = match kind {
            ResourceKind::Concept => {
                version.add_concept(&version_id);
                CollectionReference::new(&key).with_concept(target.identifier())
            }
            ResourceKind::Mapping => {
                version.add_mapping(&version_id);
                CollectionReference::new(&key).with_mapping(target.identifier())
            }
        };
        version.references.push(reference);
        present.insert(key);
    }

    version.touch();
    store.save_container_version(&version).await?;

    if !errors.is_empty() {
        tracing::warn!(
            collection = %version.id,
            rejected = errors.len(),
            "Some reference expressions were rejected"
        );
    }

    Ok(ReferenceUpdate {
        version,
        previous,
        errors,
    })
}

/// Remove references by expression and drop the versions they brought in.
pub async fn remove_references<S: ResourceStore + ?Sized>(
    store: &S,
    collection_version_id: &ContainerVersionId,
    expressions: &[String],
) -> OclResult<ReferenceUpdate> {
    let mut version = require_container_version(store, collection_version_id).await?;
    let previous = version.references.clone();
    let doomed: HashSet<String> = expressions.iter().map(|e| normalize_expression(e)).collect();

    let (removed, kept): (Vec<_>, Vec<_>) = previous
        .iter()
        .cloned()
        .partition(|r| doomed.contains(&r.key()));
    if removed.is_empty() {
        return Ok(ReferenceUpdate {
            version,
            previous,
            errors: Vec::new(),
        });
    }

    let mut drop_versions: HashSet<VersionId> = HashSet::new();
    let mut drop_roots: HashSet<String> = HashSet::new();
    for identifier in removed.iter().flat_map(|r| r.concepts.iter().chain(&r.mappings)) {
        match identifier {
            Identifier::ConceptVersion(v) | Identifier::MappingVersion(v) => {
                drop_versions.insert(v.clone());
            }
            Identifier::Concept(_) | Identifier::Mapping(_) => {
                drop_roots.insert(identifier.as_str().to_string());
            }
        }
    }

    for v in store.concept_versions(&version.concepts).await? {
        if drop_roots.contains(v.versioned_object_id.as_str()) {
            drop_versions.insert(v.id);
        }
    }
    for v in store.mapping_versions(&version.mappings).await? {
        if drop_roots.contains(v.versioned_object_id.as_str()) {
            drop_versions.insert(v.id);
        }
    }

    version.concepts.retain(|v| !drop_versions.contains(v));
    version.mappings.retain(|v| !drop_versions.contains(v));
    version.references = kept;
    version.touch();
    store.save_container_version(&version).await?;

    tracing::info!(
        collection = %version.id,
        removed = removed.len(),
        "Removed collection references"
    );

    Ok(ReferenceUpdate {
        version,
        previous,
        errors: Vec::new(),
    })
}

/// Make the reference list equal to `expressions`: drop what is no longer
/// listed, then add what is new. `previous` is the list before either step.
pub async fn replace_references<S: ResourceStore + ?Sized>(
    store: &S,
    collection_version_id: &ContainerVersionId,
    expressions: &[String],
) -> OclResult<ReferenceUpdate> {
    let current = require_container_version(store, collection_version_id).await?;
    let wanted: HashSet<String> = expressions.iter().map(|e| normalize_expression(e)).collect();
    let stale: Vec<String> = current
        .references
        .iter()
        .map(CollectionReference::key)
        .filter(|k| !wanted.contains(k))
        .collect();

    if !stale.is_empty() {
        remove_references(store, collection_version_id, &stale).await?;
    }
    let mut update = add_references(store, collection_version_id, expressions).await?;
    update.previous = current.references;
    Ok(update)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{persist_concept_version, persist_new_container, persist_new_concept};
    use crate::store::MemoryStore;
    use ocl_core::{Concept, Container, LocalizedText, Owner};

    struct World {
        store: MemoryStore,
        source: Container,
        concepts: Vec<Concept>,
        collection: ContainerVersion,
    }

    async fn world() -> World {
        let store = MemoryStore::in_memory();
        let owner = Owner::Organization {
            mnemonic: "OCL".into(),
        };
        let mut source = Container::new(ContainerKind::Source, "Classes", owner.clone());
        persist_new_container(&store, &mut source, None).await.unwrap();

        let mut concepts = Vec::new();
        for name in ["First", "Second", "Third"] {
            let mut c = Concept::new(name).names(vec![LocalizedText::new(name)]);
            persist_new_concept(&store, &mut c, &source, None)
                .await
                .unwrap();
            concepts.push(c);
        }

        let mut collection = Container::new(ContainerKind::Collection, "Starter", owner);
        let collection = persist_new_container(&store, &mut collection, None)
            .await
            .unwrap();

        World {
            store,
            source,
            concepts,
            collection,
        }
    }

    #[tokio::test]
    async fn test_add_references_records_versions() {
        let w = world().await;
        let exprs = vec![w.concepts[0].uri.clone(), w.concepts[1].uri.clone()];

        let update = add_references(&w.store, &w.collection.id, &exprs)
            .await
            .unwrap();
        assert!(update.errors.is_empty());
        assert_eq!(update.version.references.len(), 2);
        assert_eq!(update.version.concepts.len(), 2);
        assert_eq!(update.diff().added.len(), 2);
        assert!(update.diff().removed.is_empty());

        // Re-adding is a no-op
        let again = add_references(&w.store, &w.collection.id, &exprs)
            .await
            .unwrap();
        assert!(again.diff().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_and_duplicate_expressions_are_reported() {
        let mut w = world().await;
        let v1_uri = {
            let v1 = w.concepts[0].latest_version_id.clone().unwrap();
            w.store.get_concept_version(&v1).await.unwrap().unwrap().uri
        };
        persist_concept_version(&w.store, &mut w.concepts[0], None)
            .await
            .unwrap();

        let exprs = vec![
            w.concepts[0].uri.clone(),
            v1_uri.clone(),
            "/orgs/OCL/sources/Classes/concepts/Nope/".to_string(),
        ];
        let update = add_references(&w.store, &w.collection.id, &exprs)
            .await
            .unwrap();

        assert_eq!(update.version.references.len(), 1);
        let messages: Vec<_> = update.errors.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec![DUPLICATE_RESOURCE, INVALID_EXPRESSION]);
    }

    #[tokio::test]
    async fn test_wildcard_expands_source_concepts() {
        let w = world().await;
        let request: ReferenceBatchRequest = serde_json::from_value(serde_json::json!({
            "concepts": "*",
            "uri": w.source.uri,
        }))
        .unwrap();

        let expressions = expand_expressions(&w.store, &request).await.unwrap();
        assert_eq!(expressions.len(), 3);
        assert!(expressions.contains(&w.concepts[2].uri));
    }

    #[tokio::test]
    async fn test_wildcard_on_version_uri_expands_to_roots() {
        let mut w = world().await;
        persist_concept_version(&w.store, &mut w.concepts[0], None)
            .await
            .unwrap();
        let head = w.store.head_version(&w.source.id).await.unwrap().unwrap();
        let request = ReferenceBatchRequest {
            concepts: ExpressionSelector::All,
            uri: Some(head.uri.clone()),
            ..Default::default()
        };

        let mut expressions = expand_expressions(&w.store, &request).await.unwrap();
        expressions.sort();
        let mut roots: Vec<String> = w.concepts.iter().map(|c| c.uri.clone()).collect();
        roots.sort();
        assert_eq!(expressions, roots);
    }

    #[tokio::test]
    async fn test_wildcard_on_collection_expands_to_nothing() {
        let w = world().await;
        let exprs: Vec<String> = w.concepts.iter().map(|c| c.uri.clone()).collect();
        add_references(&w.store, &w.collection.id, &exprs)
            .await
            .unwrap();
        let collection = w
            .store
            .get_container(&w.collection.versioned_object_id)
            .await
            .unwrap()
            .unwrap();

        for uri in [w.collection.uri.clone(), collection.uri] {
            let request = ReferenceBatchRequest {
                concepts: ExpressionSelector::All,
                uri: Some(uri),
                ..Default::default()
            };
            assert!(expand_expressions(&w.store, &request).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_wildcard_without_uri_is_rejected() {
        let w = world().await;
        let request = ReferenceBatchRequest {
            mappings: ExpressionSelector::All,
            ..Default::default()
        };
        let err = expand_expressions(&w.store, &request).await.unwrap_err();
        assert!(matches!(err, OclError::Validation(_)));
    }

    #[tokio::test]
    async fn test_remove_references_drops_versions() {
        let w = world().await;
        let exprs: Vec<String> = w.concepts.iter().map(|c| c.uri.clone()).collect();
        add_references(&w.store, &w.collection.id, &exprs)
            .await
            .unwrap();

        let update = remove_references(&w.store, &w.collection.id, &exprs[..1])
            .await
            .unwrap();
        assert_eq!(update.version.references.len(), 2);
        assert_eq!(update.version.concepts.len(), 2);
        assert_eq!(update.diff().removed_keys(), vec![w.concepts[0].uri.clone()]);
    }

    #[tokio::test]
    async fn test_replace_swaps_one_concept() {
        let w = world().await;
        let uri = |i: usize| w.concepts[i].uri.clone();
        add_references(&w.store, &w.collection.id, &[uri(0), uri(1)])
            .await
            .unwrap();

        let update = replace_references(&w.store, &w.collection.id, &[uri(1), uri(2)])
            .await
            .unwrap();
        let diff = update.diff();
        assert_eq!(diff.added_keys(), vec![uri(2)]);
        assert_eq!(diff.removed_keys(), vec![uri(0)]);
        assert_eq!(update.version.concepts.len(), 2);
    }
}
