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

//! Identifier resolution.
//!
//! Root identifiers resolve to the version their root currently points at;
//! version identifiers resolve to themselves once the version record is
//! found in the store. The result is a set.

use ocl_core::{Identifier, OclError, OclResult, ResourceKind, VersionId};
use ocl_storage::ResourceStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// What to do with identifiers that resolve to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingIdPolicy {
    /// Skip, log a warning and list them in [`Resolution::missing`]
    #[default]
    Report,
    /// Fail with `NotFound` on the first miss
    Fail,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub version_ids: BTreeSet<VersionId>,
    pub missing: Vec<Identifier>,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.version_ids.is_empty()
    }

    pub fn to_vec(&self) -> Vec<VersionId> {
        self.version_ids.iter().cloned().collect()
    }
}

/// Resolve `ids` of one resource `kind` to concrete version ids.
pub async fn resolve<S: ResourceStore + ?Sized>(
    store: &S,
    ids: &[Identifier],
    kind: ResourceKind,
    policy: MissingIdPolicy,
) -> OclResult<Resolution> {
    let mut resolution = Resolution::default();

    for id in ids {
        if id.kind() != kind {
            return Err(OclError::invalid_argument(format!(
                "{id} passed where a {kind} identifier was expected"
            )));
        }

        let resolved = match id {
            Identifier::ConceptVersion(v) => store.get_concept_version(v).await?.map(|cv| cv.id),
            Identifier::MappingVersion(v) => store.get_mapping_version(v).await?.map(|mv| mv.id),
            Identifier::Concept(root) => store
                .get_concept(root)
                .await?
                .and_then(|c| c.latest_version_id),
            Identifier::Mapping(root) => store
                .get_mapping(root)
                .await?
                .and_then(|m| m.latest_version_id),
        };

        match resolved {
            Some(version) => {
                resolution.version_ids.insert(version);
            }
            None => match policy {
                MissingIdPolicy::Fail => {
                    return Err(OclError::not_found(id.record_name(), id.as_str()));
                }
                MissingIdPolicy::Report => {
                    tracing::warn!(identifier = %id, "Identifier did not resolve to a version");
                    if !resolution.missing.contains(id) {
                        resolution.missing.push(id.clone());
                    }
                }
            },
        }
    }

    Ok(resolution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocl_core::{ConceptId, MappingId};
    use ocl_storage::fixtures::{create_mapping, OclTestContext};
    use ocl_storage::persist_concept_version;

    #[tokio::test]
    async fn test_roots_resolve_to_latest_and_versions_pass_through() {
        let ctx = OclTestContext::setup().await.unwrap();
        let first = ctx.concept("First").unwrap();
        let second = ctx.concept("Second").unwrap();
        let second_v = second.latest_version_id.clone().unwrap();

        let ids = vec![
            Identifier::Concept(first.id.clone()),
            Identifier::ConceptVersion(second_v.clone()),
            Identifier::Concept(first.id.clone()),
        ];
        let resolution = resolve(ctx.store.as_ref(), &ids, ResourceKind::Concept, MissingIdPolicy::Report)
            .await
            .unwrap();

        let expected: BTreeSet<_> = [first.latest_version_id.clone().unwrap(), second_v]
            .into_iter()
            .collect();
        assert_eq!(resolution.version_ids, expected);
        assert!(resolution.missing.is_empty());
    }

    #[tokio::test]
    async fn test_resolution_follows_new_version() {
        let ctx = OclTestContext::setup().await.unwrap();
        let mut drug = ctx.concept("Drug").unwrap().clone();
        let v1 = drug.latest_version_id.clone().unwrap();
        let v2 = persist_concept_version(ctx.store.as_ref(), &mut drug, Some(&ctx.user.id))
            .await
            .unwrap();

        let resolution = resolve(
            ctx.store.as_ref(),
            &[Identifier::Concept(drug.id.clone())],
            ResourceKind::Concept,
            MissingIdPolicy::Report,
        )
        .await
        .unwrap();
        assert_eq!(resolution.to_vec(), vec![v2.id]);
        assert!(!resolution.version_ids.contains(&v1));
    }

    #[tokio::test]
    async fn test_missing_ids_follow_policy() {
        let ctx = OclTestContext::setup().await.unwrap();
        let ids = vec![Identifier::Concept(ConceptId::from("ghost"))];

        let report = resolve(ctx.store.as_ref(), &ids, ResourceKind::Concept, MissingIdPolicy::Report)
            .await
            .unwrap();
        assert!(report.is_empty());
        assert_eq!(report.missing, ids);

        let err = resolve(ctx.store.as_ref(), &ids, ResourceKind::Concept, MissingIdPolicy::Fail)
            .await
            .unwrap_err();
        assert!(matches!(err, OclError::NotFound { kind: "Concept", .. }));
    }

    #[tokio::test]
    async fn test_unknown_version_ids_follow_policy() {
        let ctx = OclTestContext::setup().await.unwrap();
        let known = ctx.concept("First").unwrap().latest_version_id.clone().unwrap();
        let ghost = Identifier::ConceptVersion(VersionId::from("ghost-version"));
        let ids = vec![Identifier::ConceptVersion(known.clone()), ghost.clone()];

        let report = resolve(ctx.store.as_ref(), &ids, ResourceKind::Concept, MissingIdPolicy::Report)
            .await
            .unwrap();
        assert_eq!(report.to_vec(), vec![known]);
        assert_eq!(report.missing, vec![ghost.clone()]);

        let err = resolve(ctx.store.as_ref(), &ids, ResourceKind::Concept, MissingIdPolicy::Fail)
            .await
            .unwrap_err();
        assert!(matches!(err, OclError::NotFound { kind: "ConceptVersion", .. }));

        let mapping_ghost = [Identifier::MappingVersion(VersionId::from("ghost-version"))];
        let report = resolve(
            ctx.store.as_ref(),
            &mapping_ghost,
            ResourceKind::Mapping,
            MissingIdPolicy::Report,
        )
        .await
        .unwrap();
        assert!(report.is_empty());
        assert_eq!(report.missing, mapping_ghost.to_vec());
    }

    #[tokio::test]
    async fn test_kind_mismatch_and_mappings() {
        let ctx = OclTestContext::setup().await.unwrap();
        let a = ctx.concept("First").unwrap();
        let b = ctx.concept("Second").unwrap();
        let (mapping, version) =
            create_mapping(ctx.store.as_ref(), &ctx.user, &ctx.source, a, b, None)
                .await
                .unwrap();

        let ids = vec![Identifier::Mapping(mapping.id.clone())];
        let err = resolve(ctx.store.as_ref(), &ids, ResourceKind::Concept, MissingIdPolicy::Report)
            .await
            .unwrap_err();
        assert!(matches!(err, OclError::InvalidArgument(_)));

        let ok = resolve(
            ctx.store.as_ref(),
            &[ids[0].clone(), Identifier::Mapping(MappingId::from("ghost"))],
            ResourceKind::Mapping,
            MissingIdPolicy::Report,
        )
        .await
        .unwrap();
        assert_eq!(ok.to_vec(), vec![version.id]);
        assert_eq!(ok.missing.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let ctx = OclTestContext::setup().await.unwrap();
        let resolution = resolve(ctx.store.as_ref(), &[], ResourceKind::Mapping, MissingIdPolicy::Fail)
            .await
            .unwrap();
        assert!(resolution.is_empty());
    }
}
