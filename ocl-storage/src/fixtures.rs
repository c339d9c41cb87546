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

//! Factories for tests.
//!
//! Each factory fills in random mnemonics where the caller does not care and
//! persists through the lifecycle functions, so records look exactly like
//! ones created at runtime.

use chrono::Utc;
use ocl_core::{
    AccessType, Concept, ConceptVersion, Container, ContainerKind, ContainerVersion,
    LocalizedText, Mapping, MappingVersion, OclError, OclResult, Organization, OrganizationId,
    Owner, User, UserId, UserProfile,
};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::Arc;

use crate::lifecycle::{
    persist_new_concept, persist_new_container, persist_new_mapping, persist_new_organization,
    persist_new_user,
};
use crate::store::{MemoryStore, ResourceStore};

/// Uppercase letters and digits.
pub fn generate_random_string(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .map(|b| (b as char).to_ascii_uppercase())
        .take(length)
        .collect()
}

pub fn create_localized_text(name: &str) -> LocalizedText {
    LocalizedText::new(name)
}

pub async fn create_user<S: ResourceStore + ?Sized>(store: &S) -> OclResult<(User, UserProfile)> {
    let suffix = generate_random_string(5);
    let user = User {
        id: UserId::generate(),
        username: format!("test{suffix}"),
        email: format!("user{suffix}@test.com"),
        first_name: "Test".into(),
        last_name: "User".into(),
        created_at: Utc::now(),
    };
    let profile = persist_new_user(store, &user, &format!("user{suffix}")).await?;
    Ok((user, profile))
}

/// Extra profile for an existing user.
pub async fn create_user_profile<S: ResourceStore + ?Sized>(
    store: &S,
    user: &User,
) -> OclResult<UserProfile> {
    let profile = UserProfile {
        user_id: user.id.clone(),
        mnemonic: format!("user{}", generate_random_string(5)),
    };
    store.save_user_profile(&profile).await?;
    Ok(profile)
}

pub async fn create_organization<S: ResourceStore + ?Sized>(
    store: &S,
    name: Option<&str>,
) -> OclResult<Organization> {
    let name = name
        .map(str::to_string)
        .unwrap_or_else(|| format!("org{}", generate_random_string(5)));
    let org = Organization {
        id: OrganizationId::generate(),
        mnemonic: name.clone(),
        name,
    };
    persist_new_organization(store, &org).await?;
    Ok(org)
}

async fn owner_for<S: ResourceStore + ?Sized>(
    store: &S,
    user: &User,
    organization: Option<&Organization>,
) -> OclResult<Owner> {
    match organization {
        Some(org) => Ok(Owner::Organization {
            mnemonic: org.mnemonic.clone(),
        }),
        None => {
            let profile = store
                .get_user_profile(&user.id)
                .await?
                .ok_or_else(|| OclError::not_found("UserProfile", user.id.as_str()))?;
            Ok(Owner::User {
                mnemonic: profile.mnemonic,
            })
        }
    }
}

/// Source owned by `organization`, or by the user's profile when `None`.
pub async fn create_source<S: ResourceStore + ?Sized>(
    store: &S,
    user: &User,
    validation_schema: Option<&str>,
    organization: Option<&Organization>,
    name: Option<&str>,
) -> OclResult<(Container, ContainerVersion)> {
    let suffix = generate_random_string(5);
    let owner = owner_for(store, user, organization).await?;
    let mnemonic = name
        .map(str::to_string)
        .unwrap_or_else(|| format!("source{suffix}"));

    let mut source = Container::new(ContainerKind::Source, mnemonic, owner);
    source.full_name = name
        .map(str::to_string)
        .unwrap_or_else(|| format!("Source {suffix}"));
    source.public_access = AccessType::Edit;
    source.website = Some("www.source.com".into());
    source.description = Some("This is a test source".into());
    source.custom_validation_schema = validation_schema.map(str::to_string);

    let head = persist_new_container(store, &mut source, Some(&user.id)).await?;
    Ok((source, head))
}

pub async fn create_collection<S: ResourceStore + ?Sized>(
    store: &S,
    user: &User,
    organization: Option<&Organization>,
    name: Option<&str>,
) -> OclResult<(Container, ContainerVersion)> {
    let suffix = generate_random_string(5);
    let owner = owner_for(store, user, organization).await?;
    let mnemonic = name
        .map(str::to_string)
        .unwrap_or_else(|| format!("collection{suffix}"));

    let mut collection = Container::new(ContainerKind::Collection, mnemonic, owner);
    collection.full_name = name
        .map(str::to_string)
        .unwrap_or_else(|| format!("Collection {suffix}"));
    collection.description = Some("This is a test collection".into());

    let head = persist_new_container(store, &mut collection, Some(&user.id)).await?;
    Ok((collection, head))
}

/// Optional fields of [`create_concept`].
#[derive(Debug, Clone, Default)]
pub struct ConceptSpec {
    pub names: Vec<LocalizedText>,
    pub mnemonic: Option<String>,
    pub descriptions: Vec<LocalizedText>,
    pub concept_class: Option<String>,
}

impl ConceptSpec {
    pub fn named(name: &str) -> Self {
        Self {
            names: vec![create_localized_text(name)],
            ..Default::default()
        }
    }

    pub fn concept_class(mut self, concept_class: &str) -> Self {
        self.concept_class = Some(concept_class.to_string());
        self
    }

    pub fn mnemonic(mut self, mnemonic: &str) -> Self {
        self.mnemonic = Some(mnemonic.to_string());
        self
    }
}

pub async fn create_concept<S: ResourceStore + ?Sized>(
    store: &S,
    user: &User,
    source: &Container,
    options: ConceptSpec,
) -> OclResult<(Concept, ConceptVersion)> {
    let suffix = generate_random_string(5);
    let names = if options.names.is_empty() {
        vec![create_localized_text(&format!("name{suffix}"))]
    } else {
        options.names
    };
    let descriptions = if options.descriptions.is_empty() {
        vec![create_localized_text(&format!("desc{suffix}"))]
    } else {
        options.descriptions
    };

    let mut concept = Concept::new(options.mnemonic.unwrap_or_else(|| format!("concept{suffix}")))
        .concept_class(options.concept_class.unwrap_or_else(|| "First".to_string()))
        .datatype("None")
        .names(names)
        .descriptions(descriptions);
    let version = persist_new_concept(store, &mut concept, source, Some(&user.id)).await?;
    Ok((concept, version))
}

pub async fn create_mapping<S: ResourceStore + ?Sized>(
    store: &S,
    user: &User,
    source: &Container,
    from: &Concept,
    to: &Concept,
    map_type: Option<&str>,
) -> OclResult<(Mapping, MappingVersion)> {
    let mut mapping = Mapping::new(
        map_type.unwrap_or("Same As"),
        from.id.clone(),
        to.id.clone(),
    );
    let version = persist_new_mapping(store, &mut mapping, source, Some(&user.id)).await?;
    Ok((mapping, version))
}

/// Base world shared by integration tests: one user, organization `OCL`,
/// source `Classes` and seven "Concept Class" concepts.
pub struct OclTestContext {
    pub store: Arc<MemoryStore>,
    pub user: User,
    pub organization: Organization,
    pub source: Container,
    pub source_head: ContainerVersion,
    pub concepts: Vec<Concept>,
}

pub const CLASS_NAMES: [&str; 7] = [
    "First",
    "Second",
    "Third",
    "Fourth",
    "Diagnosis",
    "Drug",
    "not First",
];

impl OclTestContext {
    pub async fn setup() -> OclResult<Self> {
        Self::setup_with(Arc::new(MemoryStore::in_memory())).await
    }

    pub async fn setup_with(store: Arc<MemoryStore>) -> OclResult<Self> {
        let (user, _) = create_user(store.as_ref()).await?;
        let organization = create_organization(store.as_ref(), Some("OCL")).await?;
        let (source, _) = create_source(
            store.as_ref(),
            &user,
            None,
            Some(&organization),
            Some("Classes"),
        )
        .await?;

        let mut concepts = Vec::with_capacity(CLASS_NAMES.len());
        for name in CLASS_NAMES {
            let (concept, _) = create_concept(
                store.as_ref(),
                &user,
                &source,
                ConceptSpec::named(name).concept_class("Concept Class"),
            )
            .await?;
            concepts.push(concept);
        }

        let source_head = store
            .head_version(&source.id)
            .await?
            .ok_or_else(|| OclError::not_found("ContainerVersion", source.uri.as_str()))?;

        Ok(Self {
            store,
            user,
            organization,
            source,
            source_head,
            concepts,
        })
    }

    /// Concept created from `CLASS_NAMES[i]`
    pub fn concept(&self, name: &str) -> Option<&Concept> {
        self.concepts.iter().find(|c| c.display_name() == Some(name))
    }

    pub async fn teardown(self) -> OclResult<()> {
        self.store.clear().await
    }
}
