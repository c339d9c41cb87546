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

//! Terminology records
//!
//! Containers (sources and collections) group concepts and mappings. Every
//! content mutation produces a new immutable version record; root records
//! keep a mutable pointer to their latest version.
//!
//! ```text
//! Container ──► ContainerVersion (HEAD, v1, ...)
//!    │               ├── concepts: [VersionId]
//!    │               ├── mappings: [VersionId]
//!    │               └── references (collections only)
//!    ├── Concept ──► ConceptVersion ...
//!    └── Mapping ──► MappingVersion ...
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{
    ConceptId, ContainerId, ContainerKind, ContainerVersionId, MappingId, OrganizationId, UserId,
    VersionId,
};
use crate::reference::CollectionReference;

/// Mnemonic given to the mutable head version of every container.
pub const HEAD: &str = "HEAD";

/// Name type that satisfies the OpenMRS validation schema.
pub const FULLY_SPECIFIED: &str = "FULLY_SPECIFIED";

/// Public access level of a container or mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AccessType {
    #[default]
    View,
    Edit,
    None,
}

/// A name or description in one locale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedText {
    pub name: String,
    pub locale: String,
    #[serde(rename = "type")]
    pub text_type: String,
    #[serde(default)]
    pub locale_preferred: bool,
}

impl LocalizedText {
    /// English, fully specified text
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            locale: "en".to_string(),
            text_type: FULLY_SPECIFIED.to_string(),
            locale_preferred: false,
        }
    }

    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    pub fn text_type(mut self, text_type: impl Into<String>) -> Self {
        self.text_type = text_type.into();
        self
    }

    pub fn preferred(mut self) -> Self {
        self.locale_preferred = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub created_at: DateTime<Utc>,
}

/// Public profile of a user; its mnemonic appears in `/users/{mnemonic}/` URIs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: UserId,
    pub mnemonic: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    pub mnemonic: String,
}

/// Owner of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "owner_type", rename_all = "snake_case")]
pub enum Owner {
    Organization { mnemonic: String },
    User { mnemonic: String },
}

impl Owner {
    pub fn uri(&self) -> String {
        match self {
            Owner::Organization { mnemonic } => format!("/orgs/{mnemonic}/"),
            Owner::User { mnemonic } => format!("/users/{mnemonic}/"),
        }
    }
}

/// Root record of a source or collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    pub id: ContainerId,
    pub kind: ContainerKind,
    pub mnemonic: String,
    pub name: String,
    pub full_name: String,
    /// `source_type` or `collection_type` (e.g. "Dictionary")
    pub container_type: String,
    pub owner: Owner,
    pub public_access: AccessType,
    pub default_locale: String,
    pub supported_locales: Vec<String>,
    pub website: Option<String>,
    pub description: Option<String>,
    /// Extra concept validation applied on save, e.g. "OpenMRS"
    pub custom_validation_schema: Option<String>,
    pub uri: String,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl Container {
    /// Create an unsaved container; ids and URIs are assigned on persist.
    pub fn new(kind: ContainerKind, mnemonic: impl Into<String>, owner: Owner) -> Self {
        let mnemonic = mnemonic.into();
        let uri = format!("{}{}/{}/", owner.uri(), kind.uri_segment(), mnemonic);
        Self {
            id: ContainerId::generate(),
            kind,
            name: mnemonic.clone(),
            full_name: mnemonic.clone(),
            mnemonic,
            container_type: "Dictionary".to_string(),
            owner,
            public_access: AccessType::View,
            default_locale: "en".to_string(),
            supported_locales: vec!["en".to_string()],
            website: None,
            description: None,
            custom_validation_schema: None,
            uri,
            created_by: None,
            created_at: Utc::now(),
        }
    }
}

/// One version of a source or collection.
///
/// `processing` is an advisory marker telling readers that the search index
/// may lag behind this version right now. It is not a lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerVersion {
    pub id: ContainerVersionId,
    pub kind: ContainerKind,
    pub versioned_object_id: ContainerId,
    pub mnemonic: String,
    pub uri: String,
    pub concepts: Vec<VersionId>,
    pub mappings: Vec<VersionId>,
    /// Declared links to concepts/mappings; only collections carry these
    #[serde(default)]
    pub references: Vec<CollectionReference>,
    #[serde(default)]
    pub processing: bool,
    pub released: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContainerVersion {
    /// Empty HEAD version of a container.
    pub fn head_of(container: &Container) -> Self {
        let now = Utc::now();
        Self {
            id: ContainerVersionId::generate(),
            kind: container.kind,
            versioned_object_id: container.id.clone(),
            mnemonic: HEAD.to_string(),
            uri: format!("{}{}/", container.uri, HEAD),
            concepts: Vec::new(),
            mappings: Vec::new(),
            references: Vec::new(),
            processing: false,
            released: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_head(&self) -> bool {
        self.mnemonic == HEAD
    }

    /// URI of the container this version belongs to.
    pub fn container_uri(&self) -> &str {
        self.uri
            .strip_suffix(&format!("{}/", self.mnemonic))
            .unwrap_or(&self.uri)
    }

    pub fn add_concept(&mut self, version: &VersionId) {
        if !self.concepts.contains(version) {
            self.concepts.push(version.clone());
        }
    }

    pub fn add_mapping(&mut self, version: &VersionId) {
        if !self.mappings.contains(version) {
            self.mappings.push(version.clone());
        }
    }

    /// Swap one concept version for another, keeping list position.
    pub fn replace_concept(&mut self, old: &VersionId, new: &VersionId) {
        match self.concepts.iter().position(|v| v == old) {
            Some(pos) => self.concepts[pos] = new.clone(),
            None => self.add_concept(new),
        }
    }

    /// Swap one mapping version for another, keeping list position.
    pub fn replace_mapping(&mut self, old: &VersionId, new: &VersionId) {
        match self.mappings.iter().position(|v| v == old) {
            Some(pos) => self.mappings[pos] = new.clone(),
            None => self.add_mapping(new),
        }
    }

    /// Drop a concept version from the list; true if it was present.
    pub fn remove_concept(&mut self, version: &VersionId) -> bool {
        let before = self.concepts.len();
        self.concepts.retain(|v| v != version);
        self.concepts.len() != before
    }

    pub fn remove_mapping(&mut self, version: &VersionId) -> bool {
        let before = self.mappings.len();
        self.mappings.retain(|v| v != version);
        self.mappings.len() != before
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Root identity of a concept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Concept {
    pub id: ConceptId,
    pub mnemonic: String,
    pub parent_id: ContainerId,
    pub concept_class: String,
    pub datatype: String,
    pub names: Vec<LocalizedText>,
    pub descriptions: Vec<LocalizedText>,
    pub uri: String,
    /// Mutable pointer, moved every time a new version is saved
    pub latest_version_id: Option<VersionId>,
    pub retired: bool,
    pub created_by: Option<UserId>,
    pub updated_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Concept {
    /// Unsaved concept; parent and URI are filled in on persist.
    pub fn new(mnemonic: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ConceptId::generate(),
            mnemonic: mnemonic.into(),
            parent_id: ContainerId::from(""),
            concept_class: "First".to_string(),
            datatype: "None".to_string(),
            names: Vec::new(),
            descriptions: Vec::new(),
            uri: String::new(),
            latest_version_id: None,
            retired: false,
            created_by: None,
            updated_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn concept_class(mut self, concept_class: impl Into<String>) -> Self {
        self.concept_class = concept_class.into();
        self
    }

    pub fn datatype(mut self, datatype: impl Into<String>) -> Self {
        self.datatype = datatype.into();
        self
    }

    pub fn names(mut self, names: Vec<LocalizedText>) -> Self {
        self.names = names;
        self
    }

    pub fn descriptions(mut self, descriptions: Vec<LocalizedText>) -> Self {
        self.descriptions = descriptions;
        self
    }

    /// First fully specified name, falling back to any name.
    pub fn display_name(&self) -> Option<&str> {
        self.names
            .iter()
            .find(|n| n.text_type == FULLY_SPECIFIED)
            .or_else(|| self.names.first())
            .map(|n| n.name.as_str())
    }
}

/// Immutable snapshot of a concept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptVersion {
    pub id: VersionId,
    pub versioned_object_id: ConceptId,
    pub mnemonic: String,
    pub parent_id: ContainerId,
    pub concept_class: String,
    pub datatype: String,
    pub names: Vec<LocalizedText>,
    pub descriptions: Vec<LocalizedText>,
    pub uri: String,
    pub previous_version_id: Option<VersionId>,
    pub retired: bool,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl ConceptVersion {
    /// Snapshot the current state of a concept.
    pub fn snapshot(concept: &Concept, previous: Option<VersionId>) -> Self {
        let id = VersionId::generate();
        Self {
            uri: format!("{}{}/", concept.uri, id),
            id,
            versioned_object_id: concept.id.clone(),
            mnemonic: concept.mnemonic.clone(),
            parent_id: concept.parent_id.clone(),
            concept_class: concept.concept_class.clone(),
            datatype: concept.datatype.clone(),
            names: concept.names.clone(),
            descriptions: concept.descriptions.clone(),
            previous_version_id: previous,
            retired: concept.retired,
            created_by: concept.updated_by.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Root identity of a mapping between two concepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mapping {
    pub id: MappingId,
    pub parent_id: ContainerId,
    pub map_type: String,
    pub from_concept_id: ConceptId,
    pub to_concept_id: ConceptId,
    pub public_access: AccessType,
    pub uri: String,
    pub latest_version_id: Option<VersionId>,
    pub retired: bool,
    pub created_by: Option<UserId>,
    pub updated_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Mapping {
    pub fn new(
        map_type: impl Into<String>,
        from_concept_id: ConceptId,
        to_concept_id: ConceptId,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: MappingId::generate(),
            parent_id: ContainerId::from(""),
            map_type: map_type.into(),
            from_concept_id,
            to_concept_id,
            public_access: AccessType::View,
            uri: String::new(),
            latest_version_id: None,
            retired: false,
            created_by: None,
            updated_by: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Immutable snapshot of a mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingVersion {
    pub id: VersionId,
    pub versioned_object_id: MappingId,
    pub parent_id: ContainerId,
    pub map_type: String,
    pub from_concept_id: ConceptId,
    pub to_concept_id: ConceptId,
    pub uri: String,
    pub previous_version_id: Option<VersionId>,
    pub retired: bool,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl MappingVersion {
    pub fn snapshot(mapping: &Mapping, previous: Option<VersionId>) -> Self {
        let id = VersionId::generate();
        Self {
            uri: format!("{}{}/", mapping.uri, id),
            id,
            versioned_object_id: mapping.id.clone(),
            parent_id: mapping.parent_id.clone(),
            map_type: mapping.map_type.clone(),
            from_concept_id: mapping.from_concept_id.clone(),
            to_concept_id: mapping.to_concept_id.clone(),
            previous_version_id: previous,
            retired: mapping.retired,
            created_by: mapping.updated_by.clone(),
            created_at: Utc::now(),
        }
    }
}
