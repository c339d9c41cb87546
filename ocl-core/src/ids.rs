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

//! Identifier types
//!
//! Every record is addressed by a string id. Root resources (concepts,
//! mappings, containers) and their immutable versions get distinct newtypes
//! so a root id can never be passed where a version id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::OclError;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Generate a new unique ID
            pub fn generate() -> Self {
                Self(Uuid::new_v4().simple().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Identity of a concept independent of version
    ConceptId
);
string_id!(
    /// Identity of a mapping independent of version
    MappingId
);
string_id!(
    /// Identity of one immutable snapshot of a concept or mapping
    VersionId
);
string_id!(
    /// Identity of a source or collection
    ContainerId
);
string_id!(
    /// Identity of one version of a source or collection
    ContainerVersionId
);
string_id!(UserId);
string_id!(OrganizationId);

/// The two kinds of resource a container can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Concept,
    Mapping,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Concept => "Concept",
            Self::Mapping => "Mapping",
        }
    }

    pub fn version_kind(&self) -> VersionKind {
        match self {
            Self::Concept => VersionKind::ConceptVersion,
            Self::Mapping => VersionKind::MappingVersion,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of versioned record pushed into the search index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionKind {
    ConceptVersion,
    MappingVersion,
}

impl VersionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConceptVersion => "ConceptVersion",
            Self::MappingVersion => "MappingVersion",
        }
    }

    pub fn resource_kind(&self) -> ResourceKind {
        match self {
            Self::ConceptVersion => ResourceKind::Concept,
            Self::MappingVersion => ResourceKind::Mapping,
        }
    }
}

impl fmt::Display for VersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reference to a concept or mapping, either by root identity (resolved to
/// the latest version at resolution time) or by an exact version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Identifier {
    Concept(ConceptId),
    ConceptVersion(VersionId),
    Mapping(MappingId),
    MappingVersion(VersionId),
}

impl Identifier {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Concept(_) | Self::ConceptVersion(_) => ResourceKind::Concept,
            Self::Mapping(_) | Self::MappingVersion(_) => ResourceKind::Mapping,
        }
    }

    /// True when the identifier already names an exact version.
    pub fn is_version(&self) -> bool {
        matches!(self, Self::ConceptVersion(_) | Self::MappingVersion(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Concept(id) => id.as_str(),
            Self::Mapping(id) => id.as_str(),
            Self::ConceptVersion(id) | Self::MappingVersion(id) => id.as_str(),
        }
    }

    /// Name of the record class this identifier points at.
    pub fn record_name(&self) -> &'static str {
        match self {
            Self::Concept(_) => "Concept",
            Self::ConceptVersion(_) => "ConceptVersion",
            Self::Mapping(_) => "Mapping",
            Self::MappingVersion(_) => "MappingVersion",
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.record_name(), self.as_str())
    }
}

/// Source or collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    Source,
    Collection,
}

impl ContainerKind {
    /// Resource type tag used for exports and task names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Collection => "collection",
        }
    }

    /// Path segment used in resource URIs.
    pub fn uri_segment(&self) -> &'static str {
        match self {
            Self::Source => "sources",
            Self::Collection => "collections",
        }
    }

    /// Infer the container kind from a URI such as
    /// `/orgs/OCL/sources/Classes/` (the fourth path segment).
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri.split('/').nth(3)? {
            "sources" => Some(Self::Source),
            "collections" => Some(Self::Collection),
            _ => None,
        }
    }
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerKind {
    type Err = OclError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "source" | "sources" => Ok(Self::Source),
            "collection" | "collections" => Ok(Self::Collection),
            other => Err(OclError::invalid_argument(format!(
                "unknown container kind: {other}"
            ))),
        }
    }
}
