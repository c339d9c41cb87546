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

//! OCL Core
//!
//! Domain model for versioned terminology resources: sources and collections
//! ("containers"), the concepts and mappings they hold, and the references a
//! collection declares to them.
//!
//! - **Identifiers**: closed [`Identifier`] enum over concept/mapping roots and versions
//! - **Records**: containers, concepts, mappings and their immutable versions
//! - **References**: [`CollectionReference`] plus the set-based [`diff`]
//! - **Resilience**: retry policy with deadlines for backend calls

pub mod error;
pub mod ids;
pub mod model;
pub mod reference;
pub mod resilience;

pub use error::{OclError, OclResult};
pub use ids::{
    ConceptId, ContainerId, ContainerKind, ContainerVersionId, Identifier, MappingId,
    OrganizationId, ResourceKind, UserId, VersionId, VersionKind,
};
pub use model::{
    AccessType, Concept, ConceptVersion, Container, ContainerVersion, LocalizedText, Mapping,
    MappingVersion, Organization, Owner, User, UserProfile, FULLY_SPECIFIED, HEAD,
};
pub use reference::{
    diff, normalize_expression, CollectionReference, ExpressionSelector, ReferenceBatchRequest,
    ReferenceDiff, ReferenceError, WILDCARD,
};
pub use resilience::{with_retry, RetryPolicy};
