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

//! OCL Storage
//!
//! Record persistence for sources, collections, concepts and mappings:
//!
//! - [`store`]: the [`ResourceStore`] interface and the in-memory/JSON-file [`MemoryStore`]
//! - [`lifecycle`]: creating records, cutting new versions and deleting
//! - [`references`]: wildcard expansion and collection reference updates
//! - [`export`]: export artifacts for container versions

pub mod export;
pub mod lifecycle;
pub mod references;
pub mod store;

#[cfg(any(test, feature = "test-fixtures"))]
pub mod fixtures;

pub use export::{
    read_artifact, ExportConfig, ExportDocument, ExportError, ExportResult, ExportSerializer,
    ExportWriter, FsExportWriter,
};
pub use lifecycle::{
    delete_concept, delete_mapping, persist_concept_version, persist_mapping_version,
    persist_new_concept, persist_new_container, persist_new_mapping, persist_new_organization,
    persist_new_user, OPENMRS_SCHEMA,
};
pub use references::{
    add_references, expand_expressions, remove_references, replace_references, ReferenceUpdate,
    DUPLICATE_RESOURCE, INVALID_EXPRESSION,
};
pub use store::{require_container_version, MemoryStore, ResourceStore, StoreStats, UriTarget};
