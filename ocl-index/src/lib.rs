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

//! OCL Index
//!
//! Keeps the search index in step with container versions.
//!
//! ## Components
//!
//! - **Resolver** (`resolver`): identifiers to concrete version ids
//! - **Documents** (`document`): search records built from stored versions
//! - **Search** (`search`): the [`SearchIndex`] backend interface and an in-memory backend
//! - **Reindexer** (`reindexer`): flag-guarded incremental pushes with retry

pub mod document;
pub mod reindexer;
pub mod resolver;
pub mod search;

pub use document::{build_documents, IndexDocument};
pub use reindexer::{IncrementalReindexer, ReindexConfig, ReindexReport};
pub use resolver::{resolve, MissingIdPolicy, Resolution};
pub use search::{IndexError, IndexResult, MemorySearchIndex, SearchIndex};
