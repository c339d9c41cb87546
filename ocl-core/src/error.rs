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

//! Error taxonomy shared by every OCL crate

use thiserror::Error;

/// Result type for OCL operations
pub type OclResult<T> = Result<T, OclError>;

/// Errors that can occur while resolving, indexing or exporting resources
#[derive(Debug, Error)]
pub enum OclError {
    /// A referenced identifier does not resolve to any record
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// One or more fields were rejected by the persistence layer
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Backend temporarily unavailable (index down, lock timeout, ...)
    #[error("Transient backend error: {0}")]
    Transient(String),

    /// Backend call exceeded its deadline
    #[error("Operation timed out after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Caller passed something the operation cannot work with
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OclError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        OclError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        OclError::InvalidArgument(msg.into())
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, OclError::Transient(_) | OclError::Timeout { .. })
    }
}

impl From<serde_json::Error> for OclError {
    fn from(e: serde_json::Error) -> Self {
        OclError::Serialization(e.to_string())
    }
}
