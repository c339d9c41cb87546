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

//! Job descriptions passed through the task queue.

use ocl_core::{ContainerKind, ContainerVersionId, ReferenceDiff};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One schedulable unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Job {
    /// Write the export artifact of a source version
    ExportSource { version_id: ContainerVersionId },
    /// Write the export artifact of a collection version
    ExportCollection { version_id: ContainerVersionId },
    /// Full resync of a container version's children
    ReindexChildren {
        version_id: ContainerVersionId,
        kind: ContainerKind,
    },
    /// Reindex only what a reference edit touched
    ReindexReferenceChange {
        version_id: ContainerVersionId,
        diff: ReferenceDiff,
    },
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::ExportSource { .. } => "export_source",
            Job::ExportCollection { .. } => "export_collection",
            Job::ReindexChildren { .. } => "reindex_children",
            Job::ReindexReferenceChange { .. } => "reindex_reference_change",
        }
    }

    pub fn version_id(&self) -> &ContainerVersionId {
        match self {
            Job::ExportSource { version_id }
            | Job::ExportCollection { version_id }
            | Job::ReindexChildren { version_id, .. }
            | Job::ReindexReferenceChange { version_id, .. } => version_id,
        }
    }

    /// Admission key for jobs that may run at most once at a time.
    ///
    /// Exports are keyed by resource type and version; reindex jobs are
    /// never coalesced.
    pub fn once_key(&self) -> Option<String> {
        match self {
            Job::ExportSource { version_id } => Some(format!(
                "export_{}:{}",
                ContainerKind::Source.as_str(),
                version_id
            )),
            Job::ExportCollection { version_id } => Some(format!(
                "export_{}:{}",
                ContainerKind::Collection.as_str(),
                version_id
            )),
            Job::ReindexChildren { .. } | Job::ReindexReferenceChange { .. } => None,
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.version_id())
    }
}
