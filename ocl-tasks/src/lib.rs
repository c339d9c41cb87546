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

//! OCL Tasks
//!
//! Background work for terminology containers: exports, full reindexes and
//! delta reindexes after a collection's references change.
//!
//! ```text
//! apply_reference_batch ─► diff ─► Job::ReindexReferenceChange ─► TaskQueue
//!                                                                    │
//!                                     WorkerPool ◄───────────────────┘
//!                                         │
//!                                     TaskRunner ─► IncrementalReindexer / ExportWriter
//! ```

pub mod job;
pub mod queue;
pub mod runner;
pub mod worker;

pub use job::Job;
pub use queue::{JobSink, QueueConfig, QueueError, QueueResult, QueuedJob, TaskQueue};
pub use runner::{BatchOutcome, DeleteOutcome, JobOutcome, TaskRunner};
pub use worker::{JobHandler, WorkerPool, WorkerStats};
