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

use anyhow::Result;
use clap::{Parser, Subcommand};
use ocl_core::{
    ConceptId, ContainerKind, ContainerVersionId, ExpressionSelector, MappingId,
    ReferenceBatchRequest,
};
use ocl_tasks::Job;
use ocl_worker::{config::WorkerConfig, init_tracing, Worker};
use std::path::PathBuf;
use tokio::io::BufReader;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory path (overrides config file)
    #[arg(long, env = "OCL_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Worker pool size (overrides config file)
    #[arg(long, env = "OCL_WORKERS")]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write the export artifact of a source version
    ExportSource { version_id: String },

    /// Write the export artifact of a collection version
    ExportCollection { version_id: String },

    /// Reindex every concept and mapping of a container version
    Reindex {
        version_id: String,

        #[arg(long, value_parser = parse_kind)]
        kind: ContainerKind,
    },

    /// Add references to a collection version and reindex the delta
    AddReferences {
        version_id: String,

        /// Concept or mapping URI; repeatable
        #[arg(long = "expression")]
        expressions: Vec<String>,

        /// `*` for every concept of --uri, or a comma separated list
        #[arg(long)]
        concepts: Option<String>,

        /// `*` for every mapping of --uri, or a comma separated list
        #[arg(long)]
        mappings: Option<String>,

        /// Source or collection to expand wildcards against
        #[arg(long)]
        uri: Option<String>,
    },

    /// Delete a concept with all its versions and drop it from the index
    DeleteConcept { concept_id: String },

    /// Delete a mapping with all its versions and drop it from the index
    DeleteMapping { mapping_id: String },

    /// Print processing state and counts of a container version
    Status { version_id: String },

    /// Read JSON-lines jobs from stdin and run them on the worker pool
    Run,
}

fn parse_kind(value: &str) -> Result<ContainerKind, String> {
    value.parse().map_err(|e: ocl_core::OclError| e.to_string())
}

fn selector(value: Option<String>) -> ExpressionSelector {
    match value.as_deref().map(str::trim) {
        None | Some("") => ExpressionSelector::Empty,
        Some("*") | Some("all") => ExpressionSelector::All,
        Some(list) => ExpressionSelector::List(
            list.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        ),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    // Load configuration
    let mut config = WorkerConfig::load(args.config.as_deref())?;

    // Apply CLI overrides
    if let Some(data_dir) = args.data_dir {
        config.storage.data_dir = data_dir;
    }
    if let Some(workers) = args.workers {
        config.queue.workers = workers;
    }

    let mut worker = Worker::bootstrap(config).await?;

    match args.command {
        Command::ExportSource { version_id } => {
            let outcome = worker
                .execute(&Job::ExportSource {
                    version_id: ContainerVersionId::from(version_id),
                })
                .await?;
            println!("{outcome}");
        }
        Command::ExportCollection { version_id } => {
            let outcome = worker
                .execute(&Job::ExportCollection {
                    version_id: ContainerVersionId::from(version_id),
                })
                .await?;
            println!("{outcome}");
        }
        Command::Reindex { version_id, kind } => {
            let outcome = worker
                .execute(&Job::ReindexChildren {
                    version_id: ContainerVersionId::from(version_id),
                    kind,
                })
                .await?;
            println!("{outcome}");
        }
        Command::AddReferences {
            version_id,
            expressions,
            concepts,
            mappings,
            uri,
        } => {
            let request = ReferenceBatchRequest {
                expressions,
                concepts: selector(concepts),
                mappings: selector(mappings),
                uri,
            };
            let outcome = worker
                .add_references(&request, &ContainerVersionId::from(version_id))
                .await?;

            println!(
                "added {}, removed {}",
                outcome.diff.added.len(),
                outcome.diff.removed.len()
            );
            for error in &outcome.errors {
                eprintln!("{}: {}", error.expression, error.message);
            }
        }
        Command::DeleteConcept { concept_id } => {
            let outcome = worker.delete_concept(&ConceptId::from(concept_id)).await?;
            println!(
                "deleted {} versions, removed {} documents",
                outcome.versions.len(),
                outcome.documents_removed
            );
        }
        Command::DeleteMapping { mapping_id } => {
            let outcome = worker.delete_mapping(&MappingId::from(mapping_id)).await?;
            println!(
                "deleted {} versions, removed {} documents",
                outcome.versions.len(),
                outcome.documents_removed
            );
        }
        Command::Status { version_id } => {
            let status = worker.status(&ContainerVersionId::from(version_id)).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Run => {
            let stats = worker.run_jobs(BufReader::new(tokio::io::stdin())).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}
