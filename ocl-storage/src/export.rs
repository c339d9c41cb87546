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

//! Export artifacts for source and collection versions.
//!
//! An export is a JSON document (optionally gzipped) holding a container
//! version and every concept and mapping version it lists. The artifact
//! path depends only on the resource type and the version, so exporting the
//! same version twice overwrites the same file.

use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ocl_core::{
    ConceptVersion, Container, ContainerKind, ContainerVersion, MappingVersion, OclError,
};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::store::ResourceStore;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Container not found for version {0}")]
    MissingContainer(String),

    #[error("{version} is a {actual} version, not a {expected}")]
    WrongKind {
        version: String,
        expected: ContainerKind,
        actual: ContainerKind,
    },

    #[error(transparent)]
    Store(#[from] OclError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Export task failed: {0}")]
    Join(String),
}

pub type ExportResult<T> = Result<T, ExportError>;

impl From<ExportError> for OclError {
    fn from(e: ExportError) -> Self {
        match e {
            ExportError::Store(inner) => inner,
            ExportError::Io(io) => OclError::Io(io),
            other => OclError::Storage(other.to_string()),
        }
    }
}

/// How much of the version to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportSerializer {
    /// Version metadata plus every concept and mapping version
    #[default]
    Detail,
    /// Version metadata and counts only
    Summary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    pub export_dir: PathBuf,
    #[serde(default = "default_compress")]
    pub compress: bool,
}

fn default_compress() -> bool {
    true
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            export_dir: PathBuf::from("./exports"),
            compress: default_compress(),
        }
    }
}

/// Document written to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDocument {
    pub resource_type: ContainerKind,
    pub container: Container,
    pub version: ContainerVersion,
    pub concept_count: usize,
    pub mapping_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub concepts: Vec<ConceptVersion>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mappings: Vec<MappingVersion>,
}

/// Writes export artifacts for container versions.
#[async_trait]
pub trait ExportWriter: Send + Sync {
    async fn write_export(
        &self,
        version: &ContainerVersion,
        resource_type: ContainerKind,
        serializer: ExportSerializer,
    ) -> ExportResult<PathBuf>;
}

/// Filesystem export writer.
pub struct FsExportWriter<S: ResourceStore + ?Sized> {
    store: Arc<S>,
    config: ExportConfig,
}

impl<S: ResourceStore + ?Sized> FsExportWriter<S> {
    pub fn new(store: Arc<S>, config: ExportConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// `{export_dir}/{type}/{container}/{version}.{version_id}.json[.gz]`
    pub fn artifact_path(
        &self,
        resource_type: ContainerKind,
        container_mnemonic: &str,
        version: &ContainerVersion,
    ) -> PathBuf {
        let extension = if self.config.compress {
            "json.gz"
        } else {
            "json"
        };
        self.config
            .export_dir
            .join(resource_type.as_str())
            .join(container_mnemonic)
            .join(format!("{}.{}.{}", version.mnemonic, version.id, extension))
    }
}

#[async_trait]
impl<S: ResourceStore + ?Sized + 'static> ExportWriter for FsExportWriter<S> {
    async fn write_export(
        &self,
        version: &ContainerVersion,
        resource_type: ContainerKind,
        serializer: ExportSerializer,
    ) -> ExportResult<PathBuf> {
        if version.kind != resource_type {
            return Err(ExportError::WrongKind {
                version: version.id.to_string(),
                expected: resource_type,
                actual: version.kind,
            });
        }

        let container = self
            .store
            .get_container(&version.versioned_object_id)
            .await?
            .ok_or_else(|| ExportError::MissingContainer(version.id.to_string()))?;

        let (concepts, mappings) = match serializer {
            ExportSerializer::Detail => (
                self.store.concept_versions(&version.concepts).await?,
                self.store.mapping_versions(&version.mappings).await?,
            ),
            ExportSerializer::Summary => (Vec::new(), Vec::new()),
        };

        let path = self.artifact_path(resource_type, &container.mnemonic, version);
        let document = ExportDocument {
            resource_type,
            container,
            version: version.clone(),
            concept_count: version.concepts.len(),
            mapping_count: version.mappings.len(),
            concepts,
            mappings,
        };

        let compress = self.config.compress;
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_document(&target, &document, compress))
            .await
            .map_err(|e| ExportError::Join(e.to_string()))??;

        tracing::info!(
            version = %version.id,
            resource_type = %resource_type,
            path = %path.display(),
            "Wrote export"
        );
        Ok(path)
    }
}

fn write_document(path: &Path, document: &ExportDocument, compress: bool) -> ExportResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("tmp");
    let file = File::create(&temp_path)?;
    let writer = BufWriter::new(file);

    if compress {
        let mut encoder = GzEncoder::new(writer, Compression::default());
        serde_json::to_writer(&mut encoder, document)?;
        encoder.finish()?.flush()?;
    } else {
        let mut writer = writer;
        serde_json::to_writer(&mut writer, document)?;
        writer.flush()?;
    }

    std::fs::rename(&temp_path, path)?;
    Ok(())
}

/// Read an artifact back, decompressing `.gz` files.
pub fn read_artifact(path: &Path) -> ExportResult<ExportDocument> {
    let reader = BufReader::new(File::open(path)?);
    let is_gzip = path.extension().map(|e| e == "gz").unwrap_or(false);
    let mut content = String::new();
    if is_gzip {
        GzDecoder::new(reader).read_to_string(&mut content)?;
    } else {
        let mut reader = reader;
        reader.read_to_string(&mut content)?;
    }
    Ok(serde_json::from_str(&content)?)
}
