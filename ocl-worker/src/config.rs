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
use ocl_core::RetryPolicy;
use ocl_index::{MissingIdPolicy, ReindexConfig};
use ocl_storage::ExportConfig;
use ocl_tasks::QueueConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// OCL Worker Configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WorkerConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Root of the record store and index snapshot
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Where export artifacts go (default: `{data_dir}/exports`)
    #[serde(default)]
    pub export_dir: Option<PathBuf>,

    /// Gzip export artifacts
    #[serde(default = "default_compress_exports")]
    pub compress_exports: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexConfig {
    /// Deadline for each search index call
    #[serde(default = "default_index_timeout_ms")]
    pub timeout_ms: u64,

    /// Fail a reindex when an identifier does not resolve
    #[serde(default)]
    pub strict_resolution: bool,

    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./ocl-data")
}

fn default_compress_exports() -> bool {
    true
}

fn default_index_timeout_ms() -> u64 {
    30_000
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            export_dir: None,
            compress_exports: default_compress_exports(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_index_timeout_ms(),
            strict_resolution: false,
            retry: RetryPolicy::default(),
        }
    }
}

impl WorkerConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration: file, then environment overrides.
    ///
    /// Supported environment variables:
    /// - OCL_DATA_DIR: Data directory path (default: ./ocl-data)
    /// - OCL_EXPORT_DIR: Export directory (default: {data_dir}/exports)
    /// - OCL_WORKERS: Worker pool size (default: 4)
    /// - OCL_INDEX_TIMEOUT_MS: Search index call deadline (default: 30000)
    /// - OCL_STRICT_RESOLUTION: Fail on unresolvable identifiers (default: false)
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut config = match config_file {
            Some(path) if path.exists() => {
                tracing::info!("Loading configuration from file: {:?}", path);
                Self::from_file(path)?
            }
            Some(path) => {
                tracing::warn!("Config file not found: {:?}, using defaults", path);
                Self::default()
            }
            None => Self::default(),
        };

        Self::apply_env(&mut config, |key| std::env::var(key).ok());
        Ok(config)
    }

    /// Override fields for every variable `lookup` knows about.
    fn apply_env<F: Fn(&str) -> Option<String>>(config: &mut Self, lookup: F) {
        if let Some(dir) = lookup("OCL_DATA_DIR") {
            config.storage.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("OCL_EXPORT_DIR") {
            config.storage.export_dir = Some(PathBuf::from(dir));
        }
        if let Some(Ok(workers)) = lookup("OCL_WORKERS").map(|v| v.parse::<usize>()) {
            config.queue.workers = workers;
        }
        if let Some(Ok(timeout)) = lookup("OCL_INDEX_TIMEOUT_MS").map(|v| v.parse::<u64>()) {
            config.index.timeout_ms = timeout;
        }
        if let Some(strict) = lookup("OCL_STRICT_RESOLUTION") {
            config.index.strict_resolution = matches!(
                strict.to_ascii_lowercase().as_str(),
                "1" | "true" | "yes"
            );
        }
    }

    pub fn store_dir(&self) -> PathBuf {
        self.storage.data_dir.join("store")
    }

    pub fn index_snapshot(&self) -> PathBuf {
        self.storage.data_dir.join("index.json.gz")
    }

    pub fn export_config(&self) -> ExportConfig {
        ExportConfig {
            export_dir: self
                .storage
                .export_dir
                .clone()
                .unwrap_or_else(|| self.storage.data_dir.join("exports")),
            compress: self.storage.compress_exports,
        }
    }

    pub fn reindex_config(&self) -> ReindexConfig {
        ReindexConfig {
            index_timeout_ms: self.index.timeout_ms,
            retry: self.index.retry.clone(),
            missing_ids: if self.index.strict_resolution {
                MissingIdPolicy::Fail
            } else {
                MissingIdPolicy::Report
            },
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.queue.workers == 0 {
            anyhow::bail!("queue.workers must be at least 1");
        }
        if self.queue.capacity == 0 {
            anyhow::bail!("queue.capacity must be at least 1");
        }
        if self.index.timeout_ms == 0 {
            anyhow::bail!("index.timeout_ms must be greater than 0");
        }
        if self.index.retry.max_attempts == 0 {
            anyhow::bail!("index.retry.max_attempts must be at least 1");
        }

        if !self.storage.data_dir.exists() {
            std::fs::create_dir_all(&self.storage.data_dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.storage.data_dir, PathBuf::from("./ocl-data"));
        assert_eq!(config.queue.workers, 4);
        assert_eq!(config.reindex_config().missing_ids, MissingIdPolicy::Report);
        assert_eq!(
            config.export_config().export_dir,
            PathBuf::from("./ocl-data/exports")
        );
    }

    #[test]
    fn test_partial_toml() {
        let config: WorkerConfig = toml::from_str(
            r#"
            [storage]
            data_dir = "/var/lib/ocl"
            compress_exports = false

            [index]
            strict_resolution = true
            "#,
        )
        .unwrap();

        assert_eq!(config.store_dir(), PathBuf::from("/var/lib/ocl/store"));
        assert!(!config.export_config().compress);
        assert_eq!(config.reindex_config().missing_ids, MissingIdPolicy::Fail);
        assert_eq!(config.index.timeout_ms, 30_000);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("OCL_DATA_DIR", "/tmp/ocl"),
            ("OCL_WORKERS", "8"),
            ("OCL_INDEX_TIMEOUT_MS", "not-a-number"),
            ("OCL_STRICT_RESOLUTION", "TRUE"),
        ]
        .into_iter()
        .collect();

        let mut config = WorkerConfig::default();
        WorkerConfig::apply_env(&mut config, |key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/ocl"));
        assert_eq!(config.queue.workers, 8);
        assert_eq!(config.index.timeout_ms, 30_000);
        assert!(config.index.strict_resolution);
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = WorkerConfig::default();
        config.storage.data_dir = dir.path().join("data");
        assert!(config.validate().is_ok());
        assert!(config.storage.data_dir.exists());

        config.queue.workers = 0;
        assert!(config.validate().is_err());
    }
}
