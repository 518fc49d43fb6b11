//! Configuration loading.
//!
//! Database systems come from `*-config.yml` files and metric definitions
//! from `*-metrics.yml` files. The database type is taken from the file name
//! prefix (`mysql-config.yml`, `pg-metrics.yml`, ...).

mod credentials;
mod metrics;
mod systems;
mod validate;

pub use credentials::*;
pub use validate::*;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::model::{DatabaseType, MetricDefinition, SystemCatalog};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration path not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", .path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("no database systems found in {}", .0.display())]
    NoSystems(PathBuf),
    #[error("no metric definitions found in {}", .0.display())]
    NoMetrics(PathBuf),
    #[error("invalid configuration:\n  {}", .0.join("\n  "))]
    Invalid(Vec<String>),
}

/// Loads systems and metrics from YAML files.
#[derive(Clone)]
pub struct ConfigLoader {
    decoder: Arc<dyn CredentialDecoder>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new(Arc::new(PlainDecoder))
    }
}

impl ConfigLoader {
    pub fn new(decoder: Arc<dyn CredentialDecoder>) -> Self {
        Self { decoder }
    }

    /// Load every `*-config.yml` under `path` (or `path` itself if a file).
    pub fn load_database_systems(&self, path: &Path) -> Result<SystemCatalog, ConfigError> {
        let mut catalog = SystemCatalog::new();
        let mut problems = Vec::new();

        for (file, db_type) in discover(path, "config")? {
            let content = read(&file)?;
            let parsed = systems::parse(&file, &content, db_type, self.decoder.as_ref())?;
            tracing::info!(
                "Loaded {} {} systems from {}",
                parsed.items.len(),
                db_type,
                file.display()
            );
            problems.extend(parsed.problems);

            for system in parsed.items {
                if catalog.contains_key(&system.name) {
                    problems.push(format!(
                        "{}: system '{}' is defined more than once",
                        file.display(),
                        system.name
                    ));
                    continue;
                }
                catalog.insert(system.name.clone(), Arc::new(system));
            }
        }

        if !problems.is_empty() {
            return Err(ConfigError::Invalid(problems));
        }
        if catalog.is_empty() {
            return Err(ConfigError::NoSystems(path.to_path_buf()));
        }
        Ok(catalog)
    }

    /// Load every `*-metrics.yml` under `path` (or `path` itself if a file).
    pub fn load_metric_definitions(
        &self,
        path: &Path,
    ) -> Result<Vec<Arc<MetricDefinition>>, ConfigError> {
        let mut definitions = Vec::new();
        let mut problems = Vec::new();

        for (file, db_type) in discover(path, "metrics")? {
            let content = read(&file)?;
            let parsed = metrics::parse(&file, &content, db_type)?;
            tracing::info!(
                "Loaded {} {} metrics from {}",
                parsed.items.len(),
                db_type,
                file.display()
            );
            problems.extend(parsed.problems);
            definitions.extend(parsed.items.into_iter().map(Arc::new));
        }

        if !problems.is_empty() {
            return Err(ConfigError::Invalid(problems));
        }
        if definitions.is_empty() {
            return Err(ConfigError::NoMetrics(path.to_path_buf()));
        }
        Ok(definitions)
    }
}

/// YAML files named `<type>-<kind>.yml` under `path`, sorted by name.
fn discover(path: &Path, kind: &str) -> Result<Vec<(PathBuf, DatabaseType)>, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let candidates: Vec<PathBuf> = if path.is_file() {
        vec![path.to_path_buf()]
    } else {
        let entries = fs::read_dir(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        files.sort();
        files
    };

    let mut found = Vec::new();
    for file in candidates {
        let Some(name) = file.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let lower = name.to_ascii_lowercase();
        let Some(stem) = lower.strip_suffix(".yml").or_else(|| lower.strip_suffix(".yaml")) else {
            continue;
        };
        if !stem.ends_with(&format!("-{}", kind)) {
            continue;
        }

        match DatabaseType::from_file_name(stem) {
            Some(db_type) => found.push((file, db_type)),
            None => tracing::warn!("Cannot infer database type from {}, skipping", file.display()),
        }
    }
    Ok(found)
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Entries parsed from one file plus the problems found in it.
pub(crate) struct Parsed<T> {
    pub items: Vec<T>,
    pub problems: Vec<String>,
}
