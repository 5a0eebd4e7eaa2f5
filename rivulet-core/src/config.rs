//! Application configuration and startup-time reference data.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::StartupError;
use crate::reactive::RuntimeConfig;
use crate::table::Table;

/// Process-wide settings, usually read from a JSON file at startup.
///
/// ```json
/// {
///   "runtime": { "change_detection": true, "max_flush_rounds": 64 },
///   "max_sessions": 200,
///   "stimulus_queue_capacity": 32,
///   "datasets": { "gapminder": "data/gapminder.json" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Applied to the runtime of every session.
    pub runtime: RuntimeConfig,
    /// Upper bound on concurrently open sessions. `None` means unbounded.
    pub max_sessions: Option<usize>,
    /// Stimuli a session worker buffers before senders wait.
    pub stimulus_queue_capacity: usize,
    /// Reference datasets by name. Relative paths are resolved against the
    /// directory of the configuration file.
    pub datasets: IndexMap<String, PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeConfig::default(),
            max_sessions: None,
            stimulus_queue_capacity: 64,
            datasets: IndexMap::new(),
        }
    }
}

impl AppConfig {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, StartupError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| StartupError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_json_str(&text).map_err(|source| StartupError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(base) = path.parent() {
            for dataset in config.datasets.values_mut() {
                if dataset.is_relative() {
                    *dataset = base.join(&*dataset);
                }
            }
        }
        Ok(config)
    }
}

/// Immutable datasets shared by every session.
#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    tables: IndexMap<String, Arc<Table>>,
}

impl ReferenceData {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load every dataset named in `config`. Any failure is fatal.
    pub fn load(config: &AppConfig) -> Result<Self, StartupError> {
        let mut tables = IndexMap::with_capacity(config.datasets.len());
        for (name, path) in &config.datasets {
            let text = std::fs::read_to_string(path).map_err(|source| StartupError::Io {
                path: path.clone(),
                source,
            })?;
            let table = Table::from_json(&text).map_err(|source| StartupError::Parse {
                path: path.clone(),
                source,
            })?;
            if table.columns().is_empty() {
                return Err(StartupError::InvalidDataset {
                    name: name.clone(),
                    reason: "no records".to_string(),
                });
            }
            tracing::info!(dataset = %name, rows = table.len(), "loaded reference data");
            tables.insert(name.clone(), Arc::new(table));
        }
        Ok(Self { tables })
    }

    pub fn with_table(mut self, name: impl Into<String>, table: Table) -> Self {
        self.tables.insert(name.into(), Arc::new(table));
        self
    }

    pub fn table(&self, name: &str) -> Option<Arc<Table>> {
        self.tables.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}
