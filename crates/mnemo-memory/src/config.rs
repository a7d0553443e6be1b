//! Store configuration.
//!
//! ```toml
//! database = "memory.db"
//! dimensions = 1536
//! null_owner_universal = true
//! busy_timeout_ms = 5000
//!
//! [dedup]
//! semantic_threshold = 0.95
//!
//! [search]
//! threshold = 0.1
//! default_limit = 10
//!
//! [list]
//! default_limit = 50
//!
//! [index]
//! backend = "exact"   # or "sqlite-vec"
//! oversample = 4
//!
//! [analytics]
//! enabled = false
//! path = "analytics/"
//! retention_days = 90
//!
//! [events]
//! category_key = "category"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};
use crate::events::DEFAULT_CATEGORY_KEY;
use crate::validation::validate_threshold;
use crate::vector::DEFAULT_EMBEDDING_DIMS;

/// Top-level store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// SQLite database file. In-memory when absent.
    pub database: Option<PathBuf>,
    /// Embedding dimensionality accepted by the store.
    pub dimensions: usize,
    /// Whether an owner-scoped query also sees global (owner-less) records.
    pub null_owner_universal: bool,
    /// How long a writer waits for another process's write lock.
    pub busy_timeout_ms: u64,
    pub dedup: DedupConfig,
    pub search: SearchConfig,
    pub list: ListConfig,
    pub index: IndexConfig,
    pub analytics: AnalyticsConfig,
    pub events: EventsConfig,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            database: None,
            dimensions: DEFAULT_EMBEDDING_DIMS,
            null_owner_universal: true,
            busy_timeout_ms: 5000,
            dedup: DedupConfig::default(),
            search: SearchConfig::default(),
            list: ListConfig::default(),
            index: IndexConfig::default(),
            analytics: AnalyticsConfig::default(),
            events: EventsConfig::default(),
        }
    }
}

/// Ingest deduplication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Minimum cosine similarity for a write to overwrite an existing record.
    pub semantic_threshold: f32,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            semantic_threshold: 0.95,
        }
    }
}

/// Similarity search defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub threshold: f32,
    pub default_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            threshold: 0.1,
            default_limit: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListConfig {
    pub default_limit: usize,
}

impl Default for ListConfig {
    fn default() -> Self {
        Self { default_limit: 50 }
    }
}

/// Vector index backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndexBackend {
    /// In-process cosine scan over the record table.
    #[default]
    Exact,
    /// sqlite-vec `vec0` table with post-filtering.
    SqliteVec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub backend: IndexBackend,
    /// KNN window multiplier for the sqlite-vec backend.
    pub oversample: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::Exact,
            oversample: 4,
        }
    }
}

/// Search analytics sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Write JSONL search analytics under `path`.
    pub enabled: bool,
    pub path: Option<PathBuf>,
    /// Days to retain analytics files.
    pub retention_days: u32,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: None,
            retention_days: 90,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Metadata key whose value is counted by the category counter.
    pub category_key: String,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            category_key: DEFAULT_CATEGORY_KEY.to_string(),
        }
    }
}

impl MemoryConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(toml_str).map_err(|e| MemoryError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    ///
    /// Relative `database` and analytics paths are resolved against the
    /// file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            MemoryError::Config(format!("failed to read config file '{}': {e}", path.display()))
        })?;
        let mut config = Self::from_toml_str(&contents)?;

        if let Some(base) = path.parent() {
            config.database = config.database.map(|p| resolve(base, p));
            config.analytics.path = config.analytics.path.map(|p| resolve(base, p));
        }
        Ok(config)
    }

    /// Serialize to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| MemoryError::Config(e.to_string()))
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.dimensions == 0 {
            return Err(MemoryError::Config("dimensions must be positive".into()));
        }
        validate_threshold(self.dedup.semantic_threshold)
            .map_err(|e| MemoryError::Config(format!("dedup.semantic_threshold: {e}")))?;
        validate_threshold(self.search.threshold)
            .map_err(|e| MemoryError::Config(format!("search.threshold: {e}")))?;
        if self.search.default_limit == 0 || self.list.default_limit == 0 {
            return Err(MemoryError::Config("default limits must be positive".into()));
        }
        if self.index.oversample == 0 {
            return Err(MemoryError::Config("index.oversample must be positive".into()));
        }
        if self.analytics.enabled && self.analytics.path.is_none() {
            return Err(MemoryError::Config(
                "analytics.path is required when analytics are enabled".into(),
            ));
        }
        if self.events.category_key.is_empty() {
            return Err(MemoryError::Config("events.category_key is empty".into()));
        }
        Ok(())
    }

    /// Builder: set the dimensionality.
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self
    }

    /// Builder: set the database file.
    pub fn with_database(mut self, path: impl Into<PathBuf>) -> Self {
        self.database = Some(path.into());
        self
    }

    /// Builder: select the index backend.
    pub fn with_index_backend(mut self, backend: IndexBackend) -> Self {
        self.index.backend = backend;
        self
    }
}

fn resolve(base: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}
