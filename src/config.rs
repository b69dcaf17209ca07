use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{IndexError, Result};
use crate::language::Language;

pub const CACHE_DIR_ENV: &str = "CALLGRAPH_INDEX_CACHE_DIR";

/// Bump when the cache layout changes; records with another tag are ignored.
pub const CACHE_VERSION: &str = "v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub cache_dir: PathBuf,
    pub cache_version: String,
    /// File extensions scanned and fingerprinted (without the dot).
    pub extensions: Vec<String>,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Callee tree depth attached to `next` targets.
    pub next_context_depth: usize,
    /// Callee tree depth for standalone `context` queries.
    pub context_depth: usize,
    /// Callees kept per level of a context tree.
    pub context_fanout: usize,
    pub default_batch: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            cache_version: CACHE_VERSION.to_string(),
            extensions: Language::all_extensions(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            next_context_depth: 5,
            context_depth: 3,
            context_fanout: 5,
            default_batch: 50,
        }
    }
}

fn default_cache_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(CACHE_DIR_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::cache_dir()
        .map(|d| d.join("callgraph-index"))
        .unwrap_or_else(|| PathBuf::from(".callgraph-index").join("cache"))
}

impl IndexerConfig {
    /// Load from a JSON file; missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| IndexError::io(path, e))?;
        let config: Self = serde_json::from_str(&json)
            .map_err(|e| IndexError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.extensions.is_empty() {
            return Err(IndexError::Config("no file extensions configured".into()));
        }
        if self.cache_version.is_empty() {
            return Err(IndexError::Config("cache_version must not be empty".into()));
        }
        if self.scheduler.context_fanout == 0 {
            return Err(IndexError::Config("context_fanout must be at least 1".into()));
        }
        if self.scheduler.default_batch == 0 {
            return Err(IndexError::Config("default_batch must be at least 1".into()));
        }
        Ok(())
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }
}
