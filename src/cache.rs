// Project parse cache
// Skips re-parsing when no scanned file changed path, mtime or size

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::config::IndexerConfig;
use crate::error::{IndexError, Result};
use crate::project::ProjectIndex;
use crate::scanner::Scanner;

/// Persisted parse of a project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRecord {
    pub version: String,
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub data: ProjectIndex,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub files_parsed: usize,
}

pub struct ProjectCache {
    config: IndexerConfig,
    stats: CacheStats,
}

impl ProjectCache {
    pub fn new(config: IndexerConfig) -> Self {
        Self {
            config,
            stats: CacheStats::default(),
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Cache file for an (absolute) project path
    pub fn cache_path(&self, project_path: &Path) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(project_path.to_string_lossy().as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        self.config.cache_dir.join(format!(
            "project_cache_{}_{}.json",
            &digest[..12],
            self.config.cache_version
        ))
    }

    /// Hash of sorted `(path, mtime, size)` for every scanned file.
    /// Only metadata is read, never file contents.
    pub fn fingerprint(&self, project_path: &Path) -> String {
        let scanner = Scanner::new(&self.config.extensions);
        let mut entries: Vec<(String, u128, u64)> = scanner
            .collect_files(project_path)
            .into_iter()
            .filter_map(|path| {
                let meta = std::fs::metadata(&path).ok()?;
                let mtime = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_nanos())
                    .unwrap_or(0);
                Some((path.to_string_lossy().into_owned(), mtime, meta.len()))
            })
            .collect();
        entries.sort();

        let mut hasher = Sha256::new();
        for (path, mtime, size) in &entries {
            hasher.update(format!("{}\t{}\t{}\n", path, mtime, size).as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    /// Index a project, reusing the cached parse when its fingerprint still matches.
    pub fn index(&mut self, project_path: &Path, force_reindex: bool) -> Result<ProjectIndex> {
        let root =
            std::fs::canonicalize(project_path).map_err(|e| IndexError::io(project_path, e))?;
        let cache_path = self.cache_path(&root);
        let fingerprint = self.fingerprint(&root);

        if !force_reindex {
            if let Some(index) = self.load(&cache_path, &fingerprint) {
                self.stats.hits += 1;
                tracing::info!(
                    "loaded from cache: {} functions in {} files",
                    index.function_count(),
                    index.file_count()
                );
                return Ok(index);
            }
        }

        self.stats.misses += 1;
        let mut scanner = Scanner::new(&self.config.extensions);
        let index = scanner.scan_directory(&root)?;
        self.stats.files_parsed += scanner.files_parsed();

        self.save(&cache_path, &fingerprint, &index);
        Ok(index)
    }

    fn load(&self, cache_path: &Path, fingerprint: &str) -> Option<ProjectIndex> {
        if !cache_path.exists() {
            return None;
        }

        let record: CacheRecord = match std::fs::read_to_string(cache_path)
            .map_err(|e| e.to_string())
            .and_then(|json| serde_json::from_str(&json).map_err(|e| e.to_string()))
        {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("cache load failed ({}): {}", cache_path.display(), e);
                return None;
            }
        };

        if record.version != self.config.cache_version {
            tracing::debug!(
                "cache version {} does not match {}",
                record.version,
                self.config.cache_version
            );
            return None;
        }
        if record.fingerprint != fingerprint {
            tracing::info!("cache fingerprint mismatch, re-indexing");
            return None;
        }
        Some(record.data)
    }

    fn save(&self, cache_path: &Path, fingerprint: &str, index: &ProjectIndex) {
        let record = CacheRecord {
            version: self.config.cache_version.clone(),
            fingerprint: fingerprint.to_string(),
            created_at: Utc::now(),
            data: index.clone(),
        };

        let result = (|| -> Result<()> {
            if let Some(parent) = cache_path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| IndexError::io(parent, e))?;
            }
            let json =
                serde_json::to_string(&record).map_err(|e| IndexError::Cache(e.to_string()))?;
            std::fs::write(cache_path, json).map_err(|e| IndexError::io(cache_path, e))
        })();

        match result {
            Ok(()) => tracing::debug!("cache saved to {}", cache_path.display()),
            Err(e) => tracing::warn!("cache save failed: {}", e),
        }
    }
}
