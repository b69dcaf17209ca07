use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{IndexError, Result};
use crate::parser::SourceParser;
use crate::project::ProjectIndex;

/// Walks a project and parses every file whose extension is in the scan set.
pub struct Scanner {
    parser: SourceParser,
    extensions: Vec<String>,
    files_parsed: usize,
}

impl Scanner {
    pub fn new(extensions: &[String]) -> Self {
        Self {
            parser: SourceParser::new(),
            extensions: extensions.iter().map(|e| e.to_ascii_lowercase()).collect(),
            files_parsed: 0,
        }
    }

    /// Files parsed by this scanner so far.
    pub fn files_parsed(&self) -> usize {
        self.files_parsed
    }

    /// Collect scanned files in a stable, sorted walk order.
    pub fn collect_files(&self, dir: &Path) -> Vec<PathBuf> {
        WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| self.is_scanned(e.path()))
            .map(|e| e.path().to_path_buf())
            .collect()
    }

    fn is_scanned(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|s| s.to_str())
            .map(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }

    /// Parse the whole project.
    ///
    /// Unreadable files are skipped with a warning. A file without a grammar is
    /// a configuration error and aborts the scan.
    pub fn scan_directory(&mut self, dir: &Path) -> Result<ProjectIndex> {
        let files = self.collect_files(dir);
        self.scan_files(dir, files)
    }

    /// Parse an already collected file list, in order.
    pub(crate) fn scan_files(&mut self, dir: &Path, files: Vec<PathBuf>) -> Result<ProjectIndex> {
        let mut index = ProjectIndex::new(dir.to_path_buf());

        tracing::info!("indexing {} source files under {}", files.len(), dir.display());

        for path in files {
            let source = match std::fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!("could not read file {}: {}", path.display(), e);
                    continue;
                }
            };

            let file = self.parser.parse_source(&path, &source).map_err(|e| {
                if let IndexError::NoParser { .. } = e {
                    tracing::error!("aborting indexing run: {}", e);
                }
                e
            })?;
            tracing::debug!(
                "parsed {} ({} functions)",
                path.display(),
                file.functions.len()
            );
            self.files_parsed += 1;
            index.files.push(file);
        }

        tracing::info!(
            "indexed {} files, {} functions",
            index.file_count(),
            index.function_count()
        );
        Ok(index)
    }
}
