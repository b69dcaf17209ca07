use std::path::PathBuf;
use thiserror::Error;

use crate::language::Language;

pub type Result<T> = std::result::Result<T, IndexError>;

/// Errors raised by indexing and storage.
///
/// "Not found" conditions are never errors here; they are modelled as values
/// (`CallGraphNode::Unresolved`, `FunctionTree::Missing`, `UpdateOutcome::NotFound`).
#[derive(Debug, Error)]
pub enum IndexError {
    /// A scanned file has no usable grammar. Indexing aborts: a partial index
    /// under-reports call edges.
    #[error("no tree-sitter parser available for {language} (file {path})")]
    NoParser { language: String, path: PathBuf },

    #[error("tree-sitter failed to parse {path} as {language:?}")]
    Parse { language: Language, path: PathBuf },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("index store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl IndexError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IndexError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for errors that must abort a whole indexing run.
    pub fn is_fatal_config(&self) -> bool {
        matches!(self, IndexError::NoParser { .. })
    }
}
