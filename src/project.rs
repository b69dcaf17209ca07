use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::language::Language;

/// Byte and line extent of a definition. Lines are 1-based and inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start_byte: usize,
    pub end_byte: usize,
    pub start_line: usize,
    pub end_line: usize,
}

impl Span {
    pub fn from_node(node: &tree_sitter::Node) -> Self {
        Self {
            start_byte: node.start_byte(),
            end_byte: node.end_byte(),
            start_line: node.start_position().row + 1,
            end_line: node.end_position().row + 1,
        }
    }
}

/// Everything extracted from one source file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIndex {
    pub path: PathBuf,
    pub language: Option<Language>,
    /// function name -> definition span
    pub functions: BTreeMap<String, Span>,
    /// callee name -> names of functions calling it
    pub callers: BTreeMap<String, BTreeSet<String>>,
    /// caller name -> names it calls
    pub callees: BTreeMap<String, BTreeSet<String>>,
}

impl FileIndex {
    pub fn new(path: PathBuf, language: Language) -> Self {
        Self {
            path,
            language: Some(language),
            ..Default::default()
        }
    }

    pub fn record_call(&mut self, caller: &str, callee: &str) {
        self.callers
            .entry(callee.to_string())
            .or_default()
            .insert(caller.to_string());
        self.callees
            .entry(caller.to_string())
            .or_default()
            .insert(callee.to_string());
    }
}

/// Parsed view of a whole project.
///
/// Produced by [`crate::cache::ProjectCache::index`] and passed explicitly to the
/// call graph builder and the scheduler. `files` keeps indexing order, which is
/// the tie-breaker when a function name is defined in several files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectIndex {
    pub root: PathBuf,
    pub files: Vec<FileIndex>,
}

impl ProjectIndex {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            files: Vec::new(),
        }
    }

    pub fn file(&self, path: &Path) -> Option<&FileIndex> {
        self.files.iter().find(|f| f.path == path)
    }

    /// Resolve a function name: the hinted file wins if it defines the name,
    /// otherwise the first file in indexing order that does.
    pub fn resolve(&self, name: &str, file_hint: Option<&Path>) -> Option<(&FileIndex, &Span)> {
        if let Some(hint) = file_hint {
            if let Some(file) = self.file(hint) {
                if let Some(span) = file.functions.get(name) {
                    return Some((file, span));
                }
            }
        }

        self.files
            .iter()
            .find_map(|file| file.functions.get(name).map(|span| (file, span)))
    }

    /// Callee names statically extracted for `name` in `file`.
    pub fn callees_of(&self, file: &Path, name: &str) -> Option<&BTreeSet<String>> {
        self.file(file)?.callees.get(name)
    }

    /// Read the function's source text fresh from disk.
    ///
    /// With a hint only that file is consulted, mirroring how stored functions
    /// are addressed by `(name, file)`.
    pub fn function_source(&self, name: &str, file_hint: Option<&Path>) -> Option<String> {
        let (file, span) = match file_hint {
            Some(hint) => {
                let file = self.file(hint)?;
                (file, file.functions.get(name)?)
            }
            None => self.resolve(name, None)?,
        };

        let bytes = match std::fs::read(&file.path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("could not read {}: {}", file.path.display(), e);
                return None;
            }
        };
        let end = span.end_byte.min(bytes.len());
        let start = span.start_byte.min(end);
        Some(String::from_utf8_lossy(&bytes[start..end]).into_owned())
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn function_count(&self) -> usize {
        self.files.iter().map(|f| f.functions.len()).sum()
    }

    /// Every definition in indexing order, by name within a file.
    pub fn definitions(&self) -> impl Iterator<Item = (&FileIndex, &str, &Span)> {
        self.files.iter().flat_map(|f| {
            f.functions
                .iter()
                .map(move |(name, span)| (f, name.as_str(), span))
        })
    }
}
