use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tree_sitter::Language as TsLanguage;

/// Source languages with a bundled tree-sitter grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    C,
    Cpp,
    Python,
    Rust,
    TypeScript,
}

impl Language {
    pub fn all() -> &'static [Language] {
        &[
            Language::C,
            Language::Cpp,
            Language::Python,
            Language::Rust,
            Language::TypeScript,
        ]
    }

    /// Detect language from a file path's extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        Self::from_extension(ext)
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "c" | "h" => Some(Language::C),
            "cpp" | "hpp" | "cc" | "cxx" => Some(Language::Cpp),
            "py" => Some(Language::Python),
            "rs" => Some(Language::Rust),
            "ts" | "tsx" => Some(Language::TypeScript),
            _ => None,
        }
    }

    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Language::C => &["c", "h"],
            Language::Cpp => &["cpp", "hpp", "cc", "cxx"],
            Language::Python => &["py"],
            Language::Rust => &["rs"],
            Language::TypeScript => &["ts", "tsx"],
        }
    }

    /// Every extension that has a grammar, in a stable order.
    pub fn all_extensions() -> Vec<String> {
        Self::all()
            .iter()
            .flat_map(|lang| lang.extensions().iter().map(|e| e.to_string()))
            .collect()
    }

    /// Grammar for a given extension. TypeScript has separate `.ts` and `.tsx` grammars.
    pub fn tree_sitter_language(&self, ext: &str) -> TsLanguage {
        match self {
            Language::C => tree_sitter_c::LANGUAGE.into(),
            Language::Cpp => tree_sitter_cpp::LANGUAGE.into(),
            Language::Python => tree_sitter_python::LANGUAGE.into(),
            Language::Rust => tree_sitter_rust::LANGUAGE.into(),
            Language::TypeScript => {
                if ext.eq_ignore_ascii_case("tsx") {
                    tree_sitter_typescript::LANGUAGE_TSX.into()
                } else {
                    tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
                }
            }
        }
    }

    /// Node kinds that define a function body.
    pub fn function_kinds(&self) -> &'static [&'static str] {
        match self {
            Language::C | Language::Cpp => &["function_definition"],
            Language::Python => &["function_definition"],
            Language::Rust => &["function_item"],
            Language::TypeScript => &["function_declaration", "method_definition"],
        }
    }

    /// Node kind of a call site.
    pub fn call_kind(&self) -> &'static str {
        match self {
            Language::Python => "call",
            _ => "call_expression",
        }
    }

    pub fn has_preprocessor(&self) -> bool {
        matches!(self, Language::C | Language::Cpp)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Python => "python",
            Language::Rust => "rust",
            Language::TypeScript => "typescript",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_detects_language_from_extension() {
        assert_eq!(Language::from_path(&PathBuf::from("a/b.c")), Some(Language::C));
        assert_eq!(Language::from_path(&PathBuf::from("x.H")), Some(Language::C));
        assert_eq!(Language::from_path(&PathBuf::from("x.cxx")), Some(Language::Cpp));
        assert_eq!(Language::from_path(&PathBuf::from("x.tsx")), Some(Language::TypeScript));
        assert_eq!(Language::from_path(&PathBuf::from("x.w")), None);
        assert_eq!(Language::from_path(&PathBuf::from("Makefile")), None);
    }

    #[test]
    fn test_every_extension_maps_back() {
        for ext in Language::all_extensions() {
            assert!(Language::from_extension(&ext).is_some(), "{}", ext);
        }
    }
}
