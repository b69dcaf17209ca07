use std::collections::{HashMap, VecDeque};
use std::path::Path;
use tree_sitter::{Node, Parser};

use crate::error::{IndexError, Result};
use crate::language::Language;
use crate::project::{FileIndex, Span};

/// SAL annotation fragments. Identifiers starting with `_` and containing one
/// of these are annotation macros, not function names.
const SAL_MARKERS: &[&str] = &[
    "_Ret_", "_Post_", "_Pre_", "_In_", "_Out_", "_Check_", "_Frees_",
];

/// Type macros that show up as the declarator identifier when a return type is
/// itself a macro.
const TYPE_MACROS: &[&str] = &[
    "PVOID", "VOID", "BOOL", "INT", "UINT", "DWORD", "LONG", "ULONG",
];

/// Control-flow keywords that malformed macro-heavy code can surface as a
/// "function" name.
const CONTROL_KEYWORDS: &[&str] = &[
    "if", "else", "for", "while", "do", "switch", "case", "return", "sizeof",
    "goto", "break", "continue", "defined", "elif", "with", "try", "catch",
    "match", "loop",
];

pub fn is_rejected_name(name: &str) -> bool {
    if name.is_empty() {
        return true;
    }
    if name.starts_with('_') && SAL_MARKERS.iter().any(|m| name.contains(m)) {
        return true;
    }
    TYPE_MACROS.contains(&name) || CONTROL_KEYWORDS.contains(&name)
}

/// Grammar-specific parsers, created lazily on first use.
pub struct SourceParser {
    parsers: HashMap<(Language, bool), Parser>,
}

impl SourceParser {
    pub fn new() -> Self {
        Self {
            parsers: HashMap::new(),
        }
    }

    fn parser_for(&mut self, language: Language, ext: &str, path: &Path) -> Result<&mut Parser> {
        let key = (language, ext.eq_ignore_ascii_case("tsx"));
        if !self.parsers.contains_key(&key) {
            let mut parser = Parser::new();
            parser
                .set_language(&language.tree_sitter_language(ext))
                .map_err(|e| {
                    tracing::error!("grammar for {} rejected: {}", language, e);
                    IndexError::NoParser {
                        language: language.to_string(),
                        path: path.to_path_buf(),
                    }
                })?;
            self.parsers.insert(key, parser);
        }
        self.parsers.get_mut(&key).ok_or_else(|| IndexError::NoParser {
            language: language.to_string(),
            path: path.to_path_buf(),
        })
    }

    /// Parse one file's bytes and extract definitions and call associations.
    pub fn parse_source(&mut self, path: &Path, source: &[u8]) -> Result<FileIndex> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        let language = Language::from_extension(ext).ok_or_else(|| IndexError::NoParser {
            language: if ext.is_empty() {
                "<none>".to_string()
            } else {
                ext.to_string()
            },
            path: path.to_path_buf(),
        })?;

        let tree = self
            .parser_for(language, ext, path)?
            .parse(source, None)
            .ok_or_else(|| IndexError::Parse {
                language,
                path: path.to_path_buf(),
            })?;

        let mut file = FileIndex::new(path.to_path_buf(), language);
        extract_functions(tree.root_node(), source, language, &mut file);
        if language.has_preprocessor() {
            extract_macro_functions(tree.root_node(), source, &mut file);
        }
        Ok(file)
    }
}

impl Default for SourceParser {
    fn default() -> Self {
        Self::new()
    }
}

fn text(node: Node, source: &[u8]) -> Option<String> {
    node.utf8_text(source).ok().map(|s| s.to_string())
}

fn find_nodes_by_kind<'t>(node: Node<'t>, kinds: &[&str], out: &mut Vec<Node<'t>>) {
    if kinds.contains(&node.kind()) {
        out.push(node);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        find_nodes_by_kind(child, kinds, out);
    }
}

/// Breadth-first search for the first descendant (or self) of `kind`.
fn first_of_kind<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
    let mut queue = VecDeque::from([node]);
    while let Some(current) = queue.pop_front() {
        if current.kind() == kind {
            return Some(current);
        }
        let mut cursor = current.walk();
        for child in current.children(&mut cursor) {
            queue.push_back(child);
        }
    }
    None
}

/// Last path segment of qualified names (`a::b::c` -> `c`, `obj.m` -> `m`).
fn last_segment<'t>(mut node: Node<'t>) -> Node<'t> {
    loop {
        let next = match node.kind() {
            "qualified_identifier" | "scoped_identifier" | "template_function" => {
                node.child_by_field_name("name")
            }
            "field_expression" => node.child_by_field_name("field"),
            "member_expression" => node.child_by_field_name("property"),
            "attribute" => node.child_by_field_name("attribute"),
            "generic_function" => node.child_by_field_name("function"),
            _ => None,
        };
        match next {
            Some(n) => node = n,
            None => return node,
        }
    }
}

fn extract_functions(root: Node, source: &[u8], language: Language, file: &mut FileIndex) {
    let mut nodes = Vec::new();
    find_nodes_by_kind(root, language.function_kinds(), &mut nodes);

    for node in nodes {
        let name = match language {
            Language::C | Language::Cpp => c_function_name(node, source),
            _ => named_function(node, source),
        };
        let Some(name) = name else {
            continue;
        };

        file.functions.insert(name.clone(), Span::from_node(&node));

        let mut calls = Vec::new();
        find_nodes_by_kind(node, &[language.call_kind()], &mut calls);
        for call in calls {
            if let Some(callee) = callee_name(call, source) {
                file.record_call(&name, &callee);
            }
        }
    }
}

/// Python, Rust and TypeScript definitions carry a `name` field.
fn named_function(node: Node, source: &[u8]) -> Option<String> {
    let name_node = node.child_by_field_name("name").or_else(|| {
        let mut cursor = node.walk();
        let found = node
            .children(&mut cursor)
            .find(|c| matches!(c.kind(), "identifier" | "property_identifier"));
        found
    })?;
    let name = text(name_node, source)?;
    (!is_rejected_name(&name)).then_some(name)
}

/// C/C++ declarators are noisy with annotation macros, so try in order: an
/// identifier inside a macro-call in the declarator, the declarator field, and
/// any direct identifier child.
fn c_function_name(node: Node, source: &[u8]) -> Option<String> {
    let declarator = first_of_kind(node, "function_declarator")?;

    if let Some(call) = first_of_kind(declarator, "call_expression") {
        if let Some(ident) = first_of_kind(call, "identifier") {
            let name = text(ident, source)?;
            if !is_rejected_name(&name) {
                return Some(name);
            }
        }
    }

    if let Some(inner) = declarator.child_by_field_name("declarator") {
        let inner = last_segment(inner);
        if matches!(
            inner.kind(),
            "identifier" | "field_identifier" | "destructor_name" | "operator_name"
        ) {
            if let Some(name) = text(inner, source) {
                if !is_rejected_name(&name) {
                    return Some(name);
                }
            }
        }
    }

    let mut cursor = declarator.walk();
    let found = declarator
        .children(&mut cursor)
        .filter(|c| c.kind() == "identifier")
        .filter_map(|c| text(c, source))
        .find(|name| !is_rejected_name(name));
    found
}

fn callee_name(call: Node, source: &[u8]) -> Option<String> {
    if let Some(target) = call.child_by_field_name("function") {
        let target = last_segment(target);
        if matches!(
            target.kind(),
            "identifier" | "field_identifier" | "property_identifier"
        ) {
            return text(target, source);
        }
    }
    first_of_kind(call, "identifier").and_then(|ident| text(ident, source))
}

/// `#define NAME(args) body` macros count as functions, with no call edges.
fn extract_macro_functions(root: Node, source: &[u8], file: &mut FileIndex) {
    let mut nodes = Vec::new();
    find_nodes_by_kind(root, &["preproc_function_def"], &mut nodes);
    for node in nodes {
        let name = node
            .child_by_field_name("name")
            .and_then(|n| text(n, source));
        if let Some(name) = name {
            file.functions.insert(name, Span::from_node(&node));
        }
    }
}
