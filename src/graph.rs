use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::database::IndexStore;
use crate::error::Result;
use crate::project::{ProjectIndex, Span};

/// File reported for functions that could not be resolved
pub const UNKNOWN_FILE: &str = "unknown";

const CYCLE_NOTE: &str = "Already visited (cycle)";

/// Node of a call tree rooted at a focal function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallGraphNode {
    Resolved {
        function: String,
        file: PathBuf,
        span: Span,
        calls: Vec<CallGraphNode>,
    },
    /// Name not defined anywhere in the project
    Unresolved { function: String },
    /// Name already expanded elsewhere in this tree. `definition` is where the
    /// name resolves at this position, which may differ from the expanded one.
    Cycle {
        function: String,
        definition: Option<(PathBuf, Span)>,
    },
}

impl CallGraphNode {
    pub fn function(&self) -> &str {
        match self {
            CallGraphNode::Resolved { function, .. }
            | CallGraphNode::Unresolved { function }
            | CallGraphNode::Cycle { function, .. } => function,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, CallGraphNode::Resolved { .. })
    }

    pub fn calls(&self) -> &[CallGraphNode] {
        match self {
            CallGraphNode::Resolved { calls, .. } => calls,
            _ => &[],
        }
    }

    /// Number of nodes in the tree, markers included.
    pub fn node_count(&self) -> usize {
        1 + self.calls().iter().map(|c| c.node_count()).sum::<usize>()
    }
}

impl Serialize for CallGraphNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        match self {
            CallGraphNode::Resolved {
                function,
                file,
                span,
                calls,
            } => {
                map.serialize_entry("file", &file.to_string_lossy())?;
                map.serialize_entry("function", function)?;
                map.serialize_entry("start_line", &span.start_line)?;
                map.serialize_entry("end_line", &span.end_line)?;
                map.serialize_entry("calls", calls)?;
            }
            CallGraphNode::Unresolved { function } => {
                map.serialize_entry("file", UNKNOWN_FILE)?;
                map.serialize_entry("function", function)?;
                map.serialize_entry("calls", &[] as &[CallGraphNode])?;
            }
            CallGraphNode::Cycle { function, .. } => {
                map.serialize_entry("function", function)?;
                map.serialize_entry("calls", CYCLE_NOTE)?;
            }
        }
        map.end()
    }
}

/// Builds call trees from a [`ProjectIndex`] by name lookup.
pub struct CallGraphBuilder<'a> {
    index: &'a ProjectIndex,
}

impl<'a> CallGraphBuilder<'a> {
    pub fn new(index: &'a ProjectIndex) -> Self {
        Self { index }
    }

    /// Expand `function_name` and its callees.
    ///
    /// One visited set is shared by the whole expansion, so a name is expanded
    /// at its first occurrence only; every later occurrence (on any path)
    /// becomes a `Cycle` leaf.
    pub fn build(&self, function_name: &str, file_hint: Option<&Path>) -> CallGraphNode {
        let mut visited = HashSet::new();
        self.build_node(function_name, file_hint, &mut visited)
    }

    fn build_node(
        &self,
        name: &str,
        file_hint: Option<&Path>,
        visited: &mut HashSet<String>,
    ) -> CallGraphNode {
        if !visited.insert(name.to_string()) {
            return CallGraphNode::Cycle {
                function: name.to_string(),
                definition: self
                    .index
                    .resolve(name, file_hint)
                    .map(|(file, span)| (file.path.clone(), *span)),
            };
        }

        let Some((file, span)) = self.index.resolve(name, file_hint) else {
            tracing::debug!("function {} not found in project", name);
            return CallGraphNode::Unresolved {
                function: name.to_string(),
            };
        };

        let calls = file
            .callees
            .get(name)
            .map(|callees| {
                callees
                    .iter()
                    .map(|callee| self.build_node(callee, None, visited))
                    .collect()
            })
            .unwrap_or_default();

        CallGraphNode::Resolved {
            function: name.to_string(),
            file: file.path.clone(),
            span: *span,
            calls,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PopulateStats {
    pub functions: usize,
    pub edges: usize,
}

/// Writes call trees into the index store.
pub struct Populator<'s> {
    store: &'s IndexStore,
}

impl<'s> Populator<'s> {
    pub fn new(store: &'s IndexStore) -> Self {
        Self { store }
    }

    /// Store every resolved node of `tree` and its resolved edges.
    ///
    /// Unresolved names produce nothing. A cycle marker links to the definition
    /// its name resolves to at that position, stored if not already present.
    pub fn populate(&self, tree: &CallGraphNode) -> Result<PopulateStats> {
        let mut ids: HashMap<(PathBuf, String), i64> = HashMap::new();
        let mut stats = PopulateStats::default();
        self.add_functions(tree, &mut ids, &mut stats)?;
        self.add_edges(tree, &ids, &mut stats)?;
        Ok(stats)
    }

    fn add_functions(
        &self,
        node: &CallGraphNode,
        ids: &mut HashMap<(PathBuf, String), i64>,
        stats: &mut PopulateStats,
    ) -> Result<()> {
        match node {
            CallGraphNode::Resolved {
                function,
                file,
                span,
                calls,
            } => {
                self.intern(ids, stats, file, function, span)?;
                for call in calls {
                    self.add_functions(call, ids, stats)?;
                }
            }
            CallGraphNode::Cycle {
                function,
                definition: Some((file, span)),
            } => {
                self.intern(ids, stats, file, function, span)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn add_edges(
        &self,
        node: &CallGraphNode,
        ids: &HashMap<(PathBuf, String), i64>,
        stats: &mut PopulateStats,
    ) -> Result<()> {
        let CallGraphNode::Resolved {
            function,
            file,
            calls,
            ..
        } = node
        else {
            return Ok(());
        };
        let Some(&caller_id) = ids.get(&(file.clone(), function.clone())) else {
            return Ok(());
        };

        for call in calls {
            let target = match call {
                CallGraphNode::Resolved { function, file, .. }
                | CallGraphNode::Cycle {
                    function,
                    definition: Some((file, _)),
                } => ids.get(&(file.clone(), function.clone())),
                _ => None,
            };
            if let Some(&callee_id) = target {
                if self.store.add_call_edge(caller_id, callee_id)? {
                    stats.edges += 1;
                }
            }
            self.add_edges(call, ids, stats)?;
        }
        Ok(())
    }

    /// Populate every function of the project.
    ///
    /// Each definition is stored under its own file; its callees resolve with
    /// the builder's policy (first file in indexing order). This yields the
    /// edges of every function's own call tree without re-walking shared
    /// subtrees.
    pub fn populate_project(&self, index: &ProjectIndex) -> Result<PopulateStats> {
        let mut ids: HashMap<(PathBuf, String), i64> = HashMap::new();
        let mut stats = PopulateStats::default();

        for (file, name, span) in index.definitions() {
            let caller_id = self.intern(&mut ids, &mut stats, &file.path, name, span)?;

            let Some(callees) = file.callees.get(name) else {
                continue;
            };
            for callee in callees {
                let Some((callee_file, callee_span)) = index.resolve(callee, None) else {
                    continue;
                };
                let callee_id =
                    self.intern(&mut ids, &mut stats, &callee_file.path, callee, callee_span)?;
                if self.store.add_call_edge(caller_id, callee_id)? {
                    stats.edges += 1;
                }
            }
        }

        tracing::info!(
            "populated {} functions and {} call edges",
            stats.functions,
            stats.edges
        );
        Ok(stats)
    }

    fn intern(
        &self,
        ids: &mut HashMap<(PathBuf, String), i64>,
        stats: &mut PopulateStats,
        file: &Path,
        name: &str,
        span: &Span,
    ) -> Result<i64> {
        let key = (file.to_path_buf(), name.to_string());
        if let Some(&id) = ids.get(&key) {
            return Ok(id);
        }
        let id = self.store.add_function(
            name,
            &file.to_string_lossy(),
            span.start_line as i64,
            span.end_line as i64,
            "",
        )?;
        ids.insert(key, id);
        stats.functions += 1;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::Language;
    use crate::project::FileIndex;

    fn span(line: usize) -> Span {
        Span {
            start_byte: 0,
            end_byte: 0,
            start_line: line,
            end_line: line + 2,
        }
    }

    /// One file per `(name, callees)` entry, in order.
    fn project(defs: &[(&str, &[&str])]) -> ProjectIndex {
        let mut index = ProjectIndex::new(PathBuf::from("/p"));
        for (i, (name, callees)) in defs.iter().enumerate() {
            let mut file = FileIndex::new(PathBuf::from(format!("/p/{}.c", name)), Language::C);
            file.functions.insert(name.to_string(), span(i + 1));
            for callee in callees.iter() {
                file.record_call(name, callee);
            }
            index.files.push(file);
        }
        index
    }

    #[test]
    fn test_mutual_recursion_terminates() {
        let index = project(&[("A", &["B"]), ("B", &["A"])]);
        let tree = CallGraphBuilder::new(&index).build("A", None);

        assert_eq!(tree.function(), "A");
        assert_eq!(tree.calls().len(), 1);
        let b = &tree.calls()[0];
        assert!(b.is_resolved());
        assert_eq!(b.function(), "B");
        assert_eq!(
            b.calls(),
            &[CallGraphNode::Cycle {
                function: "A".to_string(),
                definition: Some((PathBuf::from("/p/A.c"), span(1))),
            }]
        );
        assert_eq!(tree.node_count(), 3);
    }

    #[test]
    fn test_repeated_function_expanded_once() {
        // main calls x and y, both call shared: only the first is expanded
        let index = project(&[
            ("main", &["x", "y"]),
            ("x", &["shared"]),
            ("y", &["shared"]),
            ("shared", &[]),
        ]);
        let tree = CallGraphBuilder::new(&index).build("main", None);
        let x = &tree.calls()[0];
        let y = &tree.calls()[1];
        assert!(x.calls()[0].is_resolved());
        assert!(matches!(y.calls()[0], CallGraphNode::Cycle { .. }));
    }

    #[test]
    fn test_unknown_function_marker() {
        let index = project(&[("main", &["printf"])]);
        let tree = CallGraphBuilder::new(&index).build("missing", None);
        assert_eq!(
            tree,
            CallGraphNode::Unresolved {
                function: "missing".to_string()
            }
        );

        let tree = CallGraphBuilder::new(&index).build("main", None);
        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(json["file"], "/p/main.c");
        assert_eq!(json["calls"][0]["file"], UNKNOWN_FILE);
        assert_eq!(json["calls"][0]["calls"], serde_json::json!([]));
    }

    #[test]
    fn test_cycle_serializes_marker() {
        let index = project(&[("A", &["A"])]);
        let tree = CallGraphBuilder::new(&index).build("A", None);
        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(json["calls"][0]["function"], "A");
        assert_eq!(json["calls"][0]["calls"], CYCLE_NOTE);
    }

    #[test]
    fn test_populate_tree_skips_unresolved() {
        let index = project(&[("A", &["B", "puts"]), ("B", &["A"])]);
        let tree = CallGraphBuilder::new(&index).build("A", None);

        let store = IndexStore::open_in_memory().unwrap();
        let stats = Populator::new(&store).populate(&tree).unwrap();
        assert_eq!(stats.functions, 2);
        // A->B and the cycle edge B->A
        assert_eq!(stats.edges, 2);

        let db = store.get_stats().unwrap();
        assert_eq!(db.total_functions, 2);
        assert_eq!(db.total_call_edges, 2);
    }

    #[test]
    fn test_populate_project_stats_scenario() {
        let index = project(&[("A", &["B"]), ("B", &[]), ("C", &[])]);
        let store = IndexStore::open_in_memory().unwrap();
        let stats = Populator::new(&store).populate_project(&index).unwrap();
        assert_eq!(stats, PopulateStats { functions: 3, edges: 1 });

        let db = store.get_stats().unwrap();
        assert_eq!(db.total_functions, 3);
        assert_eq!(db.total_call_edges, 1);
        assert_eq!(db.leaf_functions, 2);

        // idempotent
        Populator::new(&store).populate_project(&index).unwrap();
        assert_eq!(store.get_stats().unwrap().total_functions, 3);
    }

    #[test]
    fn test_populate_links_repeated_name_to_unhinted_definition() {
        // a.c: dup, helper (helper calls dup); b.c: dup calls helper
        let mut index = ProjectIndex::new(PathBuf::from("/p"));
        let mut a = FileIndex::new(PathBuf::from("/p/a.c"), Language::C);
        a.functions.insert("dup".to_string(), span(1));
        a.functions.insert("helper".to_string(), span(5));
        a.record_call("helper", "dup");
        let mut b = FileIndex::new(PathBuf::from("/p/b.c"), Language::C);
        b.functions.insert("dup".to_string(), span(1));
        b.record_call("dup", "helper");
        index.files.push(a);
        index.files.push(b);

        let tree = CallGraphBuilder::new(&index).build("dup", Some(Path::new("/p/b.c")));
        let store = IndexStore::open_in_memory().unwrap();
        let stats = Populator::new(&store).populate(&tree).unwrap();
        assert_eq!(stats, PopulateStats { functions: 3, edges: 2 });

        let helper = store
            .list_functions()
            .unwrap()
            .into_iter()
            .find(|f| f.name == "helper")
            .unwrap();
        let callees = store.get_callees(helper.function_id).unwrap();
        assert_eq!(callees.len(), 1);
        assert_eq!(callees[0].function, "dup");
        assert_eq!(callees[0].file, "/p/a.c");
    }
}
