// Bottom-up summarization scheduler
// Decides which stored function an external annotator should describe next.

use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;

use crate::config::SchedulerConfig;
use crate::database::{CalleeRow, ConditionKind, FunctionRecord, IndexStore};
use crate::error::Result;
use crate::graph::UNKNOWN_FILE;
use crate::project::ProjectIndex;

pub const SOURCE_NOT_FOUND: &str = "Function code not found.";

pub const SUMMARY_INSTRUCTIONS: &str = "Write a concise paragraph summary covering the function's purpose, how outputs depend on inputs, any global or shared state it reads or mutates, and which callees have side effects, can fail, or contain complex branching that a test might need to exercise.";

/// Everything an annotator needs to summarize one function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionContext {
    pub function_id: i64,
    pub function: String,
    pub file: String,
    pub start_line: i64,
    pub end_line: i64,
    pub source_code: String,
    pub preconditions: Vec<String>,
    pub postconditions: Vec<String>,
    pub callees: Vec<CalleeContext>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalleeContext {
    pub function: String,
    pub file: String,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calls: Option<Vec<CalleeContext>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cycle: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextTarget {
    /// The store holds no functions
    Empty,
    Complete,
    NeedsSummary(FunctionContext),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchResult {
    Complete,
    Ready {
        batch: Vec<FunctionRecord>,
        total_remaining: usize,
    },
    /// Work remains but every candidate waits on another unsummarized function
    Circular { total_remaining: usize },
}

/// How a caller names a stored function. Ids are exact; names pick the
/// lowest id carrying that name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunctionRef {
    Id(i64),
    Name(String),
}

impl FunctionRef {
    /// Prefer the id when one was given.
    pub fn from_args(name: &str, function_id: Option<i64>) -> Self {
        match function_id {
            Some(id) => FunctionRef::Id(id),
            None => FunctionRef::Name(name.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated { function_id: i64 },
    Annotated { function_id: i64, sequence: i64 },
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
    pub total_functions: usize,
    pub summarized: usize,
    pub remaining: usize,
    pub progress_percent: f64,
    pub leaf_functions: usize,
    pub call_edges: usize,
}

pub struct Scheduler<'a> {
    store: &'a IndexStore,
    project: Option<&'a ProjectIndex>,
    config: &'a SchedulerConfig,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        store: &'a IndexStore,
        project: Option<&'a ProjectIndex>,
        config: &'a SchedulerConfig,
    ) -> Self {
        Self {
            store,
            project,
            config,
        }
    }

    /// Next function whose callees are all summarized, searching depth-first
    /// from every stored function with one visited set shared by all roots.
    pub fn find_next(&self) -> Result<NextTarget> {
        let ids = self.store.function_ids()?;
        if ids.is_empty() {
            return Ok(NextTarget::Empty);
        }

        let mut visited = HashSet::new();
        let mut on_path = HashSet::new();
        for id in ids {
            let (target, _) = self.find_target(id, &mut visited, &mut on_path)?;
            if let Some(func) = target {
                tracing::debug!("next target: {} ({})", func.name, func.function_id);
                let context = self.build_context(func, self.config.next_context_depth)?;
                return Ok(NextTarget::NeedsSummary(context));
            }
        }
        Ok(NextTarget::Complete)
    }

    /// Post-order search. Returns the target (if any) and whether the subtree
    /// below `function_id` counts as done.
    ///
    /// A back edge to a function still on the current path is a cycle and
    /// counts as done, so mutually recursive functions never block each other.
    /// Any other revisit is done only if that function is summarized.
    fn find_target(
        &self,
        function_id: i64,
        visited: &mut HashSet<i64>,
        on_path: &mut HashSet<i64>,
    ) -> Result<(Option<FunctionRecord>, bool)> {
        if !visited.insert(function_id) {
            if on_path.contains(&function_id) {
                return Ok((None, true));
            }
            let done = self
                .store
                .function(function_id)?
                .is_some_and(|f| f.is_summarized());
            return Ok((None, done));
        }

        let Some(func) = self.store.function(function_id)? else {
            return Ok((None, true));
        };

        on_path.insert(function_id);
        let mut found = None;
        let mut callees_done = true;
        for callee in self.store.get_callees(function_id)? {
            let (target, done) = self.find_target(callee.function_id, visited, on_path)?;
            if target.is_some() {
                found = target;
                break;
            }
            callees_done &= done;
        }
        on_path.remove(&function_id);

        if found.is_some() {
            Ok((found, false))
        } else if func.is_summarized() {
            Ok((None, callees_done))
        } else if callees_done {
            Ok((Some(func), false))
        } else {
            Ok((None, false))
        }
    }

    /// Context for one function, callee tree bounded by `context_depth`.
    pub fn context(&self, function_id: i64) -> Result<Option<FunctionContext>> {
        match self.store.function(function_id)? {
            Some(func) => Ok(Some(self.build_context(func, self.config.context_depth)?)),
            None => Ok(None),
        }
    }

    fn build_context(&self, func: FunctionRecord, max_depth: usize) -> Result<FunctionContext> {
        let source_code = self
            .source_of(&func)
            .unwrap_or_else(|| SOURCE_NOT_FOUND.to_string());

        let mut callees = Vec::new();
        for callee in self.store.get_callees(func.function_id)? {
            callees.push(self.callee_tree(&callee, 1, max_depth, HashSet::new())?);
        }

        Ok(FunctionContext {
            function_id: func.function_id,
            preconditions: self
                .store
                .conditions(func.function_id, ConditionKind::Precondition)?,
            postconditions: self
                .store
                .conditions(func.function_id, ConditionKind::Postcondition)?,
            function: func.name,
            file: func.file,
            start_line: func.start_line,
            end_line: func.end_line,
            source_code,
            callees,
        })
    }

    fn source_of(&self, func: &FunctionRecord) -> Option<String> {
        let project = self.project?;
        let hint = (func.file != UNKNOWN_FILE).then(|| Path::new(&func.file));
        project.function_source(&func.name, hint)
    }

    // Each branch gets its own visited copy; fan-out and depth are the only bounds.
    fn callee_tree(
        &self,
        callee: &CalleeRow,
        depth: usize,
        max_depth: usize,
        mut visited: HashSet<i64>,
    ) -> Result<CalleeContext> {
        let mut node = CalleeContext {
            function: callee.function.clone(),
            file: callee.file.clone(),
            summary: callee.summary.clone(),
            calls: None,
            cycle: false,
        };

        if !visited.insert(callee.function_id) {
            node.cycle = true;
            return Ok(node);
        }
        if depth >= max_depth {
            return Ok(node);
        }

        let sub_callees = self.store.get_callees(callee.function_id)?;
        if !sub_callees.is_empty() {
            let mut calls = Vec::new();
            for sub in sub_callees.iter().take(self.config.context_fanout) {
                calls.push(self.callee_tree(sub, depth + 1, max_depth, visited.clone())?);
            }
            node.calls = Some(calls);
        }
        Ok(node)
    }

    /// Unsummarized functions none of whose direct callees is unsummarized.
    /// These can be annotated in parallel without ordering conflicts.
    pub fn ready_batch(&self, max_batch: usize) -> Result<BatchResult> {
        let pending = self.store.unsummarized()?;
        if pending.is_empty() {
            return Ok(BatchResult::Complete);
        }

        let pending_ids: HashSet<i64> = pending.iter().map(|f| f.function_id).collect();
        let total_remaining = pending.len();

        // a batch always holds at least one ready function
        let max_batch = max_batch.max(1);
        let mut batch = Vec::new();
        for func in pending {
            let blocked = self
                .store
                .get_callees(func.function_id)?
                .iter()
                .any(|c| pending_ids.contains(&c.function_id));
            if !blocked {
                batch.push(func);
                if batch.len() >= max_batch {
                    break;
                }
            }
        }

        if batch.is_empty() {
            tracing::warn!(
                "no function ready among {} remaining, possible circular dependencies",
                total_remaining
            );
            return Ok(BatchResult::Circular { total_remaining });
        }
        Ok(BatchResult::Ready {
            batch,
            total_remaining,
        })
    }

    fn lookup(&self, function: &FunctionRef) -> Result<Option<i64>> {
        match function {
            FunctionRef::Id(id) => Ok(self.store.function(*id)?.map(|f| f.function_id)),
            FunctionRef::Name(name) => self.store.find_function_id(name),
        }
    }

    pub fn update_summary(&self, function: &FunctionRef, summary: &str) -> Result<UpdateOutcome> {
        let Some(function_id) = self.lookup(function)? else {
            return Ok(UpdateOutcome::NotFound);
        };
        if !self.store.update_summary(function_id, summary)? {
            return Ok(UpdateOutcome::NotFound);
        }
        Ok(UpdateOutcome::Updated { function_id })
    }

    /// Append a pre- or postcondition after any existing ones.
    pub fn add_annotation(
        &self,
        function: &FunctionRef,
        kind: ConditionKind,
        text: &str,
    ) -> Result<UpdateOutcome> {
        let Some(function_id) = self.lookup(function)? else {
            return Ok(UpdateOutcome::NotFound);
        };
        let sequence = self.store.add_condition(function_id, kind, text)?;
        Ok(UpdateOutcome::Annotated {
            function_id,
            sequence,
        })
    }

    pub fn status(&self) -> Result<Progress> {
        let stats = self.store.get_stats()?;
        let total = stats.total_functions;
        let summarized = stats.summarized_functions;
        let progress_percent = if total > 0 {
            (summarized as f64 / total as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        };

        Ok(Progress {
            total_functions: total,
            summarized,
            remaining: total - summarized,
            progress_percent,
            leaf_functions: stats.leaf_functions,
            call_edges: stats.total_call_edges,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ProjectCache;
    use crate::config::IndexerConfig;
    use crate::graph::Populator;

    fn config() -> SchedulerConfig {
        SchedulerConfig::default()
    }

    // main -> helper -> leaf
    fn chain() -> (IndexStore, i64, i64, i64) {
        let store = IndexStore::open_in_memory().unwrap();
        let main = store.add_function("main", "m.c", 1, 5, "").unwrap();
        let helper = store.add_function("helper", "m.c", 6, 10, "").unwrap();
        let leaf = store.add_function("leaf", "m.c", 11, 15, "").unwrap();
        store.add_call_edge(main, helper).unwrap();
        store.add_call_edge(helper, leaf).unwrap();
        (store, main, helper, leaf)
    }

    fn next_name(scheduler: &Scheduler) -> Option<String> {
        match scheduler.find_next().unwrap() {
            NextTarget::NeedsSummary(ctx) => Some(ctx.function),
            _ => None,
        }
    }

    #[test]
    fn test_bottom_up_order() {
        let (store, main, helper, leaf) = chain();
        let config = config();
        let scheduler = Scheduler::new(&store, None, &config);

        assert_eq!(next_name(&scheduler).as_deref(), Some("leaf"));
        scheduler
            .update_summary(&FunctionRef::Id(leaf), "returns a constant")
            .unwrap();
        assert_eq!(next_name(&scheduler).as_deref(), Some("helper"));
        scheduler
            .update_summary(&FunctionRef::Id(helper), "wraps leaf")
            .unwrap();
        assert_eq!(next_name(&scheduler).as_deref(), Some("main"));
        scheduler
            .update_summary(&FunctionRef::Id(main), "entry point")
            .unwrap();
        assert_eq!(scheduler.find_next().unwrap(), NextTarget::Complete);
    }

    #[test]
    fn test_empty_store() {
        let store = IndexStore::open_in_memory().unwrap();
        let config = config();
        let scheduler = Scheduler::new(&store, None, &config);
        assert_eq!(scheduler.find_next().unwrap(), NextTarget::Empty);
        assert_eq!(scheduler.ready_batch(10).unwrap(), BatchResult::Complete);
        assert_eq!(scheduler.status().unwrap().progress_percent, 0.0);
    }

    #[test]
    fn test_context_carries_callee_summaries() {
        let (store, _, helper, leaf) = chain();
        store.update_summary(leaf, "returns a constant").unwrap();
        store
            .add_condition(helper, ConditionKind::Precondition, "input is non-null")
            .unwrap();
        let config = config();
        let scheduler = Scheduler::new(&store, None, &config);

        let NextTarget::NeedsSummary(ctx) = scheduler.find_next().unwrap() else {
            panic!("expected a target");
        };
        assert_eq!(ctx.function_id, helper);
        assert_eq!(ctx.source_code, SOURCE_NOT_FOUND);
        assert_eq!(ctx.preconditions, vec!["input is non-null"]);
        assert_eq!(ctx.callees.len(), 1);
        assert_eq!(ctx.callees[0].summary, "returns a constant");
        assert_eq!(ctx.callees[0].calls, None);
    }

    #[test]
    fn test_batch_is_independent() {
        let store = IndexStore::open_in_memory().unwrap();
        let a = store.add_function("a", "x.c", 1, 2, "").unwrap();
        let b = store.add_function("b", "x.c", 3, 4, "").unwrap();
        let c = store.add_function("c", "x.c", 5, 6, "").unwrap();
        let d = store.add_function("d", "x.c", 7, 8, "").unwrap();
        store.add_call_edge(a, b).unwrap();
        store.add_call_edge(a, c).unwrap();
        store.add_call_edge(b, d).unwrap();
        let config = config();
        let scheduler = Scheduler::new(&store, None, &config);

        let BatchResult::Ready {
            batch,
            total_remaining,
        } = scheduler.ready_batch(50).unwrap()
        else {
            panic!("expected a batch");
        };
        assert_eq!(total_remaining, 4);
        let ids: Vec<i64> = batch.iter().map(|f| f.function_id).collect();
        assert_eq!(ids, vec![c, d]);

        // no member of a batch calls another unsummarized function
        for func in &batch {
            for callee in store.get_callees(func.function_id).unwrap() {
                assert!(store.function(callee.function_id).unwrap().unwrap().is_summarized());
            }
        }

        let BatchResult::Ready { batch, .. } = scheduler.ready_batch(1).unwrap() else {
            panic!("expected a batch");
        };
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_zero_batch_size_still_returns_a_ready_function() {
        let store = IndexStore::open_in_memory().unwrap();
        let leaf = store.add_function("leaf", "x.c", 1, 2, "").unwrap();
        let config = config();
        let scheduler = Scheduler::new(&store, None, &config);

        let BatchResult::Ready {
            batch,
            total_remaining,
        } = scheduler.ready_batch(0).unwrap()
        else {
            panic!("an acyclic store is never circular");
        };
        assert_eq!(total_remaining, 1);
        assert_eq!(batch[0].function_id, leaf);
    }

    #[test]
    fn test_cycles() {
        let store = IndexStore::open_in_memory().unwrap();
        let a = store.add_function("a", "x.c", 1, 2, "").unwrap();
        let b = store.add_function("b", "x.c", 3, 4, "").unwrap();
        store.add_call_edge(a, b).unwrap();
        store.add_call_edge(b, a).unwrap();
        let config = config();
        let scheduler = Scheduler::new(&store, None, &config);

        assert_eq!(
            scheduler.ready_batch(50).unwrap(),
            BatchResult::Circular { total_remaining: 2 }
        );

        // the revisited peer counts as done, so the deeper member comes first
        let NextTarget::NeedsSummary(ctx) = scheduler.find_next().unwrap() else {
            panic!("expected a target");
        };
        assert_eq!(ctx.function_id, b);
        assert_eq!(ctx.callees[0].function, "a");
        let nested = ctx.callees[0].calls.as_ref().unwrap();
        assert_eq!(nested[0].function, "b");
        assert!(nested[0].calls.as_ref().unwrap()[0].cycle);

        scheduler.update_summary(&FunctionRef::Id(b), "calls a").unwrap();
        assert_eq!(next_name(&scheduler).as_deref(), Some("a"));
    }

    #[test]
    fn test_callee_tree_bounds() {
        let store = IndexStore::open_in_memory().unwrap();
        let root = store.add_function("root", "x.c", 1, 2, "").unwrap();
        let hub = store.add_function("hub", "x.c", 3, 4, "").unwrap();
        store.add_call_edge(root, hub).unwrap();
        for i in 0..7 {
            let spoke = store
                .add_function(&format!("spoke{}", i), "x.c", 10 + i, 10 + i, "")
                .unwrap();
            store.add_call_edge(hub, spoke).unwrap();
        }
        let config = config();
        let scheduler = Scheduler::new(&store, None, &config);

        let ctx = scheduler.context(root).unwrap().unwrap();
        let calls = ctx.callees[0].calls.as_ref().unwrap();
        assert_eq!(calls.len(), 5);
        assert_eq!(calls[0].function, "spoke0");

        let shallow = SchedulerConfig {
            context_depth: 1,
            ..SchedulerConfig::default()
        };
        let scheduler = Scheduler::new(&store, None, &shallow);
        let ctx = scheduler.context(root).unwrap().unwrap();
        assert_eq!(ctx.callees[0].calls, None);
        assert_eq!(scheduler.context(999).unwrap(), None);
    }

    #[test]
    fn test_update_and_annotate_by_name() {
        let (store, main, _, _) = chain();
        let config = config();
        let scheduler = Scheduler::new(&store, None, &config);

        assert_eq!(
            scheduler
                .update_summary(&FunctionRef::Name("nope".into()), "x")
                .unwrap(),
            UpdateOutcome::NotFound
        );
        assert_eq!(
            scheduler
                .add_annotation(&FunctionRef::Id(999), ConditionKind::Postcondition, "x")
                .unwrap(),
            UpdateOutcome::NotFound
        );
        assert_eq!(
            scheduler
                .update_summary(&FunctionRef::from_args("main", None), "entry")
                .unwrap(),
            UpdateOutcome::Updated { function_id: main }
        );
        assert_eq!(
            scheduler
                .add_annotation(
                    &FunctionRef::Name("main".into()),
                    ConditionKind::Postcondition,
                    "returns 0"
                )
                .unwrap(),
            UpdateOutcome::Annotated {
                function_id: main,
                sequence: 0
            }
        );

        let progress = scheduler.status().unwrap();
        assert_eq!(progress.total_functions, 3);
        assert_eq!(progress.summarized, 1);
        assert_eq!(progress.remaining, 2);
        assert_eq!(progress.progress_percent, 33.3);
        assert_eq!(progress.leaf_functions, 1);
        assert_eq!(progress.call_edges, 2);
    }

    #[test]
    fn test_context_reads_source_from_project() {
        let project = tempfile::tempdir().unwrap();
        std::fs::write(
            project.path().join("m.c"),
            "int leaf(void) { return 1; }\nint main(void) { return leaf(); }\n",
        )
        .unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let mut cache = ProjectCache::new(IndexerConfig::default().with_cache_dir(cache_dir.path()));
        let index = cache.index(project.path(), false).unwrap();

        let store = IndexStore::open_in_memory().unwrap();
        Populator::new(&store).populate_project(&index).unwrap();

        let config = config();
        let scheduler = Scheduler::new(&store, Some(&index), &config);
        let NextTarget::NeedsSummary(ctx) = scheduler.find_next().unwrap() else {
            panic!("expected a target");
        };
        assert_eq!(ctx.function, "leaf");
        assert_eq!(ctx.source_code, "int leaf(void) { return 1; }");
        assert_eq!(ctx.start_line, 1);
    }
}
