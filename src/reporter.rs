use colored::*;
use serde::Serialize;
use serde_json::{json, Value};

use crate::database::{FunctionRecord, IndexStats};
use crate::graph::{CallGraphNode, PopulateStats};
use crate::project::ProjectIndex;
use crate::scheduler::{
    BatchResult, FunctionContext, NextTarget, Progress, UpdateOutcome, SUMMARY_INSTRUCTIONS,
};

/// Batch member as handed to parallel annotators
#[derive(Debug, Serialize)]
pub struct BatchEntry {
    pub function_id: i64,
    pub name: String,
    pub file: String,
    pub start_line: i64,
    pub end_line: i64,
}

impl From<&FunctionRecord> for BatchEntry {
    fn from(func: &FunctionRecord) -> Self {
        Self {
            function_id: func.function_id,
            name: func.name.clone(),
            file: func.file.clone(),
            start_line: func.start_line,
            end_line: func.end_line,
        }
    }
}

fn context_json(context: &FunctionContext) -> Value {
    let mut value = json!({ "status": "needs_summary" });
    if let (Some(map), Ok(Value::Object(fields))) =
        (value.as_object_mut(), serde_json::to_value(context))
    {
        map.extend(fields);
    }
    value
}

pub fn next_json(next: &NextTarget) -> Value {
    match next {
        NextTarget::Empty => json!({
            "status": "error",
            "message": "No functions in database",
        }),
        NextTarget::Complete => json!({
            "status": "complete",
            "message": "All functions in database are summarized",
        }),
        NextTarget::NeedsSummary(context) => {
            let mut value = context_json(context);
            value["summary_instructions"] = json!(SUMMARY_INSTRUCTIONS);
            value
        }
    }
}

pub fn context_response(function_id: i64, context: Option<&FunctionContext>) -> Value {
    match context {
        Some(context) => context_json(context),
        None => json!({
            "status": "error",
            "message": format!("Function {} not found", function_id),
        }),
    }
}

pub fn batch_json(result: &BatchResult) -> Value {
    match result {
        BatchResult::Complete => json!({
            "status": "complete",
            "message": "All functions summarized",
            "batch": [],
        }),
        BatchResult::Ready {
            batch,
            total_remaining,
        } => {
            let entries: Vec<BatchEntry> = batch.iter().map(BatchEntry::from).collect();
            json!({
                "status": "ok",
                "batch_size": entries.len(),
                "total_remaining": total_remaining,
                "batch": entries,
            })
        }
        BatchResult::Circular { total_remaining } => json!({
            "status": "error",
            "message": "No functions ready - possible circular dependencies",
            "total_remaining": total_remaining,
            "batch": [],
        }),
    }
}

pub fn update_json(outcome: UpdateOutcome, function: &str, summary: &str) -> Value {
    match outcome {
        UpdateOutcome::Updated { function_id } | UpdateOutcome::Annotated { function_id, .. } => {
            json!({
                "status": "ok",
                "function_id": function_id,
                "function": function,
                "summary": summary,
            })
        }
        UpdateOutcome::NotFound => not_found_json(function),
    }
}

pub fn annotate_json(outcome: UpdateOutcome, function: &str, kind: &str, text: &str) -> Value {
    match outcome {
        UpdateOutcome::NotFound => not_found_json(function),
        UpdateOutcome::Annotated {
            function_id,
            sequence,
        } => json!({
            "status": "ok",
            "function_id": function_id,
            "function": function,
            "type": kind,
            "text": text,
            "sequence_order": sequence,
        }),
        UpdateOutcome::Updated { function_id } => json!({
            "status": "ok",
            "function_id": function_id,
            "function": function,
            "type": kind,
            "text": text,
        }),
    }
}

fn not_found_json(function: &str) -> Value {
    json!({
        "status": "error",
        "message": format!("Function not found: {}", function),
    })
}

fn index_summary(index: &ProjectIndex, from_cache: bool) -> String {
    let mut lines = vec![
        format!("\n{}", "📦 Index Results".bold()),
        "━".repeat(50),
        format!("📁 Root: {}", index.root.display()),
        format!("📄 Files: {}", index.file_count()),
        format!("📊 Functions: {}", index.function_count()),
    ];
    if from_cache {
        lines.push("♻️  Loaded from cache".green().to_string());
    }
    lines.join("\n")
}

pub fn print_index_summary(index: &ProjectIndex, from_cache: bool) {
    println!("{}", index_summary(index, from_cache));
}

pub fn print_populate(stats: &PopulateStats) {
    println!(
        "✅ {} functions, {} call edges stored",
        stats.functions.to_string().green().bold(),
        stats.edges.to_string().green().bold()
    );
}

pub fn print_stats(stats: &IndexStats) {
    println!("\n{}", "📊 Database Statistics".bold());
    println!("{}", "━".repeat(50));
    println!("  total_functions: {}", stats.total_functions);
    println!("  total_call_edges: {}", stats.total_call_edges);
    println!("  summarized_functions: {}", stats.summarized_functions);
    println!("  leaf_functions: {}", stats.leaf_functions);
}

pub fn print_function_list(functions: &[FunctionRecord]) {
    println!("{}", "Functions in database:".bold());
    for func in functions {
        let marker = if func.is_summarized() {
            "✓".green()
        } else {
            "·".dimmed()
        };
        println!("  {} {} ({})", marker, func.name, func.file.dimmed());
    }
}

pub fn print_progress(progress: &Progress) {
    let bar_width = 30;
    let filled = ((progress.progress_percent / 100.0) * bar_width as f64).round() as usize;
    let bar = format!(
        "{}{}",
        "█".repeat(filled.min(bar_width)).green(),
        "░".repeat(bar_width - filled.min(bar_width))
    );

    eprintln!("{} {} {:.1}%", "📝".bold(), bar, progress.progress_percent);
    eprintln!(
        "   {} / {} summarized, {} remaining",
        progress.summarized, progress.total_functions, progress.remaining
    );
}

/// Indented text rendering of a call tree
pub fn print_tree(node: &CallGraphNode) {
    print_tree_node(node, "", true, true);
}

fn print_tree_node(node: &CallGraphNode, prefix: &str, last: bool, root: bool) {
    let branch = if root {
        ""
    } else if last {
        "└─ "
    } else {
        "├─ "
    };

    let label = match node {
        CallGraphNode::Resolved { function, file, span, .. } => format!(
            "{} {}",
            function.bold(),
            format!("{}:{}-{}", file.display(), span.start_line, span.end_line).dimmed()
        ),
        CallGraphNode::Unresolved { function } => format!("{} {}", function, "(unresolved)".yellow()),
        CallGraphNode::Cycle { function, .. } => format!("{} {}", function, "(cycle)".red()),
    };
    println!("{}{}{}", prefix, branch, label);

    let child_prefix = if root {
        String::new()
    } else if last {
        format!("{}   ", prefix)
    } else {
        format!("{}│  ", prefix)
    };
    let calls = node.calls();
    for (i, call) in calls.iter().enumerate() {
        print_tree_node(call, &child_prefix, i + 1 == calls.len(), false);
    }
}
